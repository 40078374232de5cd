//! Ordered address discovery
//!
//! The host's own port-80 redirect can rewrite HTTP self-queries, so sources
//! are ordered from least to most affected by it:
//!
//! ```text
//! metadata (link-local) → HTTPS echo → HTTPS echo → HTTP echo (last resort)
//! ```
//!
//! Sources are tried strictly one after another, each under its own timeout.
//! A failed source is never retried; the chain just moves on.

pub mod validate;

pub use validate::validate_candidate;

use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

use crate::traits::AddressSource;

/// An address and the source that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    /// The validated address
    pub address: Ipv4Addr,
    /// Name of the source that returned it
    pub source: String,
}

/// Ordered list of address sources
pub struct DiscoveryChain {
    sources: Vec<Box<dyn AddressSource>>,
}

impl DiscoveryChain {
    /// Create a chain; sources are tried in the given order
    pub fn new(sources: Vec<Box<dyn AddressSource>>) -> Self {
        Self { sources }
    }

    /// Number of sources in the chain
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the chain has no sources
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Return the first structurally valid address
    ///
    /// # Parameters
    ///
    /// - `redirect_clear`: `true` once the redirect is known not to be
    ///   installed. While `false`, sources that the redirect would rewrite
    ///   are skipped.
    ///
    /// # Returns
    ///
    /// `None` when every source failed, timed out, returned garbage, or was
    /// skipped.
    pub async fn discover(&self, redirect_clear: bool) -> Option<DiscoveredAddress> {
        for source in &self.sources {
            if source.affected_by_redirect() && !redirect_clear {
                debug!(
                    "Skipping {}: port-80 redirect may still be installed",
                    source.name()
                );
                continue;
            }

            debug!("Querying {} (timeout {:?})", source.name(), source.timeout());

            let candidate = match tokio::time::timeout(source.timeout(), source.fetch()).await {
                Ok(Ok(candidate)) => candidate,
                Ok(Err(e)) => {
                    warn!("Address source {} failed: {}", source.name(), e);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Address source {} timed out after {:?}",
                        source.name(),
                        source.timeout()
                    );
                    continue;
                }
            };

            match validate_candidate(&candidate) {
                Some(address) => {
                    info!("External address {} from {}", address, source.name());
                    return Some(DiscoveredAddress {
                        address,
                        source: source.name().to_string(),
                    });
                }
                None => {
                    warn!(
                        "Address source {} returned a malformed address: {:?}",
                        source.name(),
                        candidate.trim().chars().take(64).collect::<String>()
                    );
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticSource {
        name: &'static str,
        reply: Result<&'static str, &'static str>,
        delay: Duration,
        affected: bool,
        calls: Arc<AtomicUsize>,
    }

    impl StaticSource {
        fn boxed(name: &'static str, reply: Result<&'static str, &'static str>) -> (Box<dyn AddressSource>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let source = StaticSource {
                name,
                reply,
                delay: Duration::ZERO,
                affected: false,
                calls: Arc::clone(&calls),
            };
            (Box::new(source), calls)
        }
    }

    #[async_trait]
    impl AddressSource for StaticSource {
        async fn fetch(&self) -> Result<String, crate::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply
                .map(str::to_string)
                .map_err(crate::Error::ip_source)
        }

        fn name(&self) -> &str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn affected_by_redirect(&self) -> bool {
            self.affected
        }
    }

    #[tokio::test]
    async fn transport_error_advances_to_next_source() {
        let (first, first_calls) = StaticSource::boxed("first", Err("connection refused"));
        let (second, second_calls) = StaticSource::boxed("second", Ok("198.51.100.4\n"));
        let chain = DiscoveryChain::new(vec![first, second]);

        let found = chain.discover(true).await.unwrap();
        assert_eq!(found.address, Ipv4Addr::new(198, 51, 100, 4));
        assert_eq!(found.source, "second");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = Box::new(StaticSource {
            name: "slow",
            reply: Ok("192.0.2.1"),
            delay: Duration::from_secs(10),
            affected: false,
            calls: Arc::clone(&calls),
        });
        let (fallback, _) = StaticSource::boxed("fallback", Ok("192.0.2.2"));
        let chain = DiscoveryChain::new(vec![slow, fallback]);

        let found = chain.discover(true).await.unwrap();
        assert_eq!(found.address, Ipv4Addr::new(192, 0, 2, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirect_affected_source_skipped_until_clear() {
        let calls = Arc::new(AtomicUsize::new(0));
        let plain_http = || -> Box<dyn AddressSource> {
            Box::new(StaticSource {
                name: "plain-http",
                reply: Ok("192.0.2.9"),
                delay: Duration::ZERO,
                affected: true,
                calls: Arc::clone(&calls),
            })
        };

        let chain = DiscoveryChain::new(vec![plain_http()]);
        assert_eq!(chain.discover(false).await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let found = chain.discover(true).await.unwrap();
        assert_eq!(found.address, Ipv4Addr::new(192, 0, 2, 9));
    }

    #[tokio::test]
    async fn empty_chain_finds_nothing() {
        let chain = DiscoveryChain::new(Vec::new());
        assert!(chain.is_empty());
        assert_eq!(chain.discover(true).await, None);
    }
}
