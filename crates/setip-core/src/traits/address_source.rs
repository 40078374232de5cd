// # Address Source Trait
//
// Defines the interface for one place the host can learn its external
// IPv4 address from.
//
// ## Implementations
//
// - IP-echo services and instance metadata: `setip-ip-http` crate
//
// Sources are composed into an ordered [`crate::discovery::DiscoveryChain`].

use async_trait::async_trait;
use std::time::Duration;

/// Trait for address source implementations
///
/// A source produces one raw candidate string per call. It does not validate
/// the candidate's format; the discovery chain does that, so every source is
/// held to the same grammar.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ One network request (or a short fixed sequence, e.g. token then fetch)
/// - ✅ Return the response body as-is
///
/// ## Forbidden Capabilities
/// - ❌ Retry or fall back to another service (owned by `DiscoveryChain`)
/// - ❌ Touch NAT state
/// - ❌ Cache addresses between calls
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Fetch one raw candidate address
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The response body, untrimmed and unvalidated
    /// - `Err(Error)`: Transport or HTTP status failure
    async fn fetch(&self) -> Result<String, crate::Error>;

    /// Source name for logging
    fn name(&self) -> &str;

    /// Upper bound for one `fetch`, enforced by the chain
    fn timeout(&self) -> Duration;

    /// Whether the host's own port-80 redirect would rewrite this source's
    /// traffic
    ///
    /// Such sources are only consulted once the redirect is known to be
    /// out of the way.
    fn affected_by_redirect(&self) -> bool {
        false
    }
}

/// Helper trait for constructing address sources from configuration
pub trait AddressSourceFactory: Send + Sync {
    /// Create an AddressSource instance from configuration
    fn create(
        &self,
        config: &crate::config::AddressSourceConfig,
    ) -> Result<Box<dyn AddressSource>, crate::Error>;
}
