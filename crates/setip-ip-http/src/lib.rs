// # HTTP Address Sources
//
// This crate provides HTTP-based address sources for the setip system.
//
// ## Sources
//
// - [`HttpAddressSource`]: plain-text IP-echo services (ipify, checkip,
//   ifconfig.me). The response body is the caller's address.
// - [`MetadataAddressSource`]: the cloud instance-metadata service on the
//   link-local address, which knows the public address without leaving the
//   host's network.
//
// ## Port-80 Redirect
//
// An `http://` echo service on port 80 is exactly what the host's own
// redirect rewrites, so such sources report `affected_by_redirect()` and the
// discovery chain only consults them once the redirect is out of the way.
//
// Neither source validates the address; the chain does that for every
// source alike.

mod metadata;

pub use metadata::{MetadataAddressSource, TOKEN_HEADER, TOKEN_TTL_HEADER};

use setip_core::ComponentRegistry;
use setip_core::config::AddressSourceConfig;
use setip_core::traits::{AddressSource, AddressSourceFactory};
use setip_core::{Error, Result};

use std::time::Duration;

/// Plain-text IP-echo service
pub struct HttpAddressSource {
    /// Name used in logs
    name: String,

    /// URL returning the caller's address
    url: String,

    /// Per-attempt bound
    timeout: Duration,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpAddressSource {
    /// Create a new echo source
    ///
    /// # Parameters
    ///
    /// - `name`: Name used in logs (e.g., "ipify")
    /// - `url`: URL to fetch the address from (e.g., "https://api.ipify.org")
    /// - `timeout`: Upper bound for one fetch
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            timeout,
            client,
        })
    }

    /// URL this source queries
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl AddressSource for HttpAddressSource {
    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::ip_source(format!("{}: request failed: {}", self.name, e)))?;

        if !response.status().is_success() {
            return Err(Error::ip_source(format!(
                "{}: HTTP error: {}",
                self.name,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::ip_source(format!("{}: failed to read response: {}", self.name, e)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn affected_by_redirect(&self) -> bool {
        self.url.starts_with("http://")
    }
}

/// Factory for creating echo sources
pub struct HttpFactory;

impl AddressSourceFactory for HttpFactory {
    fn create(&self, config: &AddressSourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            AddressSourceConfig::Http {
                name,
                url,
                timeout_secs,
            } => Ok(Box::new(HttpAddressSource::new(
                name.clone(),
                url.clone(),
                Duration::from_secs(*timeout_secs),
            )?)),
            _ => Err(Error::config("Invalid config for HTTP address source")),
        }
    }
}

/// Factory for creating instance-metadata sources
pub struct MetadataFactory;

impl AddressSourceFactory for MetadataFactory {
    fn create(&self, config: &AddressSourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            AddressSourceConfig::Metadata { url, timeout_secs } => Ok(Box::new(
                MetadataAddressSource::new(url.clone(), Duration::from_secs(*timeout_secs))?,
            )),
            _ => Err(Error::config("Invalid config for metadata address source")),
        }
    }
}

/// Register both address source types with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_address_source("http", Box::new(HttpFactory));
    registry.register_address_source("metadata", Box::new(MetadataFactory));
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_factory_creation() {
        let factory = HttpFactory;
        let config = AddressSourceConfig::http("ipify", "https://api.ipify.org");

        let source = assert_ok!(factory.create(&config));
        assert_eq!(source.name(), "ipify");
        assert_eq!(source.timeout(), Duration::from_secs(5));
        assert!(!source.affected_by_redirect());
    }

    #[test]
    fn plain_http_echo_is_affected_by_redirect() {
        let source = assert_ok!(HttpAddressSource::new("ifconfig-me", "http://ifconfig.me/ip", Duration::from_secs(5)));
        assert!(source.affected_by_redirect());
    }

    #[test]
    fn factory_rejects_other_config() {
        let config = AddressSourceConfig::Metadata {
            url: setip_core::config::DEFAULT_METADATA_URL.to_string(),
            timeout_secs: 2,
        };
        assert!(HttpFactory.create(&config).is_err());
    }

    #[tokio::test]
    async fn fetch_returns_body_untouched() {
        let (base, _) = test_server::serve(|_| (200, "203.0.113.7\n".to_string())).await;
        let source = assert_ok!(HttpAddressSource::new("echo", format!("{}/ip", base), Duration::from_secs(2)));

        assert_eq!(assert_ok!(source.fetch().await), "203.0.113.7\n");
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let (base, _) = test_server::serve(|_| (503, "busy".to_string())).await;
        let source = assert_ok!(HttpAddressSource::new("echo", base, Duration::from_secs(2)));

        let err = assert_err!(source.fetch().await);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn register_adds_both_types() {
        let registry = ComponentRegistry::new();
        register(&registry);
        assert!(registry.has_address_source("http"));
        assert!(registry.has_address_source("metadata"));

        let sources = assert_ok!(registry.create_address_sources(&AddressSourceConfig::defaults()));
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["metadata", "ipify", "aws-checkip", "ifconfig-me"]);
    }
}
