// # HTTP Registrar
//
// This crate registers an address with the directory service over HTTP(S).
//
// ## Wire Format
//
// ```http
// POST {endpoint}/setip
// Authorization: Bearer <token>
// Content-Type: application/json
//
// {"name": "...", "label": "...", "ipAddress": "203.0.113.7"}
// ```
//
// Exactly HTTP 200 is success. Every other status is still a response: it is
// returned as a `RegistrationOutcome` with the body, and classification is
// left to the caller.
//
// ## Trust Level: Untrusted
//
// - ✅ One POST per call, bounded by the configured timeout
// - ❌ NO retry logic (a repeated registration is not assumed harmless)
// - ❌ NO status interpretation beyond reading it
//
// ## Security Requirements
//
// - The bearer token NEVER appears in logs or `Debug` output
// - The endpoint is logged, the token is not

use async_trait::async_trait;
use setip_core::ComponentRegistry;
use setip_core::config::RegistrarConfig;
use setip_core::traits::{Registrar, RegistrarFactory, RegistrationOutcome, RegistrationRequest};
use setip_core::{Error, Result};
use std::time::Duration;

/// Path appended to the endpoint
const REGISTRATION_PATH: &str = "/setip";

/// Directory service client
pub struct HttpRegistrar {
    /// Base URL without trailing slash
    endpoint: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    timeout: Duration,
}

// Custom Debug implementation kept free of request data
impl std::fmt::Debug for HttpRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistrar")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRegistrar {
    /// Create a new registrar
    ///
    /// # Parameters
    ///
    /// - `endpoint`: Base URL of the directory service; a trailing slash is
    ///   ignored
    /// - `timeout`: Bound for the whole exchange
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(Error::config("Registrar endpoint cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            client,
            timeout,
        })
    }

    /// Full registration URL
    pub fn registration_url(&self) -> String {
        format!("{}{}", self.endpoint, REGISTRATION_PATH)
    }
}

#[async_trait]
impl Registrar for HttpRegistrar {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome> {
        let url = self.registration_url();
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&request.token)
            .json(&request.payload())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::registrar(format!("No response from {} within {:?}", url, self.timeout))
                } else {
                    Error::registrar(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        tracing::debug!("Directory service answered HTTP {}", status);
        Ok(RegistrationOutcome::new(status, body))
    }

    fn registrar_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating HTTP registrars
pub struct HttpRegistrarFactory;

impl RegistrarFactory for HttpRegistrarFactory {
    fn create(&self, endpoint: &str, config: &RegistrarConfig) -> Result<Box<dyn Registrar>> {
        match config {
            RegistrarConfig::Http { timeout_secs } => Ok(Box::new(HttpRegistrar::new(
                endpoint,
                Duration::from_secs(*timeout_secs),
            )?)),
        }
    }
}

/// Register the HTTP registrar with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_registrar("http", Box::new(HttpRegistrarFactory));
}
