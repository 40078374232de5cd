// # Instance Metadata Source
//
// Reads the public IPv4 address from the cloud instance-metadata service.
//
// The service accepts session-token requests (IMDSv2): a PUT to
// `/latest/api/token` yields a token that is sent back on the GET. Hosts
// that only speak IMDSv1 reject or ignore the PUT, in which case the GET is
// sent without a token.

use setip_core::traits::AddressSource;
use setip_core::{Error, Result};

use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Header carrying the session token on metadata reads
pub const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Header requesting a session token lifetime
pub const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

const TOKEN_PATH: &str = "/latest/api/token";
const TOKEN_TTL_SECS: &str = "60";

/// Instance-metadata address source
pub struct MetadataAddressSource {
    url: Url,
    token_url: Url,
    timeout: Duration,
    client: reqwest::Client,
}

impl MetadataAddressSource {
    /// Create a metadata source for the given public-ipv4 URL
    pub fn new(url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| Error::config(format!("Invalid metadata URL {}: {}", url.as_ref(), e)))?;
        let token_url = url
            .join(TOKEN_PATH)
            .map_err(|e| Error::config(format!("Invalid metadata URL {}: {}", url, e)))?;

        // Never route link-local metadata traffic through a proxy
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            token_url,
            timeout,
            client,
        })
    }

    /// Request an IMDSv2 session token; `None` means fall back to IMDSv1
    async fn session_token(&self) -> Option<String> {
        let response = match self
            .client
            .put(self.token_url.clone())
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Metadata token request failed, using IMDSv1: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                "Metadata token request returned {}, using IMDSv1",
                response.status()
            );
            return None;
        }

        match response.text().await {
            Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl AddressSource for MetadataAddressSource {
    async fn fetch(&self) -> Result<String> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = self.session_token().await {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ip_source(format!("metadata: request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ip_source(format!(
                "metadata: HTTP error: {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::ip_source(format!("metadata: failed to read response: {}", e)))
    }

    fn name(&self) -> &str {
        "metadata"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
