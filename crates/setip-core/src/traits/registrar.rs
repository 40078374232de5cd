// # Registrar Trait
//
// Defines the interface for registering an address against a name with the
// remote directory service.
//
// ## Implementations
//
// - HTTP: `setip-registrar-http` crate
//
// ## Usage
//
// ```rust,ignore
// use setip_core::traits::{Registrar, RegistrationRequest};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let registrar = /* Registrar implementation */;
//
//     let request = RegistrationRequest::new("web", "prod", "203.0.113.7".parse()?, token)?;
//     let outcome = registrar.register(&request).await?;
//     if !outcome.is_success() {
//         eprintln!("{}", outcome.diagnostic());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use crate::config::missing_credential_fields;
use std::fmt;
use std::net::Ipv4Addr;

/// One registration call's input
///
/// All four fields are mandatory. The token is never shown in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Subject name to register
    pub name: String,
    /// Label attached to the registration
    pub label: String,
    /// Address being registered
    pub address: Ipv4Addr,
    /// Bearer token
    /// ⚠️ NEVER log this value
    pub token: String,
}

impl RegistrationRequest {
    /// Build a request, refusing empty fields
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        address: Ipv4Addr,
        token: impl Into<String>,
    ) -> Result<Self, crate::Error> {
        let request = Self {
            name: name.into(),
            label: label.into(),
            address,
            token: token.into(),
        };

        let missing = missing_credential_fields(&request.name, &request.label, &request.token);
        if !missing.is_empty() {
            return Err(crate::Error::missing_credentials(missing.join(", ")));
        }

        Ok(request)
    }

    /// The JSON body sent to the directory service
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "label": self.label,
            "ipAddress": self.address.to_string(),
        })
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("address", &self.address)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// What the directory service answered
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistrationOutcome {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
}

impl RegistrationOutcome {
    /// Create an outcome
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The only success predicate: exactly HTTP 200
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Body rendered for an operator
    ///
    /// Pretty-printed when it is JSON, otherwise the trimmed raw text.
    pub fn diagnostic(&self) -> String {
        match serde_json::from_str::<serde_json::Value>(&self.body) {
            Ok(value) => serde_json::to_string_pretty(&value)
                .unwrap_or_else(|_| self.body.trim().to_string()),
            Err(_) => self.body.trim().to_string(),
        }
    }
}

/// Trait for registrar implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ One HTTP exchange with the configured endpoint
/// - ✅ Return whatever status and body came back
///
/// ## Forbidden Capabilities
/// - ❌ Retry (registration is not assumed safe to repeat blindly)
/// - ❌ Decide success; classification is [`RegistrationOutcome::is_success`]
/// - ❌ Log the token
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Perform one registration exchange
    ///
    /// # Returns
    ///
    /// - `Ok(RegistrationOutcome)`: Any HTTP response, successful or not
    /// - `Err(Error)`: No response was obtained (transport failure, timeout)
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationOutcome, crate::Error>;

    /// Registrar name for logging
    fn registrar_name(&self) -> &'static str;
}

/// Helper trait for constructing registrars from configuration
pub trait RegistrarFactory: Send + Sync {
    /// Create a Registrar instance from configuration
    fn create(
        &self,
        endpoint: &str,
        config: &crate::config::RegistrarConfig,
    ) -> Result<Box<dyn Registrar>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Ipv4Addr {
        Ipv4Addr::new(203, 0, 113, 7)
    }

    #[test]
    fn only_200_is_success() {
        assert!(RegistrationOutcome::new(200, "").is_success());
        assert!(!RegistrationOutcome::new(201, "").is_success());
        assert!(!RegistrationOutcome::new(204, "").is_success());
        assert!(!RegistrationOutcome::new(500, "").is_success());
    }

    #[test]
    fn diagnostic_pretty_prints_json() {
        let outcome = RegistrationOutcome::new(400, r#"{"error":"bad label"}"#);
        assert_eq!(outcome.diagnostic(), "{\n  \"error\": \"bad label\"\n}");
    }

    #[test]
    fn diagnostic_falls_back_to_raw_text() {
        let outcome = RegistrationOutcome::new(502, "  Bad Gateway\n");
        assert_eq!(outcome.diagnostic(), "Bad Gateway");
    }

    #[test]
    fn empty_fields_are_missing_credentials() {
        let err = RegistrationRequest::new("web", "", address(), " ").unwrap_err();
        match err {
            crate::Error::MissingCredentials(fields) => assert_eq!(fields, "label, token"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn request_and_credentials_agree_on_missing_fields() {
        let creds = crate::config::Credentials::new(" ", "prod", "");
        let err = RegistrationRequest::new(&creds.name, &creds.label, address(), &creds.token).unwrap_err();
        match err {
            crate::Error::MissingCredentials(fields) => assert_eq!(fields, creds.missing_fields().join(", ")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn payload_uses_ip_address_key() {
        let request = RegistrationRequest::new("web", "prod", address(), "t0k3n").unwrap();
        assert_eq!(
            request.payload(),
            serde_json::json!({"name": "web", "label": "prod", "ipAddress": "203.0.113.7"})
        );
    }

    #[test]
    fn token_not_exposed_in_debug() {
        let request = RegistrationRequest::new("web", "prod", address(), "secret_token_12345").unwrap();
        let debug_str = format!("{:?}", request);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("RegistrationRequest"));
    }
}
