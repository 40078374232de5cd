//! Configuration types for the setip system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::rule::RedirectRule;

/// Instance-metadata endpoint for the public IPv4 address
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/public-ipv4";

/// Main setip configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetipConfig {
    /// Base URL of the directory service (`/setip` is appended)
    pub endpoint: String,

    /// Registration credentials
    #[serde(default)]
    pub credentials: Credentials,

    /// Redirect rules to suspend during discovery
    #[serde(default = "RedirectRule::defaults")]
    pub rules: Vec<RedirectRule>,

    /// Address sources, in the order they are tried
    #[serde(default = "AddressSourceConfig::defaults")]
    pub sources: Vec<AddressSourceConfig>,

    /// NAT backend
    #[serde(default)]
    pub nat: NatConfig,

    /// Registration client
    #[serde(default)]
    pub registrar: RegistrarConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SetipConfig {
    /// Create a configuration with the reference rules and sources
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: Credentials::default(),
            rules: RedirectRule::defaults(),
            sources: AddressSourceConfig::defaults(),
            nat: NatConfig::default(),
            registrar: RegistrarConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Set the credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Validate the configuration
    ///
    /// Credentials are deliberately not checked here: their absence is
    /// reported by the orchestrator's validation step so the run report
    /// carries it.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "Endpoint must use HTTP or HTTPS scheme. Got: {}",
                self.endpoint
            )));
        }

        if self.sources.is_empty() {
            return Err(crate::Error::config("No address sources configured"));
        }

        for source in &self.sources {
            source.validate()?;
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule) {
                return Err(crate::Error::config(format!("Duplicate redirect rule: {}", rule)));
            }
        }

        self.registrar.validate()?;

        if self.engine.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }
}

/// Name, label and bearer token for registration
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Subject name
    #[serde(default)]
    pub name: String,
    /// Label
    #[serde(default)]
    pub label: String,
    /// Bearer token
    /// ⚠️ NEVER log this value
    #[serde(default)]
    pub token: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(name: impl Into<String>, label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            token: token.into(),
        }
    }

    /// Names of the fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        missing_credential_fields(&self.name, &self.label, &self.token)
    }
}

/// Names of the blank fields among name, label and token, in that order
pub(crate) fn missing_credential_fields(name: &str, label: &str, token: &str) -> Vec<&'static str> {
    [("name", name), ("label", label), ("token", token)]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
}

// Custom Debug implementation that hides the token
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// Address source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressSourceConfig {
    /// Cloud instance-metadata service
    Metadata {
        /// Metadata URL returning the public IPv4 address
        url: String,
        /// Per-attempt timeout in seconds
        #[serde(default = "default_metadata_timeout_secs")]
        timeout_secs: u64,
    },

    /// Plain-text IP-echo service
    Http {
        /// Name used in logs
        name: String,
        /// URL returning the caller's address as text
        url: String,
        /// Per-attempt timeout in seconds
        #[serde(default = "default_echo_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom address source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl AddressSourceConfig {
    /// Reference ordering: metadata, two HTTPS echo services, one HTTP echo
    /// service as last resort
    pub fn defaults() -> Vec<Self> {
        vec![
            AddressSourceConfig::Metadata {
                url: DEFAULT_METADATA_URL.to_string(),
                timeout_secs: default_metadata_timeout_secs(),
            },
            AddressSourceConfig::http("ipify", "https://api.ipify.org"),
            AddressSourceConfig::http("aws-checkip", "https://checkip.amazonaws.com"),
            AddressSourceConfig::http("ifconfig-me", "http://ifconfig.me/ip"),
        ]
    }

    /// An echo service with the default timeout
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        AddressSourceConfig::Http {
            name: name.into(),
            url: url.into(),
            timeout_secs: default_echo_timeout_secs(),
        }
    }

    /// Get the factory name for this source
    pub fn type_name(&self) -> &str {
        match self {
            AddressSourceConfig::Metadata { .. } => "metadata",
            AddressSourceConfig::Http { .. } => "http",
            AddressSourceConfig::Custom { factory, .. } => factory,
        }
    }

    /// Validate the address source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            AddressSourceConfig::Metadata { url, timeout_secs }
            | AddressSourceConfig::Http { url, timeout_secs, .. } => {
                if url.is_empty() {
                    return Err(crate::Error::config("Address source URL cannot be empty"));
                }
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "Address source URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Address source timeout must be > 0"));
                }
                Ok(())
            }
            AddressSourceConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom address source factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom address source config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn default_metadata_timeout_secs() -> u64 {
    2
}

fn default_echo_timeout_secs() -> u64 {
    5
}

/// NAT backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NatConfig {
    /// iptables command-line backend
    Iptables {
        /// iptables binary
        #[serde(default = "default_iptables_binary")]
        binary: String,
        /// iptables-save binary
        #[serde(default = "default_iptables_save_binary")]
        save_binary: String,
        /// Where the saved rule set is written (e.g. /etc/iptables/rules.v4)
        #[serde(default)]
        rules_file: Option<PathBuf>,
    },

    /// In-memory table (dry runs)
    Memory,
}

impl NatConfig {
    /// Get the factory name for this backend
    pub fn type_name(&self) -> &str {
        match self {
            NatConfig::Iptables { .. } => "iptables",
            NatConfig::Memory => "memory",
        }
    }

    /// Rule set file for persistence, if any
    pub fn rules_file(&self) -> Option<&PathBuf> {
        match self {
            NatConfig::Iptables { rules_file, .. } => rules_file.as_ref(),
            NatConfig::Memory => None,
        }
    }
}

impl Default for NatConfig {
    fn default() -> Self {
        NatConfig::Iptables {
            binary: default_iptables_binary(),
            save_binary: default_iptables_save_binary(),
            rules_file: Some(PathBuf::from("/etc/iptables/rules.v4")),
        }
    }
}

fn default_iptables_binary() -> String {
    "iptables".to_string()
}

fn default_iptables_save_binary() -> String {
    "iptables-save".to_string()
}

/// Registration client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrarConfig {
    /// JSON over HTTP(S)
    Http {
        /// Request timeout in seconds
        #[serde(default = "default_registrar_timeout_secs")]
        timeout_secs: u64,
    },
}

impl RegistrarConfig {
    /// Get the factory name for this registrar
    pub fn type_name(&self) -> &str {
        match self {
            RegistrarConfig::Http { .. } => "http",
        }
    }

    /// Validate the registrar configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            RegistrarConfig::Http { timeout_secs } => {
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Registrar timeout must be > 0"));
                }
                Ok(())
            }
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        RegistrarConfig::Http {
            timeout_secs: default_registrar_timeout_secs(),
        }
    }
}

fn default_registrar_timeout_secs() -> u64 {
    10
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Host-local lock file held for the whole run
    ///
    /// Two runs against the same host would race on the NAT table between
    /// suspension and restoration. When set, a second run aborts instead.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    /// Capacity of the run event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 64 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_path: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    64
}
