// # setip
//
// Registers this host's external IPv4 address with the directory service.
//
// This binary is a THIN integration layer: it reads the environment, wires
// the components together and maps the run report to an exit code. The
// suspend/discover/register/restore logic lives in setip-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Directory service
// - `SETIP_ENDPOINT`: Base URL (required); `/setip` is appended
// - `SETIP_NAME`, `SETIP_LABEL`, `SETIP_TOKEN`: Registration credentials
// - `SETIP_PROMPT`: `1` to prompt for missing credentials on a terminal
//
// ### Discovery
// - `SETIP_METADATA_URL`: Instance-metadata URL; empty disables it
// - `SETIP_SOURCES`: Comma-separated echo-service URLs replacing the defaults
//
// ### NAT
// - `SETIP_IPTABLES`: iptables binary (default `iptables`; `<binary>-save`
//   is used for persistence)
// - `SETIP_RULES_FILE`: Saved rule set (default `/etc/iptables/rules.v4`);
//   empty disables persistence
// - `SETIP_LOCK_PATH`: Host-local lock file held for the whole run
//
// ### Logging
// - `SETIP_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export SETIP_ENDPOINT=https://directory.example.net
// export SETIP_NAME=web-01
// export SETIP_LABEL=prod
// export SETIP_TOKEN=your_token
//
// sudo -E setip
// ```

use anyhow::Result;
use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use setip_core::config::{AddressSourceConfig, Credentials, DEFAULT_METADATA_URL, NatConfig, SetipConfig};
use setip_core::{ComponentRegistry, DiscoveryChain, Orchestrator};

const DEFAULT_RULES_FILE: &str = "/etc/iptables/rules.v4";

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetipExitCode {
    /// Registered and redirect state restored
    Success = 0,
    /// Anything else, including configuration errors
    Failure = 1,
}

impl From<SetipExitCode> for ExitCode {
    fn from(code: SetipExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    endpoint: String,
    credentials: Credentials,
    prompt: bool,
    metadata_url: Option<String>,
    sources: Option<Vec<String>>,
    iptables: String,
    rules_file: Option<PathBuf>,
    lock_path: Option<PathBuf>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup("SETIP_ENDPOINT").filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            anyhow::anyhow!(
                "SETIP_ENDPOINT is required. \
                Set it via: export SETIP_ENDPOINT=https://directory.example.net"
            )
        })?;

        Ok(Self {
            endpoint: endpoint.trim().to_string(),
            // Missing credentials pass through empty; the run reports them
            credentials: Credentials::new(
                lookup("SETIP_NAME").unwrap_or_default(),
                lookup("SETIP_LABEL").unwrap_or_default(),
                lookup("SETIP_TOKEN").unwrap_or_default(),
            ),
            prompt: lookup("SETIP_PROMPT").is_some_and(|v| v.trim() == "1"),
            metadata_url: match lookup("SETIP_METADATA_URL") {
                Some(url) if url.trim().is_empty() => None,
                Some(url) => Some(url.trim().to_string()),
                None => Some(DEFAULT_METADATA_URL.to_string()),
            },
            sources: lookup("SETIP_SOURCES").map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            iptables: lookup("SETIP_IPTABLES")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "iptables".to_string()),
            rules_file: match lookup("SETIP_RULES_FILE") {
                Some(path) if path.trim().is_empty() => None,
                Some(path) => Some(PathBuf::from(path.trim())),
                None => Some(PathBuf::from(DEFAULT_RULES_FILE)),
            },
            lock_path: lookup("SETIP_LOCK_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            log_level: lookup("SETIP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate what the environment can get wrong before anything runs
    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "SETIP_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if self.metadata_url.is_none() && self.sources.as_ref().is_some_and(|s| s.is_empty()) {
            anyhow::bail!("SETIP_SOURCES is empty and SETIP_METADATA_URL disables metadata; no address source left");
        }

        Ok(())
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Address sources in discovery order
    fn address_sources(&self) -> Vec<AddressSourceConfig> {
        let mut sources: Vec<AddressSourceConfig> = match &self.metadata_url {
            Some(url) => vec![AddressSourceConfig::Metadata {
                url: url.clone(),
                timeout_secs: 2,
            }],
            None => Vec::new(),
        };

        match &self.sources {
            Some(urls) => sources.extend(
                urls.iter()
                    .map(|url| AddressSourceConfig::http(source_name(url), url.clone())),
            ),
            None => sources.extend(
                AddressSourceConfig::defaults()
                    .into_iter()
                    .filter(|s| !matches!(s, AddressSourceConfig::Metadata { .. })),
            ),
        }

        sources
    }

    /// Build the core configuration
    fn to_setip_config(&self) -> SetipConfig {
        let mut config = SetipConfig::new(self.endpoint.clone()).with_credentials(self.credentials.clone());
        config.sources = self.address_sources();
        config.nat = NatConfig::Iptables {
            binary: self.iptables.clone(),
            save_binary: format!("{}-save", self.iptables),
            rules_file: self.rules_file.clone(),
        };
        config.engine.lock_path = self.lock_path.clone();
        config
    }
}

/// Log-friendly name for an echo-service URL: its host
fn source_name(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?', ':']).next().unwrap_or(rest).to_string()
}

/// Ask for every empty credential field on an interactive terminal
fn prompt_for_missing(credentials: &mut Credentials) -> io::Result<()> {
    if !io::stdin().is_terminal() {
        return Ok(());
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut stderr = io::stderr();

    for (label, field) in [
        ("Name", &mut credentials.name),
        ("Label", &mut credentials.label),
        ("Token", &mut credentials.token),
    ] {
        if !field.trim().is_empty() {
            continue;
        }
        write!(stderr, "{}: ", label)?;
        stderr.flush()?;
        if let Some(line) = lines.next() {
            *field = line?.trim().to_string();
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    // Load configuration from environment
    let mut config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return SetipExitCode::Failure.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return SetipExitCode::Failure.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_writer(io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SetipExitCode::Failure.into();
    }

    if config.prompt
        && let Err(e) = prompt_for_missing(&mut config.credentials)
    {
        error!("Failed to read credentials: {}", e);
        return SetipExitCode::Failure.into();
    }

    // One sequential pass; no worker threads needed
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SetipExitCode::Failure.into();
        }
    };

    let code = rt.block_on(async {
        match run(&config).await {
            Ok(code) => code,
            Err(e) => {
                error!("setip error: {}", e);
                SetipExitCode::Failure
            }
        }
    });

    code.into()
}

/// Wire the components and run once
async fn run(config: &Config) -> Result<SetipExitCode> {
    let registry = ComponentRegistry::with_builtins();

    #[cfg(feature = "iptables")]
    setip_nat_iptables::register(&registry);

    #[cfg(feature = "http-sources")]
    setip_ip_http::register(&registry);

    setip_registrar_http::register(&registry);

    let setip_config = config.to_setip_config();

    let nat = registry.create_nat_table(&setip_config.nat)?;
    let sources = registry.create_address_sources(&setip_config.sources)?;
    let registrar = registry.create_registrar(&setip_config.endpoint, &setip_config.registrar)?;

    info!(
        "Starting setip: {} source(s), {} backend, endpoint {}",
        sources.len(),
        nat.backend_name(),
        setip_config.endpoint
    );

    let (orchestrator, _events) = Orchestrator::new(nat, DiscoveryChain::new(sources), registrar, &setip_config)?;
    let report = orchestrator.run().await;

    info!("Run summary: {}", serde_json::to_string(&report.summary())?);

    if report.is_success() {
        if let Some(address) = report.address {
            println!("{}", address);
        }
        Ok(SetipExitCode::Success)
    } else {
        if let Some(e) = &report.error {
            eprintln!("setip failed: {}", e);
        }
        for rule in &report.restoration_failures {
            eprintln!("Redirect NOT restored, reinstall manually: {}", rule);
        }
        Ok(SetipExitCode::Failure)
    }
}
