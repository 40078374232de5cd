//! Test doubles and common utilities for contract tests
//!
//! The doubles count their calls so tests can assert what the orchestrator
//! did NOT do as well as what it did.

#![allow(dead_code)]

use setip_core::config::{Credentials, NatConfig, SetipConfig};
use setip_core::engine::RunEvent;
use setip_core::error::Result;
use setip_core::traits::{AddressSource, Registrar, RegistrationOutcome, RegistrationRequest};
use setip_core::{Error, MemoryNatTable, Orchestrator, RedirectRule, RunState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// What a scripted source does when fetched
#[derive(Clone)]
pub enum Reply {
    /// Return this body
    Body(&'static str),
    /// Fail with a transport-style error
    Fail,
    /// Never answer within the source's timeout
    Hang,
}

/// An AddressSource that follows a script and counts fetches
pub struct ScriptedSource {
    name: &'static str,
    reply: Reply,
    affected: bool,
    calls: Arc<AtomicUsize>,
    watch: Option<(MemoryNatTable, Arc<Mutex<Vec<usize>>>)>,
}

impl ScriptedSource {
    pub fn new(name: &'static str, reply: Reply) -> Self {
        Self {
            name,
            reply,
            affected: false,
            calls: Arc::new(AtomicUsize::new(0)),
            watch: None,
        }
    }

    /// Record how many redirect rules the table holds at each fetch
    pub fn watching(mut self, table: &MemoryNatTable) -> (Self, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        self.watch = Some((table.clone(), Arc::clone(&seen)));
        (self, seen)
    }

    /// Mark the source as rewritten by the port-80 redirect
    pub fn affected_by_redirect(mut self) -> Self {
        self.affected = true;
        self
    }

    /// Shared fetch counter, still readable after the source is boxed
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn boxed(self) -> Box<dyn AddressSource> {
        Box::new(self)
    }
}

#[async_trait::async_trait]
impl AddressSource for ScriptedSource {
    async fn fetch(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((table, seen)) = &self.watch {
            let live = table
                .rules()
                .iter()
                .filter(|r| RedirectRule::defaults().contains(r))
                .count();
            seen.lock().unwrap().push(live);
        }
        match self.reply {
            Reply::Body(body) => Ok(body.to_string()),
            Reply::Fail => Err(Error::ip_source(format!("{} unreachable", self.name))),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::ip_source("unreachable"))
            }
        }
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

/// What a scripted registrar answers
#[derive(Clone)]
pub enum Answer {
    /// HTTP response with this status and body
    Status(u16, &'static str),
    /// No response at all
    TransportError,
    /// Never answer
    Hang,
}

/// A Registrar that follows a script and records every request
#[derive(Clone)]
pub struct ScriptedRegistrar {
    answer: Answer,
    requests: Arc<Mutex<Vec<RegistrationRequest>>>,
}

impl ScriptedRegistrar {
    pub fn new(answer: Answer) -> Self {
        Self {
            answer,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RegistrationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Registrar for ScriptedRegistrar {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        match self.answer {
            Answer::Status(status, body) => Ok(RegistrationOutcome::new(status, body)),
            Answer::TransportError => Err(Error::registrar("connection reset by peer")),
            Answer::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::registrar("unreachable"))
            }
        }
    }

    fn registrar_name(&self) -> &'static str {
        "scripted"
    }
}

/// A complete configuration that never touches the host
pub fn test_config() -> SetipConfig {
    let mut config = SetipConfig::new("https://directory.example.net")
        .with_credentials(Credentials::new("web-01", "prod", "t0k3n"));
    config.nat = NatConfig::Memory;
    config
}

/// Build an orchestrator, panicking on invalid configuration
pub fn orchestrator(
    table: &setip_core::MemoryNatTable,
    sources: Vec<Box<dyn AddressSource>>,
    registrar: &ScriptedRegistrar,
    config: &SetipConfig,
) -> (Orchestrator, mpsc::Receiver<RunEvent>) {
    Orchestrator::new(
        Box::new(table.clone()),
        setip_core::DiscoveryChain::new(sources),
        Box::new(registrar.clone()),
        config,
    )
    .expect("orchestrator construction succeeds")
}

/// Drain every event once the orchestrator has been dropped
pub async fn collect_events(rx: mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    ReceiverStream::new(rx).collect().await
}

/// The `to` side of every state transition, in order
pub fn transitions(events: &[RunEvent]) -> Vec<RunState> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}
