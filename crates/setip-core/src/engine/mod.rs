//! Registration orchestrator
//!
//! The Orchestrator is responsible for:
//! - Refusing to start without credentials
//! - Snapshotting the redirect rules and suspending the present ones
//! - Discovering the external address and registering it
//! - Restoring the redirect rules on every path out of the suspended window
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ Orchestrator │
//!                      └──────────────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//! ┌──────────────┐   ┌────────────────┐   ┌─────────────┐
//! │  NatTable    │   │ DiscoveryChain │   │  Registrar  │
//! │ (snapshot,   │   │ (ordered       │   │ (one POST)  │
//! │  suspend,    │   │  sources)      │   │             │
//! │  restore)    │   │                │   │             │
//! └──────────────┘   └────────────────┘   └─────────────┘
//! ```
//!
//! ## Run Flow
//!
//! 1. Validate credentials (nothing touched on failure)
//! 2. Capture the redirect snapshot
//! 3. Suspend present rules (skipped when none are present)
//! 4. Discover the address, then register it
//! 5. Restore suspended rules, then persist the rule set (best effort)
//! 6. Report

pub mod events;
pub mod guard;
pub mod lock;
pub mod report;
pub mod shutdown;

pub use events::{EventSink, RunEvent, RunState};
pub use guard::SuspendedRedirect;
pub use lock::RunLock;
pub use report::RunReport;
pub use shutdown::ShutdownListener;

use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{Credentials, SetipConfig};
use crate::discovery::DiscoveryChain;
use crate::error::{Error, Result};
use crate::nat::{RedirectToggle, RuleSetFile};
use crate::rule::{RedirectRule, RedirectSnapshot};
use crate::traits::{NatTable, Registrar, RegistrationRequest};
use events::RunContext;

/// Core setip orchestrator
///
/// One call to [`Orchestrator::run`] is one pass through the state machine.
/// The orchestrator owns its collaborators and can be run again; every run
/// re-reads the live NAT table rather than trusting anything remembered.
///
/// ## Threading
///
/// A run is strictly sequential. Sources are never raced, and the NAT table
/// is touched from a single task.
pub struct Orchestrator {
    /// NAT backend, the only source of truth for redirect state
    nat: Box<dyn NatTable>,

    /// Ordered address sources
    discovery: DiscoveryChain,

    /// Directory service client
    registrar: Box<dyn Registrar>,

    credentials: Credentials,

    /// Rules of interest for the snapshot
    rules: Vec<RedirectRule>,

    /// Durable copy of the rule set, written after restoration
    rules_file: Option<RuleSetFile>,

    /// Host-local lock held for the whole run
    lock_path: Option<PathBuf>,

    events: EventSink,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver yields
    /// run events
    pub fn new(
        nat: Box<dyn NatTable>,
        discovery: DiscoveryChain,
        registrar: Box<dyn Registrar>,
        config: &SetipConfig,
    ) -> Result<(Self, mpsc::Receiver<RunEvent>)> {
        config.validate()?;

        let (events, rx) = EventSink::channel(config.engine.event_channel_capacity);

        let orchestrator = Self {
            nat,
            discovery,
            registrar,
            credentials: config.credentials.clone(),
            rules: config.rules.clone(),
            rules_file: config.nat.rules_file().map(RuleSetFile::new),
            lock_path: config.engine.lock_path.clone(),
            events,
        };

        Ok((orchestrator, rx))
    }

    /// Run once, restoring redirect state before returning
    ///
    /// SIGINT and SIGTERM are caught from the moment the redirect is first
    /// inspected. A signal during discovery or registration cancels the
    /// pending call; one that arrives while rules are being removed takes
    /// effect once removal is done. Restoration always runs and the report
    /// carries [`Error::Interrupted`].
    pub async fn run(&self) -> RunReport {
        self.run_internal(None).await
    }

    /// Test-only helper to run with a controlled shutdown signal
    ///
    /// **TESTING ONLY**: Production code should use `run()`, which listens
    /// for SIGINT and SIGTERM instead. `None` behaves like `run()`.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> RunReport {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> RunReport {
        let mut report = RunReport::new();
        let mut ctx = RunContext::new(&self.events);

        ctx.enter(RunState::Validating);
        let missing = self.credentials.missing_fields();
        if !missing.is_empty() {
            let err = Error::missing_credentials(missing.join(", "));
            return self.finish(ctx, report, Some(err));
        }

        let _lock = match self.lock_path.as_deref().map(RunLock::acquire).transpose() {
            Ok(lock) => lock,
            Err(e) => return self.finish(ctx, report, Some(e)),
        };

        let mut shutdown = ShutdownListener::new(shutdown_rx);

        ctx.enter(RunState::InspectingRedirect);
        let snapshot = RedirectSnapshot::capture(&*self.nat, &self.rules).await;
        ctx.emit(RunEvent::SnapshotCaptured {
            present: snapshot.present(),
            determined: snapshot.is_determined(),
        });

        let toggle = RedirectToggle::new(&*self.nat, self.rules_file.as_ref());

        let (guard, suspended) = if snapshot.any_present() {
            ctx.enter(RunState::SuspendingRedirect);
            let (guard, result) = SuspendedRedirect::suspend(&toggle, &snapshot, &self.events).await;
            (Some(guard), result)
        } else {
            debug!("No redirect rule installed, nothing to suspend");
            (None, Ok(()))
        };

        let mut failed_in = None;
        let mut outcome = match suspended {
            Ok(()) => {
                let redirect_clear = snapshot.is_determined();
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => {
                        warn!("Shutdown signal received, abandoning run");
                        Err(Error::Interrupted)
                    }
                    result = self.discover_and_register(&mut ctx, &mut report, redirect_clear) => result,
                }
            }
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            failed_in = Some(ctx.state());
        }

        if let Some(guard) = guard {
            ctx.enter(RunState::RestoringRedirect);
            report.restoration_failures = guard.restore(&toggle, &self.events).await;

            if let Err(e) = toggle.persist().await {
                warn!("Failed to persist rule set (live table is correct): {}", e);
                ctx.emit(RunEvent::PersistFailed {
                    error: e.to_string(),
                });
                report.persist_error = Some(e.to_string());
            }

            if outcome.is_ok()
                && let Some(rule) = report.restoration_failures.first()
            {
                failed_in = Some(RunState::RestoringRedirect);
                outcome = Err(Error::RestorationFailed { rule: rule.clone() });
            }
        }

        report.failed_in = failed_in;
        self.finish(ctx, report, outcome.err())
    }

    /// Discovering and Registering states
    async fn discover_and_register(
        &self,
        ctx: &mut RunContext<'_>,
        report: &mut RunReport,
        redirect_clear: bool,
    ) -> Result<()> {
        ctx.enter(RunState::Discovering);
        let Some(found) = self.discovery.discover(redirect_clear).await else {
            error!("All {} address sources exhausted", self.discovery.len());
            ctx.emit(RunEvent::AddressUnavailable);
            return Err(Error::AddressUnavailable);
        };
        report.address = Some(found.address);
        report.source = Some(found.source.clone());
        ctx.emit(RunEvent::AddressDiscovered {
            address: found.address,
            source: found.source,
        });

        ctx.enter(RunState::Registering);
        let request = RegistrationRequest::new(
            self.credentials.name.clone(),
            self.credentials.label.clone(),
            found.address,
            self.credentials.token.clone(),
        )?;
        info!(
            "Registering {} for {} ({}) via {}",
            request.address,
            request.name,
            request.label,
            self.registrar.registrar_name()
        );

        let outcome = self.registrar.register(&request).await?;
        ctx.emit(RunEvent::RegistrationCompleted {
            status: outcome.status,
        });
        report.registration = Some(outcome.clone());

        if outcome.is_success() {
            info!("Registered {} for {}", request.address, request.name);
            Ok(())
        } else {
            error!(
                "Registration rejected with HTTP {}:\n{}",
                outcome.status,
                outcome.diagnostic()
            );
            Err(Error::RegistrationFailed {
                status: outcome.status,
                body: outcome.body,
            })
        }
    }

    fn finish(&self, mut ctx: RunContext<'_>, mut report: RunReport, error: Option<Error>) -> RunReport {
        if let Some(e) = &error {
            if report.failed_in.is_none() {
                report.failed_in = Some(ctx.state());
            }
            error!("Run aborted: {}", e);
            ctx.enter(RunState::Aborted);
        } else {
            ctx.enter(RunState::Done);
        }

        report.error = error;
        report.final_state = ctx.state();
        report.finished_at = chrono::Utc::now();
        ctx.emit(RunEvent::Finished {
            success: report.is_success(),
        });
        report
    }
}
