//! Outcome of one orchestrator run

use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;

use crate::engine::events::RunState;
use crate::error::Error;
use crate::rule::RedirectRule;
use crate::traits::RegistrationOutcome;

/// Everything an operator needs to know about a finished run
#[derive(Debug)]
pub struct RunReport {
    /// `Done` or `Aborted`
    pub final_state: RunState,
    /// State the run was in when the primary error occurred
    pub failed_in: Option<RunState>,
    /// Discovered address, if discovery got that far
    pub address: Option<Ipv4Addr>,
    /// Source that produced the address
    pub source: Option<String>,
    /// Directory service response, if registration got that far
    pub registration: Option<RegistrationOutcome>,
    /// Primary error; `None` on success
    pub error: Option<Error>,
    /// Suspended rules that could not be reinstalled
    pub restoration_failures: Vec<RedirectRule>,
    /// Best-effort persistence failure, reported but not fatal
    pub persist_error: Option<String>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            final_state: RunState::Start,
            failed_in: None,
            address: None,
            source: None,
            registration: None,
            error: None,
            restoration_failures: Vec::new(),
            persist_error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Registration returned 200 and nothing else went wrong
    pub fn is_success(&self) -> bool {
        self.final_state == RunState::Done
            && self.error.is_none()
            && self
                .registration
                .as_ref()
                .is_some_and(RegistrationOutcome::is_success)
    }

    /// Process exit code: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Machine-readable summary (no secrets)
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "success": self.is_success(),
            "final_state": self.final_state.to_string(),
            "failed_in": self.failed_in.map(|s| s.to_string()),
            "address": self.address.map(|a| a.to_string()),
            "source": self.source,
            "registration_status": self.registration.as_ref().map(|r| r.status),
            "error": self.error.as_ref().map(ToString::to_string),
            "restoration_failures": self
                .restoration_failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            "persist_error": self.persist_error,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
        })
    }
}
