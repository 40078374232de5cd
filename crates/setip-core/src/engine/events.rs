//! Run states and the events emitted while moving through them

use std::fmt;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::rule::RedirectRule;

/// Orchestrator states
///
/// ```text
/// Start → Validating → InspectingRedirect → [SuspendingRedirect] →
///   Discovering → Registering → [RestoringRedirect] → Done
/// ```
///
/// `Aborted` is reachable from every state. Once `SuspendingRedirect` has
/// been entered, `RestoringRedirect` always precedes the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Start,
    Validating,
    InspectingRedirect,
    SuspendingRedirect,
    Discovering,
    Registering,
    RestoringRedirect,
    Done,
    Aborted,
}

impl RunState {
    /// Whether the run has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Start => "start",
            RunState::Validating => "validating",
            RunState::InspectingRedirect => "inspecting-redirect",
            RunState::SuspendingRedirect => "suspending-redirect",
            RunState::Discovering => "discovering",
            RunState::Registering => "registering",
            RunState::RestoringRedirect => "restoring-redirect",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Events emitted by the Orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// State machine transition
    StateChanged { from: RunState, to: RunState },

    /// Redirect snapshot taken
    SnapshotCaptured {
        present: Vec<RedirectRule>,
        determined: bool,
    },

    /// A present rule was removed for the discovery window
    RuleSuspended { rule: RedirectRule },

    /// A rule could not be removed; the run will restore and abort
    SuspensionFailed { rule: RedirectRule, error: String },

    /// Discovery succeeded
    AddressDiscovered { address: Ipv4Addr, source: String },

    /// Every source was exhausted
    AddressUnavailable,

    /// The directory service answered
    RegistrationCompleted { status: u16 },

    /// A suspended rule is back in place
    RuleRestored { rule: RedirectRule },

    /// A suspended rule could not be reinstalled
    RestorationFailed { rule: RedirectRule, error: String },

    /// Best-effort persistence failed
    PersistFailed { error: String },

    /// The run ended
    Finished { success: bool },
}

/// Non-blocking event sender
///
/// Events are advisory. When the channel is full they are dropped rather
/// than stalling a run that has NAT state suspended.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<RunEvent>,
}

impl EventSink {
    /// Create a sink and its receiver
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emit an event, dropping it if the channel is full or closed
    pub fn emit(&self, event: RunEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Current state of one run, with transition logging
pub(crate) struct RunContext<'a> {
    state: RunState,
    events: &'a EventSink,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(events: &'a EventSink) -> Self {
        Self {
            state: RunState::Start,
            events,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn enter(&mut self, to: RunState) {
        let from = self.state;
        info!("{} -> {}", from, to);
        self.state = to;
        self.events.emit(RunEvent::StateChanged { from, to });
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        self.events.emit(event);
    }
}
