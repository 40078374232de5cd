//! Shutdown listener for a run
//!
//! Signal handlers are registered when the listener is created, not when it
//! is first awaited. A run creates its listener before touching the NAT
//! table, so SIGINT or SIGTERM arriving mid-suspension is held until the
//! orchestrator checks for it instead of killing the process with rules
//! taken out.

use tokio::sync::oneshot;
use tracing::warn;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

enum Source {
    /// Externally controlled signal, used by tests
    Channel(oneshot::Receiver<()>),

    #[cfg(unix)]
    Signals { interrupt: Signal, terminate: Signal },

    #[cfg(not(unix))]
    CtrlC,

    /// Nothing left to wait for
    Never,
}

/// Pending shutdown request for one run
pub struct ShutdownListener {
    source: Source,
}

impl ShutdownListener {
    /// Listen on `rx` when given, otherwise on SIGINT and SIGTERM
    pub fn new(rx: Option<oneshot::Receiver<()>>) -> Self {
        let source = match rx {
            Some(rx) => Source::Channel(rx),
            None => Self::os_signals(),
        };
        Self { source }
    }

    #[cfg(unix)]
    fn os_signals() -> Source {
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => Source::Signals { interrupt, terminate },
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
                Source::Never
            }
        }
    }

    #[cfg(not(unix))]
    fn os_signals() -> Source {
        Source::CtrlC
    }

    /// Resolves once shutdown has been requested
    ///
    /// A request that arrived before this call resolves immediately. A
    /// dropped test sender never resolves.
    pub async fn requested(&mut self) {
        match &mut self.source {
            Source::Channel(rx) => {
                if rx.await.is_ok() {
                    return;
                }
                self.source = Source::Never;
            }
            #[cfg(unix)]
            Source::Signals { interrupt, terminate } => {
                tokio::select! {
                    _ = interrupt.recv() => return,
                    _ = terminate.recv() => return,
                }
            }
            #[cfg(not(unix))]
            Source::CtrlC => {
                if tokio::signal::ctrl_c().await.is_ok() {
                    return;
                }
                warn!("Failed to listen for Ctrl-C");
                self.source = Source::Never;
            }
            Source::Never => {}
        }
        std::future::pending::<()>().await
    }
}
