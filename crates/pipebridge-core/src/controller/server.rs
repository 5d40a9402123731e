//! Server shape: accept connections and run one carrier per connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::session::{Session, SessionConfig, SessionError, SessionRegistry, SessionSummary};
use crate::transport::{LocalAddress, LocalListener};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Counters from a finished accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerSummary {
    pub accepted: u64,
    pub completed: u64,
    pub failed: u64,
    pub accept_errors: u64,
}

impl ServerSummary {
    fn record(&mut self, joined: Result<Result<SessionSummary, SessionError>, JoinError>) {
        match joined {
            Ok(Ok(_)) => self.completed += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                error!(error = %e, "Session task panicked or was aborted");
                self.failed += 1;
            }
        }
    }
}

/// Accept loop over a bound listener. Sessions run concurrently and
/// independently; one session ending never affects the listener or the
/// others.
#[derive(Debug)]
pub struct ServerController {
    listener: LocalListener,
    session: Arc<SessionConfig>,
    registry: SessionRegistry,
}

impl ServerController {
    pub fn new(listener: LocalListener, session: SessionConfig, registry: SessionRegistry) -> Self {
        Self {
            listener,
            session: Arc::new(session),
            registry,
        }
    }

    pub fn address(&self) -> LocalAddress {
        self.listener.address()
    }

    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept until `cancel` fires, then wait for every session task.
    ///
    /// Sessions derive their tokens from `cancel`, so they are already
    /// stopping when the drain starts.
    pub async fn run(mut self, cancel: CancellationToken) -> ServerSummary {
        let mut sessions: JoinSet<Result<SessionSummary, SessionError>> = JoinSet::new();
        let mut summary = ServerSummary::default();
        info!(address = %self.listener.address(), "Accepting connections");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    summary.record(joined);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(local) => {
                        summary.accepted += 1;
                        let session = Session::new(
                            local,
                            Arc::clone(&self.session),
                            self.registry.clone(),
                            &cancel,
                        );
                        info!(
                            session_id = %session.id(),
                            active = sessions.len() + 1,
                            "Accepted connection"
                        );
                        sessions.spawn(session.run());
                    }
                    Err(e) => {
                        summary.accept_errors += 1;
                        warn!(error = %e, "Failed to accept connection");
                        tokio::select! {
                            () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                            () = cancel.cancelled() => break,
                        }
                    }
                },
            }
        }

        info!(active = sessions.len(), "Listener stopped, draining sessions");
        while let Some(joined) = sessions.join_next().await {
            summary.record(joined);
        }
        info!(
            accepted = summary.accepted,
            completed = summary.completed,
            failed = summary.failed,
            "All sessions finished"
        );
        summary
    }
}
