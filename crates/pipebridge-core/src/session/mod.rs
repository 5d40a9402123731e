//! Sessions: one local connection bridged through one carrier process.
//!
//! A [`Session`] owns its local endpoint and carrier exclusively. It spawns
//! the carrier, relays until either side stops, then terminates and reaps
//! the carrier before reporting. Every task it starts is joined before the
//! session reaches [`SessionState::Closed`].

mod registry;
mod state;
mod types;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::pidfile::write_pid_file;
use crate::relay::{DuplexRelay, RelayReport};
use crate::subprocess::{Carrier, ExitRecord, ProcessRecord};

pub use registry::{SessionHandle, SessionRegistry};
pub use state::SessionState;
pub use types::{SessionConfig, SessionError, SessionSummary};

/// A single relay instance.
#[derive(Debug)]
pub struct Session {
    handle: Arc<SessionHandle>,
    local: Option<Endpoint>,
    config: Arc<SessionConfig>,
    registry: SessionRegistry,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session for an established local connection. The session's
    /// cancellation token is a child of `parent`.
    pub fn new(
        local: Endpoint,
        config: Arc<SessionConfig>,
        registry: SessionRegistry,
        parent: &CancellationToken,
    ) -> Self {
        let handle = Arc::new(SessionHandle::new());
        if let Err(e) = handle.transition(SessionState::Connected) {
            warn!(session_id = %handle.id(), error = %e, "Unexpected state on new session");
        }
        Self {
            handle,
            local: Some(local),
            config,
            registry,
            cancel: parent.child_token(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub const fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    /// Token that stops only this session.
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run the session to completion.
    ///
    /// The session is registered for its whole lifetime and unregistered on
    /// every exit path.
    pub async fn run(mut self) -> Result<SessionSummary, SessionError> {
        let started = Instant::now();
        let id = self.id();
        self.registry.register(Arc::clone(&self.handle)).await;

        let result = self.drive(started).await;

        self.finish();
        self.registry.unregister(id).await;

        match &result {
            Ok(summary) => info!(
                session_id = %id,
                carrier_pid = summary.carrier_pid,
                exit_code = ?summary.exit.code,
                bytes = summary.relay.total_bytes(),
                duration_ms = summary.duration.as_millis(),
                "Session closed"
            ),
            Err(e) => error!(session_id = %id, error = %e, "Session failed"),
        }
        result
    }

    async fn drive(&mut self, started: Instant) -> Result<SessionSummary, SessionError> {
        let id = self.id();

        if self.cancel.is_cancelled() {
            self.close_local().await;
            return Err(SessionError::Cancelled);
        }

        self.handle.transition(SessionState::Spawning)?;
        let mut carrier = match Carrier::spawn(&self.config.command) {
            Ok(carrier) => carrier,
            Err(e) => {
                self.close_local().await;
                return Err(e.into());
            }
        };
        let carrier_pid = carrier.pid();
        let record = Arc::clone(carrier.record());
        self.handle.attach_carrier(Arc::clone(&record));
        info!(session_id = %id, carrier_pid, "Carrier attached to session");

        if let Some(path) = &self.config.carrier_pid_file {
            if let Err(e) = write_pid_file(path, carrier_pid) {
                warn!(session_id = %id, error = %e, "Failed to write carrier PID file");
            }
        }

        let report = match (self.local.take(), carrier.take_endpoint()) {
            (Some(mut local), Some(carrier_io)) => {
                if let Err(e) = local.set_read_deadline(self.config.local_deadline) {
                    warn!(session_id = %id, error = %e, "Idle deadline not applied");
                }
                self.handle.transition(SessionState::Relaying)?;
                let report =
                    relay_until_done(id, &self.config, &self.cancel, local, carrier_io, &record)
                        .await;
                Some(report)
            }
            _ => {
                warn!(session_id = %id, "Session endpoints unavailable, skipping relay");
                None
            }
        };

        if let Err(e) = self.handle.transition(SessionState::Draining) {
            debug!(session_id = %id, error = %e, "Draining from unexpected state");
        }
        let exit = settle_carrier(id, &self.config, &self.cancel, &record).await;
        carrier.join().await;

        let relay = report.unwrap_or_else(empty_report);
        Ok(SessionSummary {
            id,
            carrier_pid,
            relay,
            exit,
            duration: started.elapsed(),
        })
    }

    async fn close_local(&mut self) {
        if let Some(mut local) = self.local.take() {
            if let Err(e) = local.close().await {
                debug!(session_id = %self.id(), error = %e, "Error closing local endpoint");
            }
        }
    }

    fn finish(&self) {
        if let Err(e) = self.handle.transition(SessionState::Closed) {
            debug!(session_id = %self.id(), error = %e, "Close from unexpected state");
        }
        self.handle.mark_closed();
        self.cancel.cancel();
    }
}

/// Relay until one side stops. If the carrier exits first, the relay gets
/// `exit_drain` to forward what the carrier already wrote.
async fn relay_until_done(
    id: Uuid,
    config: &SessionConfig,
    cancel: &CancellationToken,
    local: Endpoint,
    carrier_io: Endpoint,
    carrier: &ProcessRecord,
) -> RelayReport {
    let relay_cancel = cancel.child_token();
    let relay = DuplexRelay::new(config.relay);
    let run = relay.run(local, carrier_io, &relay_cancel);
    tokio::pin!(run);

    tokio::select! {
        report = &mut run => report,
        exit = carrier.wait() => {
            debug!(
                session_id = %id,
                code = ?exit.code,
                drain_ms = config.exit_drain.as_millis(),
                "Carrier exited while relaying, draining"
            );
            if let Ok(report) = tokio::time::timeout(config.exit_drain, &mut run).await {
                report
            } else {
                relay_cancel.cancel();
                run.await
            }
        }
    }
}

/// Let the carrier finish on its own after its input closed. It is asked
/// to terminate once `exit_drain` passes or the session is cancelled.
async fn settle_carrier(
    id: Uuid,
    config: &SessionConfig,
    cancel: &CancellationToken,
    carrier: &ProcessRecord,
) -> ExitRecord {
    if let Some(exit) = carrier.exit() {
        return exit;
    }
    if !cancel.is_cancelled() {
        tokio::select! {
            exit = carrier.wait() => return exit,
            () = cancel.cancelled() => {
                debug!(session_id = %id, "Session cancelled while carrier was finishing");
            }
            () = tokio::time::sleep(config.exit_drain) => {
                debug!(
                    session_id = %id,
                    pid = carrier.pid(),
                    drain_ms = config.exit_drain.as_millis(),
                    "Carrier still running after its input closed"
                );
            }
        }
    }
    carrier.shutdown(config.terminate_grace).await
}

fn empty_report() -> RelayReport {
    use crate::endpoint::EndpointKind;
    use crate::relay::{Direction, DirectionReport, Termination};

    let direction = |direction, source, sink| DirectionReport {
        direction,
        source,
        sink,
        bytes: 0,
        termination: Termination::Cancelled,
    };
    RelayReport {
        a_to_b: direction(Direction::AToB, EndpointKind::Socket, EndpointKind::CarrierStdin),
        b_to_a: direction(Direction::BToA, EndpointKind::CarrierStdout, EndpointKind::Socket),
    }
}
