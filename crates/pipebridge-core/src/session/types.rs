//! Session types.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use super::state::SessionState;
use crate::config::BridgeSettings;
use crate::endpoint::ReadDeadline;
use crate::relay::{RelayPolicy, RelayReport};
use crate::subprocess::{CarrierCommand, ExitRecord, SpawnError};

/// Everything a session needs besides its local endpoint.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Carrier to spawn for the session.
    pub command: CarrierCommand,
    pub relay: RelayPolicy,
    /// Idle deadline armed on the local endpoint's reads, if any.
    pub local_deadline: Option<ReadDeadline>,
    /// Wait after SIGTERM before force-killing the carrier.
    pub terminate_grace: Duration,
    /// How long the relay may keep draining after the carrier exits, and how
    /// long the carrier may take to exit once the relay has ended.
    pub exit_drain: Duration,
    /// Where to record the carrier PID.
    pub carrier_pid_file: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(command: CarrierCommand, settings: &BridgeSettings) -> Self {
        Self {
            command,
            relay: RelayPolicy::with_buffer_size(settings.buffer_size),
            local_deadline: None,
            terminate_grace: settings.terminate_grace(),
            exit_drain: settings.exit_drain(),
            carrier_pid_file: None,
        }
    }
}

/// Session errors. Local to one session; never fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to start carrier: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Session cancelled before the carrier started")]
    Cancelled,
}

/// What happened during a completed session.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: Uuid,
    pub carrier_pid: u32,
    pub relay: RelayReport,
    pub exit: ExitRecord,
    pub duration: Duration,
}

impl SessionSummary {
    /// Whether the carrier exited cleanly.
    pub const fn carrier_succeeded(&self) -> bool {
        self.exit.success()
    }
}
