//! Duplex byte relay.
//!
//! Runs two copy loops (A to B and B to A) over a pair of endpoints. The
//! first direction to stop, for whatever reason, stops the other; both
//! endpoints are then closed exactly once. The payload is never inspected
//! or transformed.

mod pump;
mod types;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;

pub use types::{Direction, DirectionReport, RelayPolicy, RelayReport, Termination};

/// Bidirectional copy engine.
#[derive(Debug, Clone, Default)]
pub struct DuplexRelay {
    policy: RelayPolicy,
}

impl DuplexRelay {
    pub const fn new(policy: RelayPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> RelayPolicy {
        self.policy
    }

    /// Relay between `a` and `b` until either direction stops or `cancel`
    /// fires. Consumes both endpoints and closes each exactly once.
    ///
    /// Cancelling `cancel` interrupts blocked reads and writes in both
    /// directions. A fresh child token scopes this run, so a direction
    /// stopping never cancels anything outside the relay.
    pub async fn run(
        &self,
        mut a: Endpoint,
        mut b: Endpoint,
        cancel: &CancellationToken,
    ) -> RelayReport {
        let stop = cancel.child_token();
        let buffer_size = self.policy.buffer_size.max(1);

        debug!(
            a = %a.reader_kind(),
            b = %b.reader_kind(),
            buffer_size,
            "Relay started"
        );

        let (a_to_b, b_to_a) = {
            let (a_reader, a_writer) = a.halves_mut();
            let (b_reader, b_writer) = b.halves_mut();
            tokio::join!(
                pump::pump(Direction::AToB, a_reader, b_writer, buffer_size, &stop, cancel),
                pump::pump(Direction::BToA, b_reader, a_writer, buffer_size, &stop, cancel),
            )
        };

        close_endpoint(&mut a, "a").await;
        close_endpoint(&mut b, "b").await;

        let report = RelayReport { a_to_b, b_to_a };
        info!(
            a_to_b_bytes = report.a_to_b.bytes,
            a_to_b = %report.a_to_b.termination,
            b_to_a_bytes = report.b_to_a.bytes,
            b_to_a = %report.b_to_a.termination,
            "Relay finished"
        );
        report
    }
}

async fn close_endpoint(endpoint: &mut Endpoint, label: &'static str) {
    match endpoint.close().await {
        Ok(true) => debug!(endpoint = label, "Endpoint closed"),
        Ok(false) => {}
        Err(e) => warn!(endpoint = label, error = %e, "Error closing endpoint"),
    }
}
