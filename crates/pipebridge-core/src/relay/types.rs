//! Duplex relay types.

use std::fmt;

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::endpoint::{EndpointError, EndpointKind};

/// Relay configuration shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Bytes read per chunk in each direction.
    pub buffer_size: usize,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl RelayPolicy {
    /// A zero size is bumped to one byte so the copy loop always progresses.
    pub const fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: if buffer_size == 0 { 1 } else { buffer_size },
        }
    }
}

/// Which way a copy loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AToB => "a->b",
            Self::BToA => "b->a",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one direction stopped.
#[derive(Debug)]
pub enum Termination {
    /// The source reported end-of-stream.
    EndOfStream,
    /// The source's read deadline expired under an end-session policy.
    IdleTimeout,
    /// Reading from the source failed.
    ReadFailed(EndpointError),
    /// Writing to the sink failed.
    WriteFailed(EndpointError),
    /// The opposite direction stopped first.
    PeerTerminated,
    /// External cancellation (shutdown or session teardown).
    Cancelled,
}

impl Termination {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::ReadFailed(_) | Self::WriteFailed(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of stream"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::PeerTerminated => f.write_str("peer direction terminated"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one copy direction.
#[derive(Debug)]
pub struct DirectionReport {
    pub direction: Direction,
    pub source: EndpointKind,
    pub sink: EndpointKind,
    /// Bytes fully written to the sink.
    pub bytes: u64,
    pub termination: Termination,
}

/// Outcome of a whole relay run.
#[derive(Debug)]
pub struct RelayReport {
    pub a_to_b: DirectionReport,
    pub b_to_a: DirectionReport,
}

impl RelayReport {
    pub const fn total_bytes(&self) -> u64 {
        self.a_to_b.bytes.saturating_add(self.b_to_a.bytes)
    }

    /// The first hard I/O failure, if either direction had one.
    pub fn failure(&self) -> Option<&DirectionReport> {
        [&self.a_to_b, &self.b_to_a]
            .into_iter()
            .find(|report| report.termination.is_failure())
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self.a_to_b.termination, Termination::Cancelled)
            && matches!(self.b_to_a.termination, Termination::Cancelled)
    }
}
