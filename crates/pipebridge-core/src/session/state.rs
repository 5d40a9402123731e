//! Session lifecycle states.

use std::fmt;

/// Per-session state machine.
///
/// `Pending -> Connected -> Spawning -> Relaying -> Draining -> Closed`, with
/// a direct jump to `Closed` allowed from any state (spawn failure,
/// cancellation before the relay starts). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Pending,
    Connected,
    Spawning,
    Relaying,
    Draining,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is allowed.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Closed, _) => false,
            (_, Self::Closed)
            | (Self::Pending, Self::Connected)
            | (Self::Connected, Self::Spawning)
            | (Self::Spawning, Self::Relaying)
            | (Self::Relaying, Self::Draining) => true,
            _ => false,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Spawning => "spawning",
            Self::Relaying => "relaying",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
