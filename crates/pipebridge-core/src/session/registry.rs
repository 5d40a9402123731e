//! Registry of live sessions.
//!
//! Owned by the controller and shared with the shutdown coordinator, so
//! carrier processes are found through an explicit handle rather than
//! process-wide state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::SessionState;
use super::types::SessionError;
use crate::subprocess::ProcessRecord;

/// Shared view of one session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    created_at: Instant,
    state: watch::Sender<SessionState>,
    closed: AtomicBool,
    carrier: OnceLock<Arc<ProcessRecord>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Pending);
        Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            state,
            closed: AtomicBool::new(false),
            carrier: OnceLock::new(),
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Advance the state machine. Re-entering `Closed` is a no-op.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if *current == next && next.is_terminal() {
                return false;
            }
            if !current.can_transition_to(next) {
                result = Err(SessionError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                return false;
            }
            debug!(session_id = %self.id, from = %current, to = %next, "Session state change");
            *current = next;
            true
        });
        result
    }

    /// Set the closed flag. Returns `true` only for the first caller.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record the carrier once it has been spawned. Later calls are ignored.
    pub fn attach_carrier(&self, record: Arc<ProcessRecord>) {
        if self.carrier.set(record).is_err() {
            warn!(session_id = %self.id, "Carrier already attached to session");
        }
    }

    pub fn carrier(&self) -> Option<&Arc<ProcessRecord>> {
        self.carrier.get()
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Live sessions keyed by id.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionHandle>>>>,
    count: Arc<watch::Sender<usize>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            count: Arc::new(count),
        }
    }

    pub async fn register(&self, handle: Arc<SessionHandle>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.id(), handle);
        let len = sessions.len();
        drop(sessions);
        self.count.send_replace(len);
        debug!(active = len, "Session registered");
    }

    /// Remove a session. Returns `true` if it was registered.
    pub async fn unregister(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        let len = sessions.len();
        drop(sessions);
        self.count.send_replace(len);
        if let Some(handle) = &removed {
            debug!(
                session_id = %id,
                age_ms = handle.age().as_millis(),
                active = len,
                "Session unregistered"
            );
        }
        removed.is_some()
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// PIDs of carriers that are still running.
    pub async fn carrier_pids(&self) -> Vec<u32> {
        self.sessions
            .read()
            .await
            .values()
            .filter_map(|handle| handle.carrier())
            .filter(|record| !record.has_exited())
            .map(|record| record.pid())
            .collect()
    }

    async fn carriers(&self) -> Vec<Arc<ProcessRecord>> {
        self.sessions
            .read()
            .await
            .values()
            .filter_map(|handle| handle.carrier().cloned())
            .collect()
    }

    /// Send the termination signal to every live carrier. Returns how many
    /// were signalled.
    pub async fn terminate_all(&self) -> usize {
        let signalled = self
            .carriers()
            .await
            .iter()
            .filter(|record| record.terminate())
            .count();
        if signalled > 0 {
            info!(count = signalled, "Terminated carrier processes");
        }
        signalled
    }

    /// Force-kill every live carrier. Returns how many were killed.
    pub async fn kill_all(&self) -> usize {
        let killed = self
            .carriers()
            .await
            .iter()
            .filter(|record| record.kill())
            .count();
        if killed > 0 {
            warn!(count = killed, "Force-killed carrier processes");
        }
        killed
    }

    /// Wait until no sessions remain. Returns `false` on timeout.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0))
            .await
            .is_ok_and(|changed| changed.is_ok())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_get_unregister() {
        let registry = SessionRegistry::new();
        let handle = Arc::new(SessionHandle::new());
        let id = handle.id();

        registry.register(Arc::clone(&handle)).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(id).await.unwrap().id(), id);
        assert!(registry.carrier_pids().await.is_empty());

        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        assert!(registry.is_empty().await);
        assert!(registry.get(id).await.is_none());
    }

    #[test]
    fn handle_age_counts_from_creation() {
        let handle = SessionHandle::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(handle.age() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn wait_until_empty_observes_unregister() {
        let registry = SessionRegistry::new();
        assert!(registry.wait_until_empty(Duration::from_millis(10)).await);

        let handle = Arc::new(SessionHandle::new());
        let id = handle.id();
        registry.register(handle).await;
        assert!(!registry.wait_until_empty(Duration::from_millis(20)).await);

        let clone = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            clone.unregister(id).await;
        });
        assert!(registry.wait_until_empty(Duration::from_secs(5)).await);
    }

    #[test]
    fn handle_transitions_and_closed_flag() {
        let handle = SessionHandle::new();
        assert_eq!(handle.state(), SessionState::Pending);

        handle.transition(SessionState::Connected).unwrap();
        assert!(matches!(
            handle.transition(SessionState::Relaying),
            Err(SessionError::InvalidTransition { .. })
        ));
        handle.transition(SessionState::Closed).unwrap();
        handle.transition(SessionState::Closed).unwrap();
        assert_eq!(handle.state(), SessionState::Closed);

        assert!(handle.mark_closed());
        assert!(!handle.mark_closed());
        assert!(handle.is_closed());
    }
}
