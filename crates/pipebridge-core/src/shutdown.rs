//! Signal-driven shutdown.
//!
//! The coordinator owns the process-wide cancellation token. Every session
//! token derives from it, so cancelling it reaches every relay and every
//! blocked dial or accept. Carriers are then terminated through the
//! [`SessionRegistry`], with a bounded grace before force-kill.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::SessionRegistry;

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// An OS signal, by name.
    Signal(&'static str),
    /// The shared token was cancelled by another component.
    Cancelled,
}

/// Counts from a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Carriers sent the termination signal.
    pub terminated: usize,
    /// Carriers force-killed after the grace period.
    pub killed: usize,
    /// Whether every session finished within the grace period.
    pub drained: bool,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: SessionRegistry,
    grace: Duration,
    signals: Option<SignalSet>,
}

impl ShutdownCoordinator {
    /// Create a coordinator without signal handlers. Only token
    /// cancellation triggers it.
    pub fn new(registry: SessionRegistry, grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
            grace,
            signals: None,
        }
    }

    /// Create a coordinator listening for termination signals.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn install(registry: SessionRegistry, grace: Duration) -> std::io::Result<Self> {
        let mut coordinator = Self::new(registry, grace);
        coordinator.signals = Some(SignalSet::install()?);
        Ok(coordinator)
    }

    /// The process-wide token. Clone it into every component that must stop
    /// on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Wait for the first signal or for the token to be cancelled.
    ///
    /// Signal streams are dropped afterwards, so a second signal does not
    /// re-enter shutdown.
    pub async fn wait_for_trigger(&mut self) -> ShutdownTrigger {
        let trigger = match self.signals.as_mut() {
            Some(signals) => tokio::select! {
                name = signals.recv() => ShutdownTrigger::Signal(name),
                () = self.token.cancelled() => ShutdownTrigger::Cancelled,
            },
            None => {
                self.token.cancelled().await;
                ShutdownTrigger::Cancelled
            }
        };
        self.signals = None;

        match trigger {
            ShutdownTrigger::Signal(name) => info!(signal = name, "Received shutdown signal"),
            ShutdownTrigger::Cancelled => info!("Shutdown requested"),
        }
        trigger
    }

    /// Cancel everything, terminate live carriers and wait up to the grace
    /// period for sessions to drain. Survivors are force-killed.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.token.cancel();

        let terminated = self.registry.terminate_all().await;
        let drained = self.registry.wait_until_empty(self.grace).await;

        let mut killed = 0;
        if !drained {
            warn!(
                remaining = self.registry.len().await,
                grace_ms = self.grace.as_millis(),
                "Sessions still running after grace period"
            );
            killed = self.registry.kill_all().await;
            if !self.registry.wait_until_empty(self.grace).await {
                warn!(pids = ?self.registry.carrier_pids().await, "Exiting with sessions still draining");
            }
        }

        info!(terminated, killed, drained, "Shutdown complete");
        ShutdownReport {
            terminated,
            killed,
            drained,
        }
    }
}

#[cfg(unix)]
#[derive(Debug)]
struct SignalSet {
    interrupt: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalSet {
    // Fault signals (SIGSEGV, SIGBUS) cannot be handled safely from async
    // code and are left at their default action.
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
struct SignalSet;

#[cfg(not(unix))]
impl SignalSet {
    #[allow(clippy::unnecessary_wraps)]
    const fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}
