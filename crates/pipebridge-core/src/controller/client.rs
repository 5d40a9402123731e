//! Client shape: dial the local transport and bridge exactly one session.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::{Session, SessionConfig, SessionError, SessionRegistry, SessionSummary};
use crate::transport::{DialRetry, LocalAddress, dial_with_retry};

/// How a client run ended.
#[derive(Debug)]
pub enum ClientOutcome {
    /// Shutdown arrived before the carrier started.
    Cancelled,
    /// The dial retry budget ran out.
    Unreachable,
    /// Shutdown arrived while relaying.
    Interrupted(SessionSummary),
    /// The session ran to completion on its own.
    Completed(SessionSummary),
    /// The session could not run (carrier failed to spawn).
    Failed(SessionError),
}

impl ClientOutcome {
    /// Process exit status for this outcome: zero for a clean carrier exit
    /// or a signal-driven shutdown.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Cancelled | Self::Interrupted(_) => 0,
            Self::Completed(summary) => {
                if summary.carrier_succeeded() {
                    0
                } else {
                    1
                }
            }
            Self::Unreachable | Self::Failed(_) => 1,
        }
    }
}

/// Dials `address` (retrying at a fixed delay) and runs one session.
#[derive(Debug)]
pub struct ClientController {
    address: LocalAddress,
    retry: DialRetry,
    session: Arc<SessionConfig>,
    registry: SessionRegistry,
}

impl ClientController {
    pub fn new(
        address: LocalAddress,
        retry: DialRetry,
        session: SessionConfig,
        registry: SessionRegistry,
    ) -> Self {
        Self {
            address,
            retry,
            session: Arc::new(session),
            registry,
        }
    }

    pub const fn address(&self) -> &LocalAddress {
        &self.address
    }

    pub async fn run(&self, cancel: &CancellationToken) -> ClientOutcome {
        info!(
            address = %self.address,
            retry_delay_ms = self.retry.delay.as_millis(),
            "Connecting to local transport"
        );

        let Some(local) = dial_with_retry(&self.address, &self.retry, cancel).await else {
            return if cancel.is_cancelled() {
                ClientOutcome::Cancelled
            } else {
                ClientOutcome::Unreachable
            };
        };

        let session = Session::new(local, Arc::clone(&self.session), self.registry.clone(), cancel);
        info!(session_id = %session.id(), "Session established");

        match session.run().await {
            Ok(summary) if cancel.is_cancelled() => ClientOutcome::Interrupted(summary),
            Ok(summary) => {
                if !summary.carrier_succeeded() {
                    warn!(
                        code = ?summary.exit.code,
                        signal = ?summary.exit.signal,
                        "Carrier exited unsuccessfully"
                    );
                }
                ClientOutcome::Completed(summary)
            }
            Err(SessionError::Cancelled) => ClientOutcome::Cancelled,
            Err(e) => ClientOutcome::Failed(e),
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::config::BridgeSettings;
    use crate::subprocess::CarrierCommand;

    fn controller(path: std::path::PathBuf, command: CarrierCommand) -> ClientController {
        ClientController::new(
            LocalAddress::UnixSocket(path),
            DialRetry::fixed(Duration::from_millis(50)),
            SessionConfig::new(command, &BridgeSettings::default()),
            SessionRegistry::new(),
        )
    }

    #[tokio::test]
    async fn cancelled_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let client = controller(dir.path().join("none.sock"), CarrierCommand::new("cat"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = client.run(&cancel).await;
        assert!(matches!(outcome, ClientOutcome::Cancelled));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn unreachable_when_budget_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = controller(dir.path().join("none.sock"), CarrierCommand::new("cat"));
        client.retry.max_attempts = Some(1);

        let outcome = client.run(&CancellationToken::new()).await;
        assert!(matches!(outcome, ClientOutcome::Unreachable));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn carrier_failure_maps_to_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let client = controller(
            path,
            CarrierCommand::new("sh").with_args(["-c", "read line; echo \"got $line\"; exit 2"]),
        );
        let run = tokio::spawn(async move { client.run(&CancellationToken::new()).await });

        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(b"hi\n").await.unwrap();
        let mut reply = Vec::new();
        peer.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"got hi\n");

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        match &outcome {
            ClientOutcome::Completed(summary) => assert_eq!(summary.exit.code, Some(2)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn missing_carrier_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let client = controller(path, CarrierCommand::new("/no/such/carrier"));

        let run = tokio::spawn(async move { client.run(&CancellationToken::new()).await });
        let _peer = listener.accept().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ClientOutcome::Failed(SessionError::Spawn(_))));
        assert_eq!(outcome.exit_code(), 1);
    }
}
