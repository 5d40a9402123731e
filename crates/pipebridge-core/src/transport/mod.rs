//! Local transports: address parsing, dialing with fixed-delay retry, and
//! listeners that hand out [`Endpoint`]s.

#[cfg(windows)]
mod named_pipe;
#[cfg(unix)]
mod unix;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::access::AccessPolicy;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

#[cfg(windows)]
pub use named_pipe::NamedPipeListener;
#[cfg(unix)]
pub use unix::UnixSocketListener;

/// Where a local endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAddress {
    /// Filesystem path of a Unix domain socket.
    UnixSocket(PathBuf),
    /// Windows named pipe name (`\\.\pipe\...`).
    NamedPipe(String),
}

impl LocalAddress {
    /// Parse a transport string. Named pipes are recognised by their
    /// `\\.\pipe\` (or `//./pipe/`) prefix; anything else is a socket path.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Address("address is blank/empty".into()));
        }
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with(r"\\.\pipe\") || lower.starts_with("//./pipe/") {
            if trimmed.len() <= r"\\.\pipe\".len() {
                return Err(Error::Address(format!("named pipe {trimmed} has no name")));
            }
            return Ok(Self::NamedPipe(trimmed.to_string()));
        }
        Ok(Self::UnixSocket(PathBuf::from(trimmed)))
    }

    /// Reject addresses this platform cannot serve.
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            #[cfg(unix)]
            Self::UnixSocket(_) => Ok(()),
            #[cfg(windows)]
            Self::NamedPipe(_) => Ok(()),
            #[allow(unreachable_patterns)]
            other => Err(Error::Address(format!(
                "{other} is not supported on this platform"
            ))),
        }
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnixSocket(path) => write!(f, "unix:{}", path.display()),
            Self::NamedPipe(name) => write!(f, "pipe:{name}"),
        }
    }
}

/// Open one connection to `address`.
pub async fn dial(address: &LocalAddress) -> std::io::Result<Endpoint> {
    match address {
        #[cfg(unix)]
        LocalAddress::UnixSocket(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Endpoint::from_unix_stream(stream))
        }
        #[cfg(windows)]
        LocalAddress::NamedPipe(name) => named_pipe::dial(name),
        #[allow(unreachable_patterns)]
        other => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("{other} is not supported on this platform"),
        )),
    }
}

/// Fixed-delay dial retry policy.
///
/// Unlike an exponential reconnect policy the delay never grows: a missing
/// local socket usually means its owner has not started yet.
#[derive(Debug, Clone)]
pub struct DialRetry {
    /// Delay between attempts.
    pub delay: Duration,
    /// Maximum number of retries after the first attempt (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for DialRetry {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

impl DialRetry {
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Delay before retry `attempt` (0-indexed). Constant by construction.
    pub const fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Whether another attempt should be made.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Dial `address` until it succeeds, the retry budget runs out, or `cancel`
/// fires. Returns `None` when cancelled or out of attempts.
pub async fn dial_with_retry(
    address: &LocalAddress,
    retry: &DialRetry,
    cancel: &CancellationToken,
) -> Option<Endpoint> {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            info!(address = %address, "Dial cancelled");
            return None;
        }

        let result = tokio::select! {
            result = dial(address) => result,
            () = cancel.cancelled() => {
                info!(address = %address, "Dial cancelled");
                return None;
            }
        };

        match result {
            Ok(endpoint) => {
                info!(address = %address, attempt, "Connected to local transport");
                return Some(endpoint);
            }
            Err(e) => {
                if !retry.should_retry(attempt) {
                    warn!(address = %address, error = %e, attempt, "Dial attempts exhausted");
                    return None;
                }

                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    address = %address,
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Failed to connect to local transport, retrying"
                );

                tokio::select! {
                    () = sleep(delay) => {}
                    () = cancel.cancelled() => {
                        info!(address = %address, "Dial cancelled during retry wait");
                        return None;
                    }
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// A bound local listener.
#[derive(Debug)]
pub enum LocalListener {
    #[cfg(unix)]
    Unix(UnixSocketListener),
    #[cfg(windows)]
    NamedPipe(NamedPipeListener),
}

impl LocalListener {
    /// Bind `address`. Failure here is a fatal setup error for the caller.
    pub fn bind(address: &LocalAddress, access: &AccessPolicy, buffer_size: usize) -> Result<Self> {
        address.ensure_supported()?;
        match address {
            #[cfg(unix)]
            LocalAddress::UnixSocket(path) => {
                let _ = buffer_size;
                UnixSocketListener::bind(path.clone(), access.unix_mode()).map(Self::Unix)
            }
            #[cfg(windows)]
            LocalAddress::NamedPipe(name) => {
                let _ = buffer_size;
                let descriptor = access.resolve()?;
                NamedPipeListener::bind(name.clone(), &descriptor).map(Self::NamedPipe)
            }
            #[allow(unreachable_patterns)]
            other => Err(Error::Address(format!(
                "{other} is not supported on this platform"
            ))),
        }
    }

    /// Wait for the next connection.
    pub async fn accept(&mut self) -> std::io::Result<Endpoint> {
        match self {
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().await,
            #[cfg(windows)]
            Self::NamedPipe(listener) => listener.accept().await,
        }
    }

    pub fn address(&self) -> LocalAddress {
        match self {
            #[cfg(unix)]
            Self::Unix(listener) => LocalAddress::UnixSocket(listener.path().to_path_buf()),
            #[cfg(windows)]
            Self::NamedPipe(listener) => LocalAddress::NamedPipe(listener.name().to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_pipes_and_socket_paths() {
        assert_eq!(
            LocalAddress::parse(r"\\.\pipe\container-desktop").unwrap(),
            LocalAddress::NamedPipe(r"\\.\pipe\container-desktop".into())
        );
        assert_eq!(
            LocalAddress::parse("//./pipe/docker_engine").unwrap(),
            LocalAddress::NamedPipe("//./pipe/docker_engine".into())
        );
        assert_eq!(
            LocalAddress::parse("/var/run/docker.sock").unwrap(),
            LocalAddress::UnixSocket("/var/run/docker.sock".into())
        );
    }

    #[test]
    fn rejects_blank_and_nameless_addresses() {
        assert!(matches!(LocalAddress::parse("  "), Err(Error::Address(_))));
        assert!(matches!(
            LocalAddress::parse(r"\\.\pipe\"),
            Err(Error::Address(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn named_pipes_are_unsupported_on_unix() {
        let address = LocalAddress::parse(r"\\.\pipe\x").unwrap();
        assert!(address.ensure_supported().is_err());
    }

    #[test]
    fn retry_delay_is_constant() {
        let retry = DialRetry::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(u32::MAX), Duration::from_secs(2));
        assert!(retry.should_retry(u32::MAX));
    }

    #[test]
    fn retry_with_max_attempts() {
        let retry = DialRetry {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert!(retry.should_retry(0));
        assert!(retry.should_retry(1));
        assert!(!retry.should_retry(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dial_with_retry_gives_up_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let address = LocalAddress::UnixSocket(dir.path().join("missing.sock"));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result =
            dial_with_retry(&address, &DialRetry::fixed(Duration::from_secs(30)), &cancel).await;
        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dial_with_retry_stops_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let address = LocalAddress::UnixSocket(dir.path().join("missing.sock"));
        let retry = DialRetry {
            delay: Duration::from_millis(5),
            max_attempts: Some(3),
        };
        assert!(
            dial_with_retry(&address, &retry, &CancellationToken::new())
                .await
                .is_none()
        );
    }
}
