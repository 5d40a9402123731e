//! Unix domain socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// Listening Unix socket. The socket file is removed on drop.
#[derive(Debug)]
pub struct UnixSocketListener {
    path: PathBuf,
    listener: UnixListener,
}

impl UnixSocketListener {
    /// Bind `path`, replacing a stale socket file, and apply `mode`.
    pub fn bind(path: PathBuf, mode: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Setup(format!(
                        "Failed to create socket directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        if path.exists() {
            warn!(path = %path.display(), "Removing stale socket file");
            std::fs::remove_file(&path).map_err(|e| {
                Error::Setup(format!(
                    "Failed to remove stale socket {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        let listener = UnixListener::bind(&path)
            .map_err(|e| Error::Setup(format!("Failed to listen on {}: {}", path.display(), e)))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            Error::Setup(format!(
                "Failed to set permissions {:o} on {}: {}",
                mode,
                path.display(),
                e
            ))
        })?;

        info!(path = %path.display(), mode = %format!("{mode:o}"), "Listening on Unix socket");
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> std::io::Result<Endpoint> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(Endpoint::from_unix_stream(stream))
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        if self.path.exists() {
            std::fs::remove_file(&self.path).ok();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_applies_mode_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.sock");

        let listener = UnixSocketListener::bind(path.clone(), 0o600).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = UnixSocketListener::bind(path.clone(), 0o660).unwrap();
        let client = tokio::spawn({
            let path = path.clone();
            async move { tokio::net::UnixStream::connect(path).await.unwrap() }
        });

        let endpoint = listener.accept().await.unwrap();
        assert_eq!(endpoint.reader_kind(), crate::endpoint::EndpointKind::Socket);
        client.await.unwrap();
    }
}
