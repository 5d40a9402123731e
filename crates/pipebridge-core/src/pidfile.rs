//! PID files.
//!
//! Plain decimal snapshots for external process managers. They are
//! overwritten on every run and are not locks.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

/// Write `pid` as decimal text to `path`, replacing any previous content.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, pid.to_string()).map_err(|e| {
        Error::Setup(format!(
            "Failed to write PID file {}: {}",
            path.display(),
            e
        ))
    })?;

    info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Derive a sibling PID file path by substituting the first `.pid` with
/// `-{suffix}.pid` (or appending it when `base` has no `.pid`).
pub fn derive_pid_path(base: &Path, suffix: &str) -> PathBuf {
    let raw = base.to_string_lossy();
    let replacement = format!("-{suffix}.pid");
    if raw.contains(".pid") {
        PathBuf::from(raw.replacen(".pid", &replacement, 1))
    } else {
        PathBuf::from(format!("{raw}{replacement}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn derives_sibling_paths() {
        assert_eq!(
            derive_pid_path(Path::new("/run/bridge.pid"), "relay-linux"),
            PathBuf::from("/run/bridge-relay-linux.pid")
        );
        assert_eq!(
            derive_pid_path(Path::new("/run/bridge"), "relay-windows"),
            PathBuf::from("/run/bridge-relay-windows.pid")
        );
    }

    #[test]
    fn write_overwrites_without_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("bridge.pid");

        write_pid_file(&path, 123_456).unwrap();
        write_pid_file(&path, 42).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "42");
    }
}
