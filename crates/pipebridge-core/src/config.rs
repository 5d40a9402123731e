//! Configuration resolution for pipebridge.
//!
//! Implements hierarchical settings resolution:
//! 1. Built-in defaults
//! 2. Settings file (`--config`, or `<config_dir>/pipebridge/settings.json`)
//! 3. Environment variables (`PIPEBRIDGE_*`)
//! 4. CLI arguments (applied by the binaries, highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default relay buffer size (32 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Tunable settings shared by both binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Relay buffer size per direction, in bytes.
    pub buffer_size: usize,
    /// Fixed delay between dial attempts.
    pub retry_delay_ms: u64,
    /// Wait after the termination signal before force-killing a carrier.
    pub terminate_grace_ms: u64,
    /// Bounded grace for in-flight cleanup after a shutdown signal.
    pub shutdown_grace_ms: u64,
    /// Grace between one side of a session ending and the other being stopped:
    /// relay draining after the carrier exits, carrier exiting after the relay ends.
    pub exit_drain_ms: u64,
    /// Idle read deadline on the accepted local connection (0 = none).
    pub idle_timeout_ms: u64,
    /// Parent-liveness polling interval (0 = disabled).
    pub poll_interval_secs: u64,
    /// Default tracing filter level.
    pub log_level: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            retry_delay_ms: 2000,
            terminate_grace_ms: 5000,
            shutdown_grace_ms: 3000,
            exit_drain_ms: 500,
            idle_timeout_ms: 0,
            poll_interval_secs: 2,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeSettings {
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub const fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub const fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.exit_drain_ms)
    }

    /// Idle deadline, `None` when disabled.
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.idle_timeout_ms))
        }
    }

    /// Parent poll interval, `None` when disabled.
    pub const fn poll_interval(&self) -> Option<Duration> {
        if self.poll_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.poll_interval_secs))
        }
    }

    /// Reject values the relay cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Per-user settings file path: `<config_dir>/pipebridge/settings.json`.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pipebridge").join("settings.json"))
}

/// Load settings with hierarchical resolution.
///
/// An explicitly requested file must exist; the per-user default file is
/// only read when present. The result is not validated: callers apply their
/// own overrides first and then call [`BridgeSettings::validate`].
pub fn load_settings(explicit: Option<&Path>) -> Result<BridgeSettings> {
    let mut settings = match explicit {
        Some(path) => load_settings_file(path)?,
        None => match default_settings_path() {
            Some(path) if path.exists() => load_settings_file(&path)?,
            _ => BridgeSettings::default(),
        },
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn load_settings_file(path: &Path) -> Result<BridgeSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read settings file {}: {}",
            path.display(),
            e
        ))
    })?;
    debug!(path = %path.display(), "Loaded settings file");
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse settings file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Apply `PIPEBRIDGE_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(settings: &mut BridgeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parse_into<T: std::str::FromStr>(key: &str, raw: Option<String>, slot: &mut T) {
        if let Some(raw) = raw {
            match raw.trim().parse() {
                Ok(value) => *slot = value,
                Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
            }
        }
    }

    parse_into(
        "PIPEBRIDGE_BUFFER_SIZE",
        lookup("PIPEBRIDGE_BUFFER_SIZE"),
        &mut settings.buffer_size,
    );
    parse_into(
        "PIPEBRIDGE_RETRY_DELAY_MS",
        lookup("PIPEBRIDGE_RETRY_DELAY_MS"),
        &mut settings.retry_delay_ms,
    );
    parse_into(
        "PIPEBRIDGE_TERMINATE_GRACE_MS",
        lookup("PIPEBRIDGE_TERMINATE_GRACE_MS"),
        &mut settings.terminate_grace_ms,
    );
    parse_into(
        "PIPEBRIDGE_SHUTDOWN_GRACE_MS",
        lookup("PIPEBRIDGE_SHUTDOWN_GRACE_MS"),
        &mut settings.shutdown_grace_ms,
    );
    parse_into(
        "PIPEBRIDGE_IDLE_TIMEOUT_MS",
        lookup("PIPEBRIDGE_IDLE_TIMEOUT_MS"),
        &mut settings.idle_timeout_ms,
    );
    parse_into(
        "PIPEBRIDGE_POLL_INTERVAL_SECS",
        lookup("PIPEBRIDGE_POLL_INTERVAL_SECS"),
        &mut settings.poll_interval_secs,
    );
    if let Some(level) = lookup("PIPEBRIDGE_LOG_LEVEL") {
        settings.log_level = level;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_observed_behaviour() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.buffer_size, 32 * 1024);
        assert_eq!(settings.retry_delay(), Duration::from_secs(2));
        assert_eq!(settings.poll_interval(), Some(Duration::from_secs(2)));
        assert!(settings.idle_timeout().is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"buffer_size": 512, "idle_timeout_ms": 1000}"#).unwrap();

        let settings = load_settings_file(&path).unwrap();
        assert_eq!(settings.buffer_size, 512);
        assert_eq!(settings.idle_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(settings.retry_delay_ms, 2000);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_settings(Some(&dir.path().join("nope.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("PIPEBRIDGE_BUFFER_SIZE", "4096"),
            ("PIPEBRIDGE_RETRY_DELAY_MS", "not-a-number"),
            ("PIPEBRIDGE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut settings = BridgeSettings::default();
        apply_env_overrides(&mut settings, |k| env.get(k).map(ToString::to_string));

        assert_eq!(settings.buffer_size, 4096);
        assert_eq!(settings.retry_delay_ms, 2000);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn loading_leaves_validation_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"buffer_size": 0}"#).unwrap();

        let mut settings = load_settings(Some(&path)).unwrap();
        assert!(settings.validate().is_err());
        settings.buffer_size = 4096;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let settings = BridgeSettings {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
