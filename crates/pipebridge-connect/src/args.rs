//! Command-line arguments for `pipebridge-connect`.

use std::path::PathBuf;

use clap::Parser;

use pipebridge_core::BridgeSettings;
use pipebridge_core::config::load_settings;
use pipebridge_core::subprocess::ArgTemplate;

/// Carrier arguments used when no `--carrier-arg` is given.
pub const DEFAULT_CARRIER_ARGS: &[&str] = &[
    "--pipe",
    "{pipe}",
    "--distribution",
    "{distribution}",
    "--parent-pid",
    "{parent_pid}",
    "--permissions",
    "{permissions}",
    "--pid-file",
    "{pid_file}",
];

#[derive(Parser, Debug)]
#[command(name = "pipebridge-connect")]
#[command(
    version,
    about = "pipebridge client - bridges a local Unix socket through a carrier process"
)]
pub struct Args {
    /// Local Unix socket to dial
    #[arg(long, default_value = "/var/run/docker.sock", env = "PIPEBRIDGE_SOCKET")]
    pub socket: String,

    /// Named pipe the carrier relays to
    #[arg(long, default_value = r"\\.\pipe\container-desktop", env = "PIPEBRIDGE_PIPE")]
    pub pipe: String,

    /// WSL distribution name forwarded to the carrier
    #[arg(long, default_value = "", env = "WSL_DISTRO_NAME")]
    pub distribution: String,

    /// Carrier program (the named pipe relay executable)
    #[arg(
        long,
        default_value = "container-desktop-wsl-relay.exe",
        env = "PIPEBRIDGE_RELAY_PROGRAM_PATH"
    )]
    pub relay_program_path: PathBuf,

    /// Carrier argument, repeatable. `{name}` placeholders are substituted;
    /// when given, replaces the default argument list.
    #[arg(long = "carrier-arg", allow_hyphen_values = true)]
    pub carrier_args: Vec<String>,

    /// Access specifier forwarded to the carrier
    #[arg(long, default_value = "AllowCurrentUser", env = "PIPEBRIDGE_PERMISSIONS")]
    pub permissions: String,

    /// I/O buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// PID file for this process; carrier PID files are derived from it
    #[arg(long, env = "PIPEBRIDGE_PID_FILE")]
    pub pid_file: Option<PathBuf>,

    /// Delay between dial attempts, in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// JSON settings file
    #[arg(long, env = "PIPEBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "PIPEBRIDGE_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    /// Settings file and environment, then command-line overrides.
    pub fn resolve_settings(&self) -> pipebridge_core::Result<BridgeSettings> {
        let mut settings = load_settings(self.config.as_deref())?;
        self.apply_overrides(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut BridgeSettings) {
        if let Some(size) = self.buffer_size {
            settings.buffer_size = size;
        }
        if let Some(delay) = self.retry_delay_ms {
            settings.retry_delay_ms = delay;
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
    }

    pub fn carrier_template(&self) -> ArgTemplate {
        if self.carrier_args.is_empty() {
            ArgTemplate::new(DEFAULT_CARRIER_ARGS.iter().copied())
        } else {
            ArgTemplate::new(self.carrier_args.iter().cloned())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["pipebridge-connect"]).unwrap();
        assert_eq!(args.socket, "/var/run/docker.sock");
        assert_eq!(args.pipe, r"\\.\pipe\container-desktop");
        assert_eq!(args.permissions, "AllowCurrentUser");
        assert!(args.pid_file.is_none());
        assert_eq!(args.carrier_template().args().len(), DEFAULT_CARRIER_ARGS.len());
    }

    #[test]
    fn carrier_args_replace_default_template() {
        let args = Args::try_parse_from([
            "pipebridge-connect",
            "--relay-program-path",
            "/usr/bin/socat",
            "--carrier-arg",
            "-",
            "--carrier-arg",
            "UNIX-CONNECT:{socket}",
        ])
        .unwrap();
        assert_eq!(args.carrier_template().args(), ["-", "UNIX-CONNECT:{socket}"]);
    }

    #[test]
    fn cli_overrides_settings() {
        let args = Args::try_parse_from([
            "pipebridge-connect",
            "--buffer-size",
            "512",
            "--retry-delay-ms",
            "100",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let mut settings = BridgeSettings::default();
        args.apply_overrides(&mut settings);
        assert_eq!(settings.buffer_size, 512);
        assert_eq!(settings.retry_delay_ms, 100);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn settings_file_is_layered_under_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"buffer_size": 1024, "retry_delay_ms": 750}"#).unwrap();

        let args = Args::try_parse_from([
            "pipebridge-connect",
            "--config",
            path.to_str().unwrap(),
            "--buffer-size",
            "2048",
        ])
        .unwrap();
        let settings = args.resolve_settings().unwrap();
        assert_eq!(settings.buffer_size, 2048);
        assert_eq!(settings.retry_delay_ms, 750);
    }

    #[test]
    fn flag_repairs_invalid_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"buffer_size": 0}"#).unwrap();

        let args = Args::try_parse_from([
            "pipebridge-connect",
            "--config",
            path.to_str().unwrap(),
            "--buffer-size",
            "4096",
        ])
        .unwrap();
        assert_eq!(args.resolve_settings().unwrap().buffer_size, 4096);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let args = Args::try_parse_from(["pipebridge-connect", "--buffer-size", "0"]).unwrap();
        let mut settings = BridgeSettings::default();
        args.apply_overrides(&mut settings);
        assert!(settings.validate().is_err());
    }
}
