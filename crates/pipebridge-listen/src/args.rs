//! Command-line arguments for `pipebridge-listen`.

use std::path::PathBuf;

use clap::Parser;

use pipebridge_core::BridgeSettings;
use pipebridge_core::config::load_settings;
use pipebridge_core::subprocess::ArgTemplate;

/// Carrier arguments used when no `--carrier-arg` is given: run the relay
/// program inside the distribution and connect its stdio to the socket.
pub const DEFAULT_CARRIER_ARGS: &[&str] = &[
    "--distribution",
    "{distribution}",
    "--exec",
    "{relay_program}",
    "STDIO",
    "UNIX-CONNECT:{socket_spec}",
];

#[cfg(windows)]
const DEFAULT_LISTEN: &str = r"\\.\pipe\container-desktop";
#[cfg(not(windows))]
const DEFAULT_LISTEN: &str = "/tmp/pipebridge.sock";

#[derive(Parser, Debug)]
#[command(name = "pipebridge-listen")]
#[command(
    version,
    about = "pipebridge server - accepts local connections and bridges each through its own carrier process"
)]
pub struct Args {
    /// Transport to listen on: a named pipe (`\\.\pipe\...`) or a Unix socket path
    #[arg(long, alias = "listen", default_value = DEFAULT_LISTEN, env = "PIPEBRIDGE_NAMED_PIPE")]
    pub named_pipe: String,

    /// Unix socket the carrier connects to on the far side
    #[arg(long, default_value = "/var/run/docker.sock", env = "PIPEBRIDGE_UNIX_SOCKET")]
    pub unix_socket: String,

    /// WSL distribution name of the parent process
    #[arg(long, default_value = "", env = "WSL_DISTRO_NAME")]
    pub distribution: String,

    /// Process ID reported by the parent (logged for diagnostics)
    #[arg(long)]
    pub parent_pid: Option<i64>,

    /// Parent process polling interval in seconds (0 disables the watch)
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Access specifier: AllowEveryone, AllowCurrentUser,
    /// AllowServiceSystemAdmin, or a raw platform string
    #[arg(long, default_value = "AllowCurrentUser", env = "PIPEBRIDGE_PERMISSIONS")]
    pub permissions: String,

    /// I/O buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// PID file for this process
    #[arg(long, env = "PIPEBRIDGE_PID_FILE")]
    pub pid_file: Option<PathBuf>,

    /// Carrier program spawned for each connection
    #[arg(long, default_value = "wsl.exe", env = "PIPEBRIDGE_CARRIER")]
    pub carrier: PathBuf,

    /// Relay program the carrier executes on the far side
    #[arg(long, default_value = "./socat-static", env = "PIPEBRIDGE_RELAY_PROGRAM_PATH")]
    pub relay_program_path: String,

    /// Extra options appended to the far-side socket address
    #[arg(long, default_value = "", env = "PIPEBRIDGE_RELAY_PROGRAM_OPTIONS")]
    pub relay_program_options: String,

    /// Carrier argument, repeatable. `{name}` placeholders are substituted;
    /// when given, replaces the default argument list.
    #[arg(long = "carrier-arg", allow_hyphen_values = true)]
    pub carrier_args: Vec<String>,

    /// End a session after this many milliseconds without data from the
    /// local connection (0 keeps sessions open)
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

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
        if let Some(secs) = self.poll_interval {
            settings.poll_interval_secs = secs;
        }
        if let Some(ms) = self.idle_timeout_ms {
            settings.idle_timeout_ms = ms;
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
    }

    /// Far-side socket address with the relay program options appended.
    pub fn socket_spec(&self) -> String {
        if self.relay_program_options.is_empty() {
            self.unix_socket.clone()
        } else {
            format!("{},{}", self.unix_socket, self.relay_program_options)
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
        let args = Args::try_parse_from(["pipebridge-listen"]).unwrap();
        assert_eq!(args.named_pipe, DEFAULT_LISTEN);
        assert_eq!(args.carrier, PathBuf::from("wsl.exe"));
        assert_eq!(args.relay_program_path, "./socat-static");
        assert!(args.parent_pid.is_none());
        assert_eq!(args.socket_spec(), "/var/run/docker.sock");
    }

    #[test]
    fn socket_spec_appends_relay_options() {
        let args = Args::try_parse_from([
            "pipebridge-listen",
            "--unix-socket",
            "/run/podman/podman.sock",
            "--relay-program-options",
            "retry=5",
        ])
        .unwrap();
        assert_eq!(args.socket_spec(), "/run/podman/podman.sock,retry=5");
    }

    #[test]
    fn listen_alias_and_negative_parent_pid() {
        let args = Args::try_parse_from([
            "pipebridge-listen",
            "--listen",
            "/tmp/bridge.sock",
            "--parent-pid=-1",
        ])
        .unwrap();
        assert_eq!(args.named_pipe, "/tmp/bridge.sock");
        assert_eq!(args.parent_pid, Some(-1));
    }

    #[test]
    fn overrides_poll_interval_and_idle_timeout() {
        let args = Args::try_parse_from([
            "pipebridge-listen",
            "--poll-interval",
            "0",
            "--idle-timeout-ms",
            "1000",
        ])
        .unwrap();
        let mut settings = BridgeSettings::default();
        args.apply_overrides(&mut settings);
        assert!(settings.poll_interval().is_none());
        assert_eq!(
            settings.idle_timeout(),
            Some(std::time::Duration::from_secs(1))
        );
    }

    #[test]
    fn default_template_renders_wsl_invocation() {
        let args = Args::try_parse_from(["pipebridge-listen", "--distribution", "podman"]).unwrap();
        let vars = pipebridge_core::subprocess::TemplateVars::new()
            .with("distribution", &args.distribution)
            .with("relay_program", &args.relay_program_path)
            .with("socket_spec", args.socket_spec());
        assert_eq!(
            args.carrier_template().render(&vars).unwrap(),
            [
                "--distribution",
                "podman",
                "--exec",
                "./socat-static",
                "STDIO",
                "UNIX-CONNECT:/var/run/docker.sock",
            ]
        );
    }
}
