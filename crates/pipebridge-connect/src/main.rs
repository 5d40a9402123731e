//! pipebridge client
//!
//! Dials a local Unix socket (retrying at a fixed delay until it appears),
//! spawns one carrier process and relays bytes between the socket and the
//! carrier's stdin/stdout until either side ends.

mod args;

use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};

use pipebridge_core::controller::ClientController;
use pipebridge_core::pidfile::{derive_pid_path, write_pid_file};
use pipebridge_core::session::{SessionConfig, SessionRegistry};
use pipebridge_core::subprocess::{CarrierCommand, TemplateVars, ensure_program_exists};
use pipebridge_core::tracing_init::{default_filter, init_tracing};
use pipebridge_core::transport::{DialRetry, LocalAddress};
use pipebridge_core::ShutdownCoordinator;

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let settings = args.resolve_settings()?;

    init_tracing(
        &default_filter("pipebridge_connect", &settings.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %args.socket,
        pipe = %args.pipe,
        buffer_size = settings.buffer_size,
        "Starting pipebridge-connect"
    );

    let address = LocalAddress::parse(&args.socket).context("Socket path is invalid")?;
    address.ensure_supported()?;
    if args.pipe.trim().is_empty() {
        bail!("Named pipe is blank/empty");
    }
    let program = ensure_program_exists(&args.relay_program_path)
        .context("Relay program is not usable")?;

    if let Some(path) = &args.pid_file {
        write_pid_file(path, std::process::id())?;
    }
    let carrier_pid_file = args
        .pid_file
        .as_deref()
        .map(|path| derive_pid_path(path, "relay-linux"));
    let remote_pid_file = args
        .pid_file
        .as_deref()
        .map(|path| derive_pid_path(path, "relay-windows").display().to_string())
        .unwrap_or_default();

    let vars = TemplateVars::new()
        .with("pipe", &args.pipe)
        .with("socket", &args.socket)
        .with("distribution", &args.distribution)
        .with("parent_pid", std::process::id().to_string())
        .with("permissions", &args.permissions)
        .with("pid_file", remote_pid_file)
        .with("relay_program", program.display().to_string())
        .with("buffer_size", settings.buffer_size.to_string());
    let command = CarrierCommand::new(program).with_args(args.carrier_template().render(&vars)?);
    info!(command = %command, "Carrier command prepared");

    let registry = SessionRegistry::new();
    let mut coordinator = ShutdownCoordinator::install(registry.clone(), settings.shutdown_grace())
        .context("Failed to install signal handlers")?;
    let cancel = coordinator.token();

    let mut session = SessionConfig::new(command, &settings);
    session.carrier_pid_file = carrier_pid_file;
    let controller = ClientController::new(
        address,
        DialRetry::fixed(settings.retry_delay()),
        session,
        registry,
    );

    let mut client = tokio::spawn(async move { controller.run(&cancel).await });

    let exit_code = tokio::select! {
        joined = &mut client => match joined {
            Ok(outcome) => outcome.exit_code(),
            Err(e) => {
                warn!(error = %e, "Client task failed");
                1
            }
        },
        _ = coordinator.wait_for_trigger() => {
            coordinator.shutdown().await;
            match tokio::time::timeout(settings.shutdown_grace(), client).await {
                Ok(Ok(outcome)) => {
                    info!(?outcome, "Client stopped");
                }
                Ok(Err(e)) => warn!(error = %e, "Client task failed during shutdown"),
                Err(_) => warn!("Client did not stop within the grace period"),
            }
            0
        }
    };

    info!(exit_code, "pipebridge-connect stopped");
    Ok(ExitCode::from(exit_code))
}
