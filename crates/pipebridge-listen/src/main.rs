//! pipebridge server
//!
//! Listens on a local transport (a Windows named pipe or a Unix socket) and
//! bridges every accepted connection through its own carrier process.

mod args;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{debug, info, warn};

use pipebridge_core::access::AccessPolicy;
use pipebridge_core::controller::ServerController;
use pipebridge_core::endpoint::ReadDeadline;
use pipebridge_core::parent_watch::{parent_process_id, spawn_parent_watch};
use pipebridge_core::pidfile::write_pid_file;
use pipebridge_core::session::{SessionConfig, SessionRegistry};
use pipebridge_core::subprocess::{CarrierCommand, TemplateVars, ensure_program_exists};
use pipebridge_core::tracing_init::{default_filter, init_tracing};
use pipebridge_core::transport::{LocalAddress, LocalListener};
use pipebridge_core::ShutdownCoordinator;

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.resolve_settings()?;

    init_tracing(
        &default_filter("pipebridge_listen", &settings.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.named_pipe,
        unix_socket = %args.unix_socket,
        buffer_size = settings.buffer_size,
        "Starting pipebridge-listen"
    );

    if args.named_pipe.trim().is_empty() {
        bail!("Named pipe is blank/empty");
    }
    let address = LocalAddress::parse(&args.named_pipe).context("Listen address is invalid")?;
    address.ensure_supported()?;
    let carrier = ensure_program_exists(&args.carrier).context("Carrier program is not usable")?;

    if let Some(pid) = args.parent_pid {
        info!(parent_pid = pid, "Parent process reported");
    }

    let access = AccessPolicy::parse(&args.permissions);
    let descriptor = access
        .resolve()
        .context("Access policy cannot be applied")?;
    info!(permissions = %access, %descriptor, "Access policy resolved");

    let vars = TemplateVars::new()
        .with("pipe", &args.named_pipe)
        .with("socket", &args.unix_socket)
        .with("socket_spec", args.socket_spec())
        .with("distribution", &args.distribution)
        .with("parent_pid", std::process::id().to_string())
        .with("permissions", &args.permissions)
        .with("relay_program", &args.relay_program_path)
        .with("buffer_size", settings.buffer_size.to_string());
    let command = CarrierCommand::new(carrier).with_args(args.carrier_template().render(&vars)?);
    info!(command = %command, "Carrier command prepared");

    let listener = LocalListener::bind(&address, &access, settings.buffer_size)
        .with_context(|| format!("Failed to listen on {address}"))?;

    if let Some(path) = &args.pid_file {
        write_pid_file(path, std::process::id())?;
    }

    let registry = SessionRegistry::new();
    let mut coordinator = ShutdownCoordinator::install(registry.clone(), settings.shutdown_grace())
        .context("Failed to install signal handlers")?;
    let cancel = coordinator.token();

    let mut session = SessionConfig::new(command, &settings);
    session.local_deadline = settings.idle_timeout().map(ReadDeadline::end_session_after);
    let server = ServerController::new(listener, session, registry);

    let parent_watch = match (settings.poll_interval(), parent_process_id()) {
        (Some(interval), Some(ppid)) => Some(spawn_parent_watch(ppid, interval, cancel.clone())),
        (Some(_), None) => {
            warn!("Parent process ID unavailable, parent watch disabled");
            None
        }
        (None, _) => None,
    };

    let server_handle = tokio::spawn(server.run(cancel));

    // `true` unsets $NOTIFY_SOCKET so carrier processes cannot notify systemd.
    #[cfg(unix)]
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        debug!(error = %e, "Readiness notification failed");
    }

    let trigger = coordinator.wait_for_trigger().await;
    info!(?trigger, "Shutdown triggered");
    let report = coordinator.shutdown().await;
    info!(
        terminated = report.terminated,
        killed = report.killed,
        drained = report.drained,
        "Carriers stopped"
    );

    match tokio::time::timeout(settings.shutdown_grace(), server_handle).await {
        Ok(Ok(summary)) => info!(
            accepted = summary.accepted,
            completed = summary.completed,
            failed = summary.failed,
            accept_errors = summary.accept_errors,
            "Server stopped"
        ),
        Ok(Err(e)) => warn!(error = %e, "Server task failed"),
        Err(_) => warn!("Server did not stop within the grace period"),
    }

    if let Some(handle) = parent_watch {
        match handle.await {
            Ok(outcome) => info!(?outcome, "Parent watch finished"),
            Err(e) => warn!(error = %e, "Parent watch task failed"),
        }
    }

    info!("pipebridge-listen stopped");
    Ok(())
}
