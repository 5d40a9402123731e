//! Carrier process lifecycle.
//!
//! A carrier is an external program whose stdin/stdout become one leg of the
//! bridge. Spawning wires its stdio into an [`Endpoint`] and hands the OS
//! child to a watcher task that waits for exit and finalizes the shared
//! [`ProcessRecord`]. Termination goes through the record so any holder
//! (session, registry, shutdown coordinator) can stop the process.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::command::CarrierCommand;
use crate::endpoint::Endpoint;

/// Errors from carrier spawning.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Carrier program not found: {program}")]
    ProgramNotFound { program: String },

    #[error("Carrier program is not executable: {program}")]
    NotExecutable { program: String },

    #[error("Failed to spawn carrier {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture carrier {0}")]
    StdioUnavailable(&'static str),
}

/// How a carrier process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// Exited on its own with an exit code.
    Exited,
    /// Ended by a signal it did not handle.
    Signaled,
    /// Force-killed by the supervisor.
    Killed,
}

/// Final status of a carrier process. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub cause: ExitCause,
}

impl ExitRecord {
    fn from_status(status: std::process::ExitStatus, kill_requested: bool) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal: Option<i32> = None;

        let cause = if kill_requested && !status.success() {
            ExitCause::Killed
        } else if signal.is_some() {
            ExitCause::Signaled
        } else {
            ExitCause::Exited
        };

        Self {
            code: status.code(),
            signal,
            cause,
        }
    }

    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Shared record of one carrier process.
#[derive(Debug)]
pub struct ProcessRecord {
    pid: u32,
    program: String,
    started_at: Instant,
    exit: watch::Sender<Option<ExitRecord>>,
    terminate_requested: AtomicBool,
    kill_requested: AtomicBool,
    kill: Notify,
}

impl ProcessRecord {
    fn new(pid: u32, program: String) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            pid,
            program,
            started_at: Instant::now(),
            exit,
            terminate_requested: AtomicBool::new(false),
            kill_requested: AtomicBool::new(false),
            kill: Notify::new(),
        }
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Exit status, once the process has been reaped.
    pub fn exit(&self) -> Option<ExitRecord> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit().is_some()
    }

    /// Wait until the process has exited.
    pub async fn wait(&self) -> ExitRecord {
        let mut rx = self.exit.subscribe();
        loop {
            if let Some(exit) = *rx.borrow_and_update() {
                return exit;
            }
            if rx.changed().await.is_err() {
                // The sender lives in `self`, so this only happens if the
                // record is being torn down; report it as killed.
                return ExitRecord {
                    code: None,
                    signal: None,
                    cause: ExitCause::Killed,
                };
            }
        }
    }

    fn finalize(&self, record: ExitRecord) {
        self.exit.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(record);
                true
            } else {
                false
            }
        });
    }

    /// Ask the process (and its process group, on Unix) to terminate.
    ///
    /// Sends at most once. Returns `false` when the process already exited
    /// or termination was already requested.
    pub fn terminate(&self) -> bool {
        if self.has_exited() || self.terminate_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(pid = self.pid, program = %self.program, "Terminating carrier");

        #[cfg(unix)]
        {
            signal_group(self.pid, nix::sys::signal::Signal::SIGTERM);
            true
        }

        #[cfg(not(unix))]
        {
            self.kill()
        }
    }

    /// Force-kill the process. At most once; no-op after exit.
    pub fn kill(&self) -> bool {
        if self.has_exited() || self.kill_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        warn!(pid = self.pid, program = %self.program, "Force-killing carrier");
        self.kill.notify_one();
        true
    }

    /// Terminate, wait up to `grace`, then force-kill.
    pub async fn shutdown(&self, grace: Duration) -> ExitRecord {
        if let Some(exit) = self.exit() {
            return exit;
        }
        self.terminate();
        if let Ok(exit) = tokio::time::timeout(grace, self.wait()).await {
            info!(pid = self.pid, ?exit, "Carrier exited after termination request");
            return exit;
        }
        warn!(
            pid = self.pid,
            grace_ms = grace.as_millis(),
            "Timeout waiting for carrier to terminate, killing"
        );
        self.kill();
        self.wait().await
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "PID out of range for signalling");
        return;
    };
    let target = Pid::from_raw(raw);
    if let Err(group_err) = killpg(target, signal) {
        debug!(pid, error = %group_err, "Process group signal failed, signalling process");
        if let Err(e) = kill(target, signal) {
            warn!(pid, signal = %signal, error = %e, "Failed to signal carrier");
        }
    }
}

/// A running carrier process.
#[derive(Debug)]
pub struct Carrier {
    record: Arc<ProcessRecord>,
    endpoint: Option<Endpoint>,
    watcher: Option<JoinHandle<()>>,
}

impl Carrier {
    /// Spawn `command` with piped stdin/stdout and inherited stderr.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(command: &CarrierCommand) -> Result<Self, SpawnError> {
        let program = command.program.display().to_string();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        info!(command = %command, "Spawning carrier");
        let mut child = cmd.spawn().map_err(|source| SpawnError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        let pid = child
            .id()
            .ok_or(SpawnError::StdioUnavailable("process id"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or(SpawnError::StdioUnavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::StdioUnavailable("stdout"))?;

        let record = Arc::new(ProcessRecord::new(pid, program));
        let watcher = tokio::spawn(watch_child(child, Arc::clone(&record)));
        info!(pid, program = %record.program, "Carrier started");

        Ok(Self {
            record,
            endpoint: Some(Endpoint::from_carrier_stdio(stdin, stdout)),
            watcher: Some(watcher),
        })
    }

    pub fn pid(&self) -> u32 {
        self.record.pid()
    }

    pub const fn record(&self) -> &Arc<ProcessRecord> {
        &self.record
    }

    /// Take the stdio endpoint. Returns `None` after the first call.
    pub const fn take_endpoint(&mut self) -> Option<Endpoint> {
        self.endpoint.take()
    }

    pub async fn wait(&self) -> ExitRecord {
        self.record.wait().await
    }

    pub fn terminate(&self) -> bool {
        self.record.terminate()
    }

    pub async fn shutdown(&self, grace: Duration) -> ExitRecord {
        self.record.shutdown(grace).await
    }

    /// Await the watcher task. After this returns no task for this carrier
    /// remains.
    pub async fn join(mut self) {
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!(pid = self.record.pid(), error = %e, "Carrier watcher task failed");
            }
        }
    }
}

async fn watch_child(mut child: Child, record: Arc<ProcessRecord>) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = record.kill.notified() => {
            #[cfg(unix)]
            signal_group(record.pid, nix::sys::signal::Signal::SIGKILL);
            if let Err(e) = child.start_kill() {
                debug!(pid = record.pid, error = %e, "start_kill failed");
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ExitRecord::from_status(status, record.kill_requested.load(Ordering::SeqCst)),
        Err(e) => {
            warn!(pid = record.pid, error = %e, "Error waiting for carrier");
            ExitRecord {
                code: None,
                signal: None,
                cause: ExitCause::Killed,
            }
        }
    };

    info!(
        pid = record.pid,
        code = ?exit.code,
        signal = ?exit.signal,
        cause = ?exit.cause,
        uptime_ms = record.uptime().as_millis(),
        "Carrier exited"
    );
    record.finalize(exit);
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::endpoint::ReadOutcome;

    fn sh(script: &str) -> CarrierCommand {
        CarrierCommand::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn cat_echoes_through_stdio_endpoint() {
        let mut carrier = Carrier::spawn(&CarrierCommand::new("cat")).unwrap();
        let mut endpoint = carrier.take_endpoint().unwrap();
        assert!(carrier.take_endpoint().is_none());

        endpoint.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let outcome = endpoint.read(&mut buf).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Data(4));
        assert_eq!(&buf[..4], b"ping");

        endpoint.close().await.unwrap();
        let exit = carrier.wait().await;
        assert!(exit.success());
        assert_eq!(exit.cause, ExitCause::Exited);
        carrier.join().await;
    }

    #[tokio::test]
    async fn immediate_crash_reports_nonzero_exit_promptly() {
        let carrier = Carrier::spawn(&sh("exit 3")).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), carrier.wait())
            .await
            .unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
        carrier.join().await;
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = Carrier::spawn(&CarrierCommand::new("/no/such/carrier")).unwrap_err();
        assert!(matches!(err, SpawnError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn terminate_sends_once_and_is_noop_after_exit() {
        let carrier = Carrier::spawn(&CarrierCommand::new("sleep").with_args(["30"])).unwrap();

        assert!(carrier.terminate());
        assert!(!carrier.terminate());

        let exit = carrier.wait().await;
        assert_eq!(exit.cause, ExitCause::Signaled);
        assert_eq!(exit.signal, Some(libc_sigterm()));

        assert!(!carrier.record().terminate());
        assert!(!carrier.record().kill());
        carrier.join().await;
    }

    #[tokio::test]
    async fn shutdown_escalates_to_kill_after_grace() {
        let carrier = Carrier::spawn(&sh("trap '' TERM; sleep 30")).unwrap();
        // Give the shell a moment to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let exit = carrier.shutdown(Duration::from_millis(200)).await;
        assert_eq!(exit.cause, ExitCause::Killed);
        carrier.join().await;
    }

    fn libc_sigterm() -> i32 {
        nix::sys::signal::Signal::SIGTERM as i32
    }
}
