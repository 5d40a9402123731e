//! Parent process liveness watch.
//!
//! A bridge started by another program should not outlive it. The watch
//! polls the process table at a fixed interval and cancels the shared token
//! once the watched process is gone, so the ordinary shutdown path runs.

use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a parent watch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentWatchOutcome {
    /// The watched process disappeared; the token was cancelled.
    ParentExited,
    /// The token was cancelled by someone else first.
    Cancelled,
}

/// PID of the current process's parent.
pub fn parent_process_id() -> Option<u32> {
    #[cfg(unix)]
    {
        Some(std::os::unix::process::parent_id())
    }

    #[cfg(not(unix))]
    {
        let me = sysinfo::get_current_pid().ok()?;
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[me]), true);
        system.process(me)?.parent().map(Pid::as_u32)
    }
}

/// Whether `pid` names a running process. Zombies count as gone.
pub fn is_process_alive(system: &mut System, pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// Poll `pid` every `interval` until it exits or `cancel` fires.
pub fn spawn_parent_watch(
    pid: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<ParentWatchOutcome> {
    tokio::spawn(async move {
        let mut system = System::new();
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(pid, interval_ms = interval.as_millis(), "Watching parent process");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if !is_process_alive(&mut system, pid) {
                        warn!(pid, "Parent process is gone, shutting down");
                        cancel.cancel();
                        return ParentWatchOutcome::ParentExited;
                    }
                }
                () = cancel.cancelled() => {
                    debug!(pid, "Parent watch stopped");
                    return ParentWatchOutcome::Cancelled;
                }
            }
        }
    })
}
