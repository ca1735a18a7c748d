// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::ManagedProcess;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant, sleep};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2500);
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// How a `terminate` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Already gone before we signalled it.
    AlreadyExited,
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL.
    Killed,
}

/// Deliver `sig` to the child's process group, or to the child alone when the
/// group cannot be signalled. A process that no longer exists counts as
/// delivered.
fn send_signal(proc: &ManagedProcess, sig: Signal) -> nix::Result<()> {
    let pid = Pid::from_raw(proc.pid() as i32);
    match signal::killpg(pid, sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) if proc.has_exited() => Ok(()),
        Err(e) => {
            debug!("[{}] killpg {sig} failed ({e}), signalling pid only", proc.name);
            match signal::kill(pid, sig) {
                Err(Errno::ESRCH) => Ok(()),
                other => other,
            }
        }
    }
}

async fn exited_within(proc: &ManagedProcess, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if proc.has_exited() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// SIGTERM the child's group, wait up to `grace`, then SIGKILL stragglers and
/// wait for the exit to be observed.
pub async fn terminate(proc: &ManagedProcess, grace: Duration) -> StopOutcome {
    if proc.has_exited() {
        return StopOutcome::AlreadyExited;
    }

    info!("[{}] sending SIGTERM", proc.name);
    if let Err(e) = send_signal(proc, Signal::SIGTERM) {
        warn!("[{}] failed to send SIGTERM: {e}", proc.name);
    }
    if exited_within(proc, grace).await {
        return StopOutcome::Graceful;
    }

    warn!(
        "[{}] grace period ({}ms) elapsed, sending SIGKILL",
        proc.name,
        grace.as_millis()
    );
    if let Err(e) = send_signal(proc, Signal::SIGKILL) {
        warn!("[{}] failed to send SIGKILL: {e}", proc.name);
        return StopOutcome::Killed;
    }
    if !exited_within(proc, KILL_CONFIRM_TIMEOUT).await {
        warn!("[{}] still running after SIGKILL, giving up", proc.name);
    }
    StopOutcome::Killed
}

/// Stop every process concurrently; each stop is awaited independently.
pub async fn terminate_all(processes: Vec<ManagedProcess>, grace: Duration) {
    let mut stops = JoinSet::new();
    for proc in processes {
        stops.spawn(async move {
            terminate(&proc, grace).await;
        });
    }
    while let Some(res) = stops.join_next().await {
        if let Err(e) = res {
            warn!("stop task failed: {e}");
        }
    }
}
