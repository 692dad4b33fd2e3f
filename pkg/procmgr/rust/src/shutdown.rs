// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::SupervisorError;
use crate::process::{Control, ManagedProcess, RuntimeHandle};
use crate::state::ProcessStatus;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::{Duration, Instant, sleep};

/// How long a process gets to honor the interrupt before it is killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for the reaper to confirm a kill.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Interrupt the process, wait up to [`STOP_TIMEOUT`], then kill it.
///
/// Succeeds once the process is gone, whichever way it went. Fails only when
/// nothing is attached to the entry.
pub(crate) async fn stop_process(proc: &ManagedProcess) -> Result<(), SupervisorError> {
    let graceful = {
        let mut state = proc.state();
        if state.handle.is_none() {
            return Err(SupervisorError::NotAttached {
                id: proc.id.clone(),
            });
        }
        // Stopping must be visible before any signal lands, so the reaper
        // never records this exit as Respawn.
        state.transition(&proc.id, ProcessStatus::Stopping);
        let graceful = RuntimeHandle::supports_interrupt();
        if let Some(handle) = state.handle.as_ref() {
            if graceful {
                info!("[{}] shutting down {} with SIGINT", proc.id, proc.spec.exec);
                handle.send(Control::Interrupt);
            } else {
                info!("[{}] shutting down {} with kill", proc.id, proc.spec.exec);
                handle.send(Control::Kill);
            }
        }
        graceful
    };

    if graceful && !wait_detached(proc, STOP_TIMEOUT).await {
        warn!(
            "[{}] stop timeout ({}s) reached, sending SIGKILL",
            proc.id,
            STOP_TIMEOUT.as_secs()
        );
        if let Some(handle) = proc.state().handle.as_ref() {
            handle.send(Control::Kill);
        }
    }

    if !wait_detached(proc, KILL_CONFIRM_TIMEOUT).await {
        warn!("[{}] still attached after kill, giving up", proc.id);
    }

    proc.state().transition(&proc.id, ProcessStatus::Stopped);
    info!("[{}] stopped", proc.id);
    Ok(())
}

/// Poll until the reaper has cleared the runtime handle or `timeout` elapses.
async fn wait_detached(proc: &ManagedProcess, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !proc.is_attached() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        debug!("[{}] waiting for shutdown...", proc.id);
        sleep(STOP_POLL_INTERVAL).await;
    }
}

/// Stop every attached process concurrently.
pub(crate) async fn shutdown_all(processes: Vec<Arc<ManagedProcess>>) {
    let mut tasks = Vec::new();
    for proc in processes {
        if !proc.is_attached() {
            continue;
        }
        tasks.push(tokio::spawn(async move {
            // Detached in the meantime: nothing to do.
            let _ = stop_process(&proc).await;
        }));
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!("stop task failed: {e}");
        }
    }
}
