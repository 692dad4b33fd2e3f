// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::env::parse_env_list;
use crate::errors::SupervisorError;
use crate::protocol::ProcessSummary;
use crate::relay::{StdStreamMessage, StreamKind, StreamRelay, Subscription};
use crate::state::ProcessStatus;
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

const READ_CHUNK_SIZE: usize = 4096;

/// What to run. Captured once at start and never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` entries. Empty means inherit the supervisor's environment.
    pub env: Vec<String>,
    /// Empty means inherit the supervisor's working directory.
    pub cwd: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Interrupt,
    Kill,
}

/// Handle to an attached OS process. The child itself is owned by the reaper
/// task; this side only asks it to deliver signals.
pub(crate) struct RuntimeHandle {
    pid: Option<u32>,
    control: mpsc::Sender<Control>,
}

impl RuntimeHandle {
    /// Whether this platform has a graceful interrupt to try before killing.
    pub(crate) const fn supports_interrupt() -> bool {
        cfg!(unix)
    }

    pub(crate) fn send(&self, ctl: Control) {
        if self.control.try_send(ctl).is_err() {
            debug!("control request {ctl:?} not queued, reaper already busy or gone");
        }
    }
}

/// A child that is attached to its entry but not yet served.
pub(crate) struct Spawned {
    child: Child,
    control_rx: mpsc::Receiver<Control>,
}

/// Mutable part of a table entry. Always accessed under the entry's lock.
pub(crate) struct ProcessState {
    pub(crate) status: ProcessStatus,
    pub(crate) exit_code: i32,
    pub(crate) start_count: u32,
    pub(crate) fail_count: u32,
    /// Reserved for a respawn policy; nothing in this crate drives it.
    pub(crate) respawn_delay_ms: u64,
    pub(crate) last_started: Option<Instant>,
    pub(crate) handle: Option<RuntimeHandle>,
}

impl ProcessState {
    pub(crate) fn transition(&mut self, id: &str, next: ProcessStatus) {
        if !self.status.can_transition_to(next) {
            warn!("[{id}] unexpected transition {} -> {next}", self.status);
        }
        self.status = next;
    }
}

/// One entry of the process table.
pub struct ManagedProcess {
    pub id: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub spec: LaunchSpec,
    state: Mutex<ProcessState>,
    output: StreamRelay,
    input: StreamRelay,
}

impl ManagedProcess {
    pub(crate) fn new(
        id: String,
        name: Option<String>,
        namespace: Option<String>,
        spec: LaunchSpec,
        relay_capacity: usize,
    ) -> Self {
        Self {
            id,
            name,
            namespace,
            spec,
            state: Mutex::new(ProcessState {
                status: ProcessStatus::Starting,
                exit_code: 0,
                start_count: 0,
                fail_count: 0,
                respawn_delay_ms: 0,
                last_started: None,
                handle: None,
            }),
            output: StreamRelay::new(relay_capacity),
            input: StreamRelay::new(relay_capacity),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> ProcessStatus {
        self.state().status
    }

    pub fn exit_code(&self) -> i32 {
        self.state().exit_code
    }

    pub fn is_attached(&self) -> bool {
        self.state().handle.is_some()
    }

    /// Combined stdout/stderr of the process.
    pub fn output_relay(&self) -> &StreamRelay {
        &self.output
    }

    /// Chunks published here are written to the process's stdin.
    pub fn input_relay(&self) -> &StreamRelay {
        &self.input
    }

    pub(crate) fn close_relays(&self) {
        self.output.close();
        self.input.close();
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.spec.exec);
        cmd.args(&self.spec.args);

        if !self.spec.env.is_empty() {
            cmd.env_clear();
            cmd.envs(parse_env_list(&self.spec.env));
        }

        if !self.spec.cwd.is_empty() {
            cmd.current_dir(&self.spec.cwd);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Spawn the OS process and the tasks that serve it.
    ///
    /// Must run inside a tokio runtime. On failure the entry is left `Failed`.
    #[cfg(test)]
    pub(crate) fn launch(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let spawned = self.spawn_attached(&mut self.state())?;
        self.serve(spawned);
        Ok(())
    }

    /// Spawn the OS process and attach it to `state`, which the caller holds
    /// locked so nobody observes the entry between spawn and attach.
    pub(crate) fn spawn_attached(
        &self,
        state: &mut ProcessState,
    ) -> Result<Spawned, SupervisorError> {
        let child = match self.command().spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!("[{}] failed to spawn {}: {source}", self.id, self.spec.exec);
                state.fail_count += 1;
                state.transition(&self.id, ProcessStatus::Failed);
                return Err(SupervisorError::SpawnFailure {
                    exec: self.spec.exec.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        info!(
            "[{}] spawned (pid={}, cmd={})",
            self.id,
            pid.unwrap_or(0),
            self.spec.exec
        );

        let (control_tx, control_rx) = mpsc::channel(4);
        state.handle = Some(RuntimeHandle {
            pid,
            control: control_tx,
        });
        state.start_count += 1;
        state.exit_code = 0;
        state.last_started = Some(Instant::now());
        state.transition(&self.id, ProcessStatus::Running);

        Ok(Spawned { child, control_rx })
    }

    /// Start the pumps, the stdin forwarder and the reaper for a spawned child.
    pub(crate) fn serve(self: &Arc<Self>, spawned: Spawned) {
        let Spawned {
            mut child,
            control_rx,
        } = spawned;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(
                self.id.clone(),
                stdout,
                self.output.clone(),
                StreamKind::Stdout,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(
                self.id.clone(),
                stderr,
                self.output.clone(),
                StreamKind::Stderr,
            ));
        }
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(forward_input(
                self.id.clone(),
                stdin,
                self.input.subscribe(),
            ));
        }
        tokio::spawn(reap(Arc::clone(self), child, control_rx));
    }

    /// Pid of the attached process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.state().handle.as_ref().and_then(|h| h.pid)
    }

    pub fn summary(&self) -> ProcessSummary {
        let state = self.state();
        let uptime = match (state.status, state.last_started) {
            (ProcessStatus::Running, Some(started)) => {
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
            }
            _ => 0,
        };
        ProcessSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            exec: self.spec.exec.clone(),
            args: self.spec.args.clone(),
            env: self.spec.env.clone(),
            cwd: self.spec.cwd.clone(),
            uptime,
            status: state.status,
            exit_code: state.exit_code,
            start_count: state.start_count,
            fail_count: state.fail_count,
            respawn_delay: state.respawn_delay_ms,
        }
    }
}

/// Copy one output pipe into the relay until end-of-stream.
async fn pump_output<R>(id: String, mut reader: R, relay: StreamRelay, stream: StreamKind)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => relay.publish(StdStreamMessage::new(
                stream,
                Bytes::copy_from_slice(&buf[..n]),
            )),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("[{id}] error while reading {stream}: {e}");
                break;
            }
        }
    }
    debug!("[{id}] {stream} reached end of stream");
}

/// Write chunks published to the input relay into the child's stdin.
async fn forward_input(id: String, mut stdin: ChildStdin, mut sub: Subscription<StdStreamMessage>) {
    while let Some(msg) = sub.recv().await {
        if msg.stream != StreamKind::Stdin {
            continue;
        }
        if let Err(e) = stdin.write_all(&msg.data).await {
            debug!("[{id}] stdin closed: {e}");
            return;
        }
        if let Err(e) = stdin.flush().await {
            debug!("[{id}] stdin flush failed: {e}");
            return;
        }
    }
    debug!("[{id}] input relay closed, releasing stdin");
}

/// Wait for the child to exit, acting on signal requests in the meantime,
/// then record the outcome on the entry.
async fn reap(proc: Arc<ManagedProcess>, mut child: Child, mut control: mpsc::Receiver<Control>) {
    let result = loop {
        tokio::select! {
            res = child.wait() => break res,
            Some(ctl) = control.recv() => deliver(&proc.id, &mut child, ctl),
        }
    };

    let exit_code = match result {
        Ok(status) => {
            info!("[{}] exited with {status}", proc.id);
            exit_code_of(status)
        }
        Err(e) => {
            error!("[{}] failed to wait on child: {e}", proc.id);
            -1
        }
    };

    let mut state = proc.state();
    state.exit_code = exit_code;
    state.handle = None;
    match state.status {
        ProcessStatus::Running => state.transition(&proc.id, ProcessStatus::Respawn),
        ProcessStatus::Stopping => state.transition(&proc.id, ProcessStatus::Stopped),
        _ => {}
    }
}

fn deliver(id: &str, child: &mut Child, ctl: Control) {
    match ctl {
        #[cfg(unix)]
        Control::Interrupt => {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let Some(pid) = child.id() else {
                return;
            };
            let Ok(raw) = i32::try_from(pid) else {
                warn!("[{id}] pid {pid} out of range, cannot signal");
                return;
            };
            info!("[{id}] sending SIGINT");
            if let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGINT) {
                warn!("[{id}] failed to send SIGINT: {e}");
            }
        }
        #[cfg(not(unix))]
        Control::Interrupt => deliver(id, child, Control::Kill),
        Control::Kill => {
            info!("[{id}] sending SIGKILL");
            if let Err(e) = child.start_kill() {
                warn!("[{id}] failed to kill: {e}");
            }
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    // Killed by a signal: no code.
    status.code().unwrap_or(-1)
}
