// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running dd-procmuxd service.
pub struct DaemonHandle {
    child: Child,
    socket: PathBuf,
    log_lines: Arc<Mutex<Vec<String>>>,
    _readers: Vec<std::thread::JoinHandle<()>>,
}

fn capture<R: Read + Send + 'static>(
    stream: R,
    tag: &'static str,
    lines: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{tag}] {l}");
                    lines.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

impl DaemonHandle {
    /// Start the service listening on `socket` and wait until it accepts
    /// connections.
    pub fn start(socket: &Path) -> Self {
        let bin = env!("CARGO_BIN_EXE_dd-procmuxd");
        let mut child = Command::new(bin)
            .env("DD_PROCMUX_SOCKET", socket)
            .env_remove("DD_PROCMUX_CONFIG")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start dd-procmuxd");

        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let readers = vec![
            capture(stdout, "daemon", Arc::clone(&log_lines)),
            capture(stderr, "daemon:err", Arc::clone(&log_lines)),
        ];

        let handle = Self {
            child,
            socket: socket.to_path_buf(),
            log_lines,
            _readers: readers,
        };
        assert!(
            handle.wait_for_log_default("listening on"),
            "service did not start listening"
        );
        handle
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Run the dd-procmux CLI against this service.
    pub fn cli(&self, args: &[&str]) -> Output {
        cli(&self.socket, args)
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.log_lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.contains(pattern))
        })
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to service");
    }

    /// Send SIGTERM and wait for the service to exit.
    pub fn stop(&mut self) -> std::process::ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Wait for the service to exit, killing it once `timeout` elapses.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check service status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed service");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// PIDs from "spawned (pid=NNN" log lines.
    pub fn spawned_pids(&self) -> Vec<u32> {
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter_map(|l| {
                let marker = "spawned (pid=";
                let start = l.find(marker)? + marker.len();
                let end = l[start..].find(|c: char| !c.is_ascii_digit())? + start;
                l[start..end].parse().ok()
            })
            .collect()
    }
}

impl DaemonHandle {
    /// Wait until at least `n` spawns were logged and return their PIDs.
    pub fn wait_for_pids(&self, n: usize) -> Vec<u32> {
        assert!(
            wait_until(DEFAULT_TIMEOUT, || self.spawned_pids().len() >= n),
            "expected {n} spawned process(es)"
        );
        self.spawned_pids()
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Run the dd-procmux CLI against `socket`.
pub fn cli(socket: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dd-procmux"))
        .arg("--socket")
        .arg(socket)
        .args(args)
        .output()
        .expect("failed to run dd-procmux")
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// The `ps` row for process `id`, split on whitespace.
pub fn ps_row(output: &Output, id: &str) -> Option<Vec<String>> {
    stdout_of(output)
        .lines()
        .skip(1)
        .map(|l| l.split_whitespace().map(String::from).collect::<Vec<_>>())
        .find(|cols| cols.first().map(String::as_str) == Some(id))
}

/// Poll `cond` every 50ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    wait_until(timeout, || !pid_is_alive(pid))
}
