// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::output::OutputBuffer;
use log::{info, warn};
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};

pub const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Everything needed to (re)start a child.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Complete environment; the supervisor's own environment is not inherited.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

/// Resolves once with the child's exit status. Cloneable so the orchestration
/// loop can race it without borrowing the process.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<ExitStatus>>);

impl ExitWatch {
    pub fn status(&self) -> Option<ExitStatus> {
        *self.0.borrow()
    }

    /// Wait for the exit status. `None` only if the exit watcher task vanished.
    pub async fn wait(mut self) -> Option<ExitStatus> {
        match self.0.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        }
    }
}

/// A running child in its own process group with combined, capped output capture.
pub struct ManagedProcess {
    pub name: String,
    pid: u32,
    output: Arc<Mutex<OutputBuffer>>,
    exit: ExitWatch,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    /// Spawn `spec` as a new process group leader. stdout and stderr are merged
    /// into one buffer and echoed to our stdout as they arrive.
    pub fn launch(name: impl Into<String>, spec: LaunchSpec) -> Result<Self> {
        Self::launch_with_cap(name, spec, crate::output::DEFAULT_OUTPUT_CAP)
    }

    pub fn launch_with_cap(name: impl Into<String>, spec: LaunchSpec, cap: usize) -> Result<Self> {
        let name = name.into();
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            name: name.clone(),
            command: spec.command.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        info!("[{name}] spawned (pid={pid}, cmd={})", spec.command);

        let output = Arc::new(Mutex::new(OutputBuffer::new(cap)));
        let mut tasks = Vec::with_capacity(3);
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(capture(stdout, Arc::clone(&output))));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(capture(stderr, Arc::clone(&output))));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_name = name.clone();
        tasks.push(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    info!("[{exit_name}] exited with {status}");
                    let _ = exit_tx.send(Some(status));
                }
                Err(e) => {
                    warn!("[{exit_name}] failed to wait on child: {e}");
                    let _ = exit_tx.send(Some(ExitStatus::from_raw(1 << 8)));
                }
            }
        }));

        Ok(Self {
            name,
            pid,
            output,
            exit: ExitWatch(exit_rx),
            tasks,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit.status()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    /// Snapshot of the captured output.
    pub fn output(&self) -> String {
        self.lock_output().as_str().to_string()
    }

    fn lock_output(&self) -> MutexGuard<'_, OutputBuffer> {
        self.output.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Poll the captured output until `predicate` matches, the child exits, or
    /// `timeout` elapses.
    pub async fn wait_for_output<F>(&self, predicate: F, timeout: Duration) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self.lock_output().as_str()) {
                return Ok(());
            }
            if let Some(status) = self.exit_status() {
                return Err(Error::ExitedEarly {
                    name: self.name.clone(),
                    status: status.to_string(),
                    output: self.output(),
                });
            }
            if Instant::now() >= deadline {
                return Err(Error::OutputTimeout {
                    name: self.name.clone(),
                    timeout,
                    output: self.output(),
                });
            }
            sleep(OUTPUT_POLL_INTERVAL).await;
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // Capture tasks end on EOF by themselves; the exit watcher must keep
        // running until the child is reaped.
        if self.has_exited() {
            for task in &self.tasks {
                task.abort();
            }
        }
    }
}

async fn capture<R>(mut reader: R, output: Arc<Mutex<OutputBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 8192];
    // Bytes of a multibyte character split across reads.
    let mut pending = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let _ = stdout.write_all(&buf[..n]).await;
        let _ = stdout.flush().await;
        pending.extend_from_slice(&buf[..n]);
        let text = take_utf8(&mut pending);
        if !text.is_empty() {
            output.lock().unwrap_or_else(|e| e.into_inner()).push(&text);
        }
    }
    if !pending.is_empty() {
        output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(&String::from_utf8_lossy(&pending));
    }
}

/// Decode as much of `pending` as possible. An incomplete sequence at the end
/// stays in `pending` for the next read; invalid bytes become U+FFFD.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return text;
                    }
                    Some(bad) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}

/// Exit code to report for a child status. Signal deaths map to 128 + signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}
