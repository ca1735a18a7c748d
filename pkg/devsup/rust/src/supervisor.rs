// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The orchestration loop. One `Supervisor` owns the backend child, the
//! optional frontend child and the file watcher, and is the only thing that
//! starts, restarts or stops them. Everything that can happen (file changes,
//! child exits, termination requests) arrives as a future raced in `run()`.

use crate::config::{self, PortChoice, SupervisorConfig};
use crate::errors::{Error, Result};
use crate::port;
use crate::process::{self, ExitWatch, LaunchSpec, ManagedProcess};
use crate::readiness::{self, Readiness, ReadinessSpec};
use crate::shutdown;
use crate::state::SupervisorState;
use crate::watcher::{self, WatchHandle, WatchSignal};
use log::{debug, error, info, warn};
use std::process::ExitStatus;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BACKEND: &str = "backend";
const FRONTEND: &str = "frontend";
const FRONTEND_BUILD: &str = "frontend-build";
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Why `run()` returned.
#[derive(Debug)]
pub enum RunOutcome {
    /// Termination was requested.
    Shutdown,
    /// The backend exited with a non-zero code.
    BackendFailed(i32),
    /// The frontend server exited.
    FrontendExited(i32),
    Fatal(Error),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Shutdown => 0,
            RunOutcome::BackendFailed(code) | RunOutcome::FrontendExited(code) => {
                u8::try_from(*code).unwrap_or(1)
            }
            RunOutcome::Fatal(e) => e.exit_code(),
        }
    }
}

/// Fixed for the lifetime of the supervisor once `start()` has run.
struct Session {
    backend_port: u16,
    health_url: String,
    backend_spec: LaunchSpec,
}

pub struct Supervisor {
    config: SupervisorConfig,
    cancel: CancellationToken,
    state: SupervisorState,
    session: Option<Session>,
    backend: Option<ManagedProcess>,
    frontend: Option<ManagedProcess>,
    watcher: Option<WatchHandle>,
    signal_tx: mpsc::Sender<WatchSignal>,
    signal_rx: mpsc::Receiver<WatchSignal>,
    spawned_pids: Vec<u32>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, cancel: CancellationToken) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            config,
            cancel,
            state: SupervisorState::Starting,
            session: None,
            backend: None,
            frontend: None,
            watcher: None,
            signal_tx,
            signal_rx,
            spawned_pids: Vec::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn backend_port(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.backend_port)
    }

    pub fn backend_pid(&self) -> Option<u32> {
        self.backend.as_ref().map(ManagedProcess::pid)
    }

    /// Every backend pid spawned so far, oldest first.
    pub fn spawned_pids(&self) -> &[u32] {
        &self.spawned_pids
    }

    /// A sender feeding the same queue as the file watcher.
    pub fn restart_trigger(&self) -> mpsc::Sender<WatchSignal> {
        self.signal_tx.clone()
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state == next {
            return;
        }
        if self.state.can_transition_to(next) {
            debug!("supervisor: {} -> {next}", self.state);
            self.state = next;
        } else {
            debug!("supervisor: ignoring {} -> {next}", self.state);
        }
    }

    /// Run setup steps, allocate ports, launch the backend and wait for it to
    /// become healthy, then bring up the frontend and the watcher.
    pub async fn start(&mut self) -> Result<()> {
        self.run_prerequisites().await?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let host = self.config.host.clone();
        let backend_port = match self.config.backend_port {
            PortChoice::Explicit(port) => port,
            PortChoice::Preferred(port) => port::allocate(&host, Some(port))?,
        };
        let frontend_port = match self.config.frontend {
            Some(_) => Some(port::allocate(&host, Some(config::DEFAULT_FRONTEND_PORT))?),
            None => None,
        };

        let backend_url = format!("http://{host}:{backend_port}");
        let frontend_url = frontend_port.map(|p| format!("http://{host}:{p}"));
        let public_base_url = format!(
            "http://localhost:{}",
            frontend_port.unwrap_or(config::DEFAULT_FRONTEND_PORT)
        );
        let secret = self
            .config
            .session_secret
            .clone()
            .unwrap_or_else(config::generate_session_secret);
        let proxy = self.config.proxy_target(&backend_url);

        let mut backend_spec = LaunchSpec::new(
            self.config.backend_command.clone(),
            self.config.backend_args.clone(),
        );
        backend_spec.env = self
            .config
            .backend_env(backend_port, &secret, &public_base_url);
        backend_spec.cwd = Some(self.config.backend_dir.clone());
        if self.config.uses_default_db() {
            let db = config::default_db_path();
            if let Some(dir) = db.parent()
                && let Err(e) = std::fs::create_dir_all(dir)
            {
                warn!("cannot create {}: {e}", dir.display());
            }
        }

        info!("backend:  {backend_url}");
        info!("proxy:    {proxy}");
        info!(
            "frontend: {}",
            frontend_url.as_deref().unwrap_or("disabled")
        );
        info!(
            "watch:    {}",
            if self.config.watch { "on" } else { "off" }
        );

        self.session = Some(Session {
            backend_port,
            health_url: format!("{backend_url}{}", self.config.health_path),
            backend_spec,
        });

        self.spawn_backend()?;
        self.await_backend_ready(self.config.startup_health_timeout)
            .await;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        if let (Some(port), Some(url)) = (frontend_port, frontend_url) {
            self.start_frontend(port, &url, &proxy).await?;
        }

        if self.config.watch && !self.cancel.is_cancelled() {
            match watcher::watch(&self.config.backend_dir, self.signal_tx.clone()) {
                Ok(handle) => self.watcher = Some(handle),
                Err(e) => warn!(
                    "cannot watch {}: {e}; restarts on change disabled",
                    self.config.backend_dir.display()
                ),
            }
        }
        Ok(())
    }

    async fn run_prerequisites(&self) -> Result<()> {
        for step in &self.config.prerequisites {
            if step.marker.exists() {
                continue;
            }
            let label = format!("{} {}", step.command, step.args.join(" "));
            info!("running `{label}` in {}", step.cwd.display());
            let mut cmd = Command::new(&step.command);
            cmd.args(&step.args)
                .current_dir(&step.cwd)
                .env_clear()
                .envs(&self.config.env)
                .kill_on_drop(true);
            let status = tokio::select! {
                status = cmd.status() => status.map_err(|source| Error::Spawn {
                    name: "setup".to_string(),
                    command: step.command.clone(),
                    source,
                })?,
                _ = self.cancel.cancelled() => return Ok(()),
            };
            if !status.success() {
                return Err(Error::Prerequisite {
                    step: label,
                    code: process::exit_code(&status),
                });
            }
        }
        Ok(())
    }

    fn spawn_backend(&mut self) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            warn!("backend spawn requested before start");
            return Ok(());
        };
        let proc = ManagedProcess::launch(BACKEND, session.backend_spec.clone())?;
        self.spawned_pids.push(proc.pid());
        self.backend = Some(proc);
        self.transition(SupervisorState::Starting);
        Ok(())
    }

    /// Poll the health endpoint until it answers, the backend exits, the
    /// timeout elapses or shutdown is requested. Only success changes state.
    async fn await_backend_ready(&mut self, timeout: std::time::Duration) {
        let (Some(proc), Some(session)) = (self.backend.as_ref(), self.session.as_ref()) else {
            return;
        };
        info!("waiting for backend health at {}", session.health_url);
        let spec = ReadinessSpec::http(session.health_url.clone(), timeout);
        let readiness = tokio::select! {
            r = readiness::check(proc, &spec) => r,
            _ = self.cancel.cancelled() => return,
        };
        match readiness {
            Readiness::Ready => {
                info!("backend healthy");
                self.transition(SupervisorState::Healthy);
            }
            Readiness::TimedOut => warn!(
                "backend not healthy after {}ms, continuing anyway",
                timeout.as_millis()
            ),
            Readiness::Exited => debug!("backend exited before becoming healthy"),
        }
    }

    async fn start_frontend(&mut self, port: u16, url: &str, proxy: &str) -> Result<()> {
        let Some(frontend) = self.config.frontend.clone() else {
            return Ok(());
        };
        let env = self.config.frontend_env(proxy);
        let launcher = frontend.launcher.to_string_lossy().into_owned();

        if frontend.mode == config::FrontendMode::Preview {
            let mut build = LaunchSpec::new(launcher.clone(), ["build"]);
            build.env = env.clone();
            build.cwd = Some(frontend.cwd.clone());
            let proc = ManagedProcess::launch(FRONTEND_BUILD, build)?;
            let exit = proc.exit_watch();
            self.frontend = Some(proc);
            let status = tokio::select! {
                status = exit.wait() => status,
                _ = self.cancel.cancelled() => return Ok(()),
            };
            self.frontend = None;
            let code = status.as_ref().map_or(1, process::exit_code);
            if code != 0 {
                return Err(Error::Prerequisite {
                    step: format!("{launcher} build"),
                    code,
                });
            }
        }

        let mut spec = LaunchSpec::new(launcher, frontend.serve_args(&self.config.host, port));
        spec.env = env;
        spec.cwd = Some(frontend.cwd.clone());
        let proc = ManagedProcess::launch(FRONTEND, spec)?;
        let ready = ReadinessSpec::output_contains(
            vec![url.to_string(), "Local:".to_string()],
            frontend.ready_timeout,
        );
        let readiness = tokio::select! {
            r = readiness::check(&proc, &ready) => r,
            _ = self.cancel.cancelled() => Readiness::TimedOut,
        };
        match readiness {
            Readiness::Ready => info!("frontend ready at {url}"),
            Readiness::TimedOut if self.cancel.is_cancelled() => {}
            Readiness::TimedOut => warn!(
                "frontend not ready after {}s, continuing anyway",
                frontend.ready_timeout.as_secs()
            ),
            Readiness::Exited => debug!("frontend exited before becoming ready"),
        }
        self.frontend = Some(proc);
        Ok(())
    }

    /// Replace the backend: stop the current child, wait for its exit, spawn
    /// a new one and re-run readiness. Does nothing once shutdown began.
    pub async fn restart(&mut self, reason: &str) -> Result<()> {
        if self.state.is_shutting_down() {
            return Ok(());
        }
        info!("backend restart: {reason}");
        self.transition(SupervisorState::Restarting);

        if let Some(old) = self.backend.take() {
            shutdown::terminate(&old, self.config.grace_period).await;
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.spawn_backend()?;
        self.await_backend_ready(self.config.restart_health_timeout)
            .await;
        Ok(())
    }

    /// Process restart triggers and child exits until something ends the
    /// session. Never stops children itself; call `stop()` afterwards.
    pub async fn run(&mut self) -> RunOutcome {
        loop {
            if self.cancel.is_cancelled() {
                return RunOutcome::Shutdown;
            }
            let backend_exit = self.backend.as_ref().map(ManagedProcess::exit_watch);
            let frontend_exit = self.frontend.as_ref().map(ManagedProcess::exit_watch);

            tokio::select! {
                _ = self.cancel.cancelled() => return RunOutcome::Shutdown,
                Some(signal) = self.signal_rx.recv() => {
                    let path = watcher::display_relative(&self.config.root, &signal.changed_path);
                    if let Err(e) = self.restart(&format!("file changed: {path}")).await {
                        return RunOutcome::Fatal(e);
                    }
                }
                status = wait_exit(backend_exit) => match status {
                    Some(status) if status.success() => {
                        if let Err(e) = self.restart("backend exited").await {
                            return RunOutcome::Fatal(e);
                        }
                    }
                    status => {
                        let code = status.as_ref().map_or(1, process::exit_code);
                        error!("backend exited with code {code}, shutting down");
                        return RunOutcome::BackendFailed(code);
                    }
                },
                status = wait_exit(frontend_exit) => {
                    let code = status.as_ref().map_or(1, process::exit_code);
                    warn!("frontend exited with code {code}, shutting down");
                    return RunOutcome::FrontendExited(code);
                }
            }
        }
    }

    /// Stop every child in parallel and close the watcher. Safe to call more
    /// than once.
    pub async fn stop(&mut self) {
        if self.state == SupervisorState::Stopped {
            return;
        }
        self.transition(SupervisorState::Stopping);
        if let Some(watcher) = self.watcher.take() {
            watcher.close();
        }
        let children: Vec<ManagedProcess> = [self.backend.take(), self.frontend.take()]
            .into_iter()
            .flatten()
            .collect();
        info!("stopping {} child process(es)", children.len());
        shutdown::terminate_all(children, self.config.grace_period).await;
        self.transition(SupervisorState::Stopped);
    }
}

async fn wait_exit(exit: Option<ExitWatch>) -> Option<ExitStatus> {
    match exit {
        Some(exit) => exit.wait().await,
        None => std::future::pending().await,
    }
}
