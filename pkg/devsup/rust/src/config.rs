// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::cli::Cli;
use crate::env::EnvMap;
use crate::errors::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::ValueEnum;
use log::debug;
use rand_core::{OsRng, RngCore};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BIND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 8080;
pub const DEFAULT_FRONTEND_PORT: u16 = 5173;
pub const DEFAULT_BACKEND_DIR: &str = "packages/backend";
pub const DEFAULT_HEALTH_PATH: &str = "/healthz";
pub const STARTUP_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);
pub const RESTART_HEALTH_TIMEOUT: Duration = Duration::from_secs(15);
pub const FRONTEND_READY_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_TOOLCHAIN: &str = "dart";
const PROVISIONED_TOOLCHAIN: &str = ".dart-sdk/dart-sdk/bin/dart";
const BACKEND_ENTRYPOINT: &str = "bin/server.dart";
const PACKAGE_CONFIG: &str = ".dart_tool/package_config.json";
const FRONTEND_LAUNCHER: &str = "node_modules/.bin/vite";
const SESSION_SECRET_BYTES: usize = 32;

// Variables read from the resolved environment.
pub const ENV_TOOLCHAIN: &str = "DEVSUP_TOOLCHAIN";
pub const ENV_BACKEND_PROXY: &str = "DEVSUP_BACKEND_PROXY";
pub const ENV_SESSION_SECRET: &str = "DEVSUP_SESSION_SECRET";
pub const ENV_EMAIL_TRANSPORT: &str = "DEVSUP_EMAIL_TRANSPORT";
pub const ENV_EMAIL_FROM: &str = "DEVSUP_EMAIL_FROM";
pub const ENV_PUBLIC_BASE_URL: &str = "DEVSUP_PUBLIC_BASE_URL";
pub const ENV_COOKIE_SECURE: &str = "DEVSUP_BACKEND_COOKIE_SECURE";
pub const ENV_EXPOSE_DEV_TOKENS: &str = "DEVSUP_EXPOSE_DEV_TOKENS";
pub const ENV_EXPOSE_INVITE_TOKENS: &str = "DEVSUP_EXPOSE_INVITE_TOKENS";
pub const ENV_BACKEND_DB: &str = "DEVSUP_BACKEND_DB";
// Variables always set by the supervisor.
pub const ENV_BACKEND_HOST: &str = "DEVSUP_BACKEND_HOST";
pub const ENV_BACKEND_PORT: &str = "DEVSUP_BACKEND_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrontendMode {
    /// Dev server with hot reload.
    Dev,
    /// Production build served by the preview server.
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChoice {
    /// Use exactly this port.
    Explicit(u16),
    /// Try this port, fall back to an ephemeral one.
    Preferred(u16),
}

/// A one-shot setup command, run only when `marker` is missing.
#[derive(Debug, Clone)]
pub struct Prerequisite {
    pub marker: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub launcher: PathBuf,
    pub mode: FrontendMode,
    pub cwd: PathBuf,
    pub ready_timeout: Duration,
}

impl FrontendConfig {
    /// Launcher arguments for serving on `host:port`.
    pub fn serve_args(&self, host: &str, port: u16) -> Vec<String> {
        let mut args = Vec::new();
        if self.mode == FrontendMode::Preview {
            args.push("preview".to_string());
        }
        args.extend([
            "--host".to_string(),
            host.to_string(),
            "--port".to_string(),
            port.to_string(),
            "--strictPort".to_string(),
        ]);
        args
    }
}

/// Everything the supervisor needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub root: PathBuf,
    pub backend_dir: PathBuf,
    pub host: String,
    pub backend_port: PortChoice,
    pub backend_command: String,
    pub backend_args: Vec<String>,
    pub prerequisites: Vec<Prerequisite>,
    pub proxy: Option<String>,
    pub watch: bool,
    pub frontend: Option<FrontendConfig>,
    pub health_path: String,
    pub startup_health_timeout: Duration,
    pub restart_health_timeout: Duration,
    pub grace_period: Duration,
    pub session_secret: Option<String>,
    /// Base environment for every child (`.env.local` under the process env).
    pub env: EnvMap,
}

/// The project root: `--root` if given, else the working directory.
pub fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    let root = match root {
        Some(r) => r.to_path_buf(),
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(Error::Config(format!("missing root dir: {}", root.display())));
    }
    Ok(root)
}

/// `DEVSUP_TOOLCHAIN`, else the SDK provisioned under the root, else `PATH` lookup.
pub fn resolve_toolchain(root: &Path, env: &EnvMap) -> String {
    if let Some(t) = env.get(ENV_TOOLCHAIN).filter(|t| !t.is_empty()) {
        return t.clone();
    }
    let provisioned = root.join(PROVISIONED_TOOLCHAIN);
    if provisioned.exists() {
        return provisioned.to_string_lossy().into_owned();
    }
    DEFAULT_TOOLCHAIN.to_string()
}

fn env_value(env: &EnvMap, key: &str) -> Option<String> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

pub fn generate_session_secret() -> String {
    let mut key = [0u8; SESSION_SECRET_BYTES];
    OsRng.fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// Where the backend keeps its database unless told otherwise; outside the
/// watched tree so database writes never trigger restarts.
pub fn default_db_path() -> PathBuf {
    std::env::temp_dir()
        .join("devsup")
        .join("dev_full")
        .join("devsup.sqlite")
}

impl SupervisorConfig {
    pub fn from_cli(cli: Cli, root: PathBuf, env: EnvMap) -> Result<Self> {
        let backend_dir = root.join(&cli.backend_dir);
        if !backend_dir.is_dir() {
            return Err(Error::Config(format!(
                "missing backend dir: {}",
                backend_dir.display()
            )));
        }

        let toolchain = resolve_toolchain(&root, &env);
        let (backend_command, backend_args, prerequisites) = match cli.backend_cmd.split_first() {
            Some((cmd, args)) => (cmd.clone(), args.to_vec(), Vec::new()),
            None => {
                let prerequisites = [root.clone(), backend_dir.clone()]
                    .into_iter()
                    .map(|cwd| Prerequisite {
                        marker: cwd.join(PACKAGE_CONFIG),
                        command: toolchain.clone(),
                        args: vec!["pub".to_string(), "get".to_string()],
                        cwd,
                    })
                    .collect();
                (
                    toolchain.clone(),
                    vec!["run".to_string(), BACKEND_ENTRYPOINT.to_string()],
                    prerequisites,
                )
            }
        };
        debug!("backend command: {backend_command} {backend_args:?}");

        let backend_port = match cli.backend_port {
            Some(p) => PortChoice::Explicit(p),
            None => PortChoice::Preferred(DEFAULT_BACKEND_PORT),
        };

        let proxy = env_value(&env, ENV_BACKEND_PROXY).or_else(|| {
            cli.proxy
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
        });

        let frontend = if cli.no_frontend {
            None
        } else {
            let launcher = root.join(FRONTEND_LAUNCHER);
            if !launcher.exists() {
                return Err(Error::Config(format!(
                    "missing frontend launcher {} (install frontend dependencies or pass --no-frontend)",
                    launcher.display()
                )));
            }
            Some(FrontendConfig {
                launcher,
                mode: cli.frontend_mode,
                cwd: root.clone(),
                ready_timeout: FRONTEND_READY_TIMEOUT,
            })
        };

        let health_path = if cli.health_path.starts_with('/') {
            cli.health_path
        } else {
            format!("/{}", cli.health_path)
        };

        Ok(Self {
            session_secret: env_value(&env, ENV_SESSION_SECRET),
            root,
            backend_dir,
            host: BIND_HOST.to_string(),
            backend_port,
            backend_command,
            backend_args,
            prerequisites,
            proxy,
            watch: cli.backend_watch && !cli.no_backend_watch,
            frontend,
            health_path,
            startup_health_timeout: Duration::from_millis(cli.health_timeout_ms),
            restart_health_timeout: Duration::from_millis(cli.restart_health_timeout_ms),
            grace_period: Duration::from_millis(cli.grace_period_ms),
            env,
        })
    }

    /// Whether the backend gets the default database path; blank counts as unset.
    pub fn uses_default_db(&self) -> bool {
        env_value(&self.env, ENV_BACKEND_DB).is_none()
    }

    /// Environment for the backend child. Values already present in the
    /// resolved environment win over the development defaults, except for the
    /// bind address and secret which the supervisor owns.
    pub fn backend_env(&self, port: u16, secret: &str, public_base_url: &str) -> EnvMap {
        let mut env = self.env.clone();
        let defaults = [
            (ENV_BACKEND_DB, default_db_path().to_string_lossy().into_owned()),
            (ENV_COOKIE_SECURE, "0".to_string()),
            (ENV_EXPOSE_DEV_TOKENS, "1".to_string()),
            (ENV_EXPOSE_INVITE_TOKENS, "1".to_string()),
            (ENV_EMAIL_TRANSPORT, "log".to_string()),
            (ENV_EMAIL_FROM, "devsup <no-reply@localhost>".to_string()),
            (ENV_PUBLIC_BASE_URL, public_base_url.to_string()),
        ];
        for (key, value) in defaults {
            if env_value(&env, key).is_none() {
                env.insert(key.to_string(), value);
            }
        }
        env.insert(ENV_BACKEND_HOST.to_string(), self.host.clone());
        env.insert(ENV_BACKEND_PORT.to_string(), port.to_string());
        env.insert(ENV_SESSION_SECRET.to_string(), secret.to_string());
        env
    }

    /// Environment for the frontend server, pointing its API proxy at `proxy_target`.
    pub fn frontend_env(&self, proxy_target: &str) -> EnvMap {
        let mut env = self.env.clone();
        env.insert(ENV_BACKEND_PROXY.to_string(), proxy_target.to_string());
        env
    }

    pub fn proxy_target(&self, backend_url: &str) -> String {
        self.proxy.clone().unwrap_or_else(|| backend_url.to_string())
    }
}
