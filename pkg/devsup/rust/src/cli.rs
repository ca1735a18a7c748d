// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::{DEFAULT_BACKEND_DIR, DEFAULT_HEALTH_PATH, FrontendMode};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Run the backend and the frontend dev server together, restarting the
/// backend when its sources change.
#[derive(Debug, Parser)]
#[command(name = "devsup", version)]
#[command(after_help = "Env overrides:\n  \
    DEVSUP_TOOLCHAIN        toolchain binary used to run the backend\n  \
    DEVSUP_BACKEND_PROXY    frontend /api proxy target\n  \
    DEVSUP_SESSION_SECRET   backend session secret (random per run if unset)\n  \
    DEVSUP_EMAIL_TRANSPORT / DEVSUP_EMAIL_FROM / DEVSUP_PUBLIC_BASE_URL")]
pub struct Cli {
    /// Project root (default: current directory).
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Backend package directory, relative to the root.
    #[arg(long, default_value = DEFAULT_BACKEND_DIR)]
    pub backend_dir: PathBuf,

    /// Backend port (default: 8080 if free, otherwise any free port).
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub backend_port: Option<u16>,

    /// Frontend proxy target (default: the backend URL).
    #[arg(long)]
    pub proxy: Option<String>,

    /// Restart the backend on file changes: 1|0, true|false, yes|no, on|off.
    #[arg(long, action = ArgAction::Set, value_parser = parse_flag, default_value = "1")]
    pub backend_watch: bool,

    /// Shorthand for `--backend-watch 0`.
    #[arg(long)]
    pub no_backend_watch: bool,

    /// Run the backend only.
    #[arg(long)]
    pub no_frontend: bool,

    #[arg(long, value_enum, default_value_t = FrontendMode::Dev)]
    pub frontend_mode: FrontendMode,

    /// Backend health endpoint path.
    #[arg(long, default_value = DEFAULT_HEALTH_PATH)]
    pub health_path: String,

    /// How long to wait for the backend to become healthy at startup.
    #[arg(long, default_value_t = 30_000)]
    pub health_timeout_ms: u64,

    /// How long to wait for the backend to become healthy after a restart.
    #[arg(long, default_value_t = 15_000)]
    pub restart_health_timeout_ms: u64,

    /// Time a child gets to exit after SIGTERM before it is killed.
    #[arg(long, default_value_t = 2_500)]
    pub grace_period_ms: u64,

    #[arg(long, default_value = "info")]
    pub log_level: log::Level,

    /// Backend command and arguments (default: `<toolchain> run bin/server.dart`).
    #[arg(last = true)]
    pub backend_cmd: Vec<String>,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected 1|0|true|false|yes|no|on|off, got {other:?}")),
    }
}
