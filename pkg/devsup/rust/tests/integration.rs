// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

mod helpers;

use helpers::{Project, SupervisorHandle, pid_is_alive, run_to_exit, wait_for_pid_gone};
use std::time::Duration;

// ===========================================================================
// Group 1: Command line and configuration
// ===========================================================================

#[test]
fn test_help_exits_zero() {
    let out = run_to_exit(&["--help"]);
    assert_eq!(out.status.code(), Some(0));
    let help = String::from_utf8_lossy(&out.stdout);
    assert!(help.contains("--backend-port"));
    assert!(help.contains("--no-backend-watch"));
}

#[test]
fn test_invalid_port_exits_2() {
    let out = run_to_exit(&["--backend-port", "0"]);
    assert_eq!(out.status.code(), Some(2));
    let out = run_to_exit(&["--backend-port", "65536"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_missing_backend_dir_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().into_owned();
    let out = run_to_exit(&["--root", &root, "--no-frontend", "--", "/bin/true"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_missing_frontend_launcher_exits_2() {
    let project = Project::new();
    let root = project.root().to_string_lossy().into_owned();
    let out = run_to_exit(&["--root", &root, "--backend-dir", "backend", "--", "/bin/true"]);
    assert_eq!(out.status.code(), Some(2));
}

// ===========================================================================
// Group 2: Backend lifecycle
// ===========================================================================

#[test]
fn test_crash_exits_with_backend_code() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("exit 17"));
    let status = sup.wait_with_timeout(Duration::from_secs(10));
    assert_eq!(status.code(), Some(17));
    assert_eq!(sup.spawned_pids().len(), 1, "a crashing backend is not restarted");
    assert_eq!(sup.count_log_matches("backend restart:"), 0);
}

#[test]
fn test_sigterm_stops_backend_and_exits_zero() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("exec sleep 300"));
    assert!(sup.wait_for_log_default("waiting for backend health"));
    let pids = sup.spawned_pids();
    assert_eq!(pids.len(), 1);
    assert!(pid_is_alive(pids[0]));

    let status = sup.stop();
    assert_eq!(status.code(), Some(0), "signal shutdown is a clean exit");
    assert!(wait_for_pid_gone(pids[0], Duration::from_secs(5)));
}

#[test]
fn test_sigint_is_clean_shutdown() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("exec sleep 300"));
    assert!(sup.wait_for_log_default("[backend] spawned"));
    sup.send_signal(nix::sys::signal::Signal::SIGINT);
    let status = sup.wait_with_timeout(Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
    assert!(sup.wait_for_log_default("received SIGINT"));
}

#[test]
fn test_stubborn_backend_is_killed_on_shutdown() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("trap '' TERM; echo armed; sleep 300"));
    assert!(sup.wait_for_log_default("armed"));
    let pid = sup.spawned_pids()[0];

    let status = sup.stop();
    assert_eq!(status.code(), Some(0));
    assert!(sup.count_log_matches("sending SIGKILL") >= 1);
    assert!(wait_for_pid_gone(pid, Duration::from_secs(5)));
}

#[test]
fn test_repeat_signal_during_slow_stop_is_ignored() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("trap '' TERM INT; echo armed; sleep 300"));
    assert!(sup.wait_for_log_default("armed"));
    let pid = sup.spawned_pids()[0];

    sup.send_signal(nix::sys::signal::Signal::SIGTERM);
    assert!(sup.wait_for_log_default("received SIGTERM"));
    sup.send_signal(nix::sys::signal::Signal::SIGINT);
    sup.send_signal(nix::sys::signal::Signal::SIGTERM);

    let status = sup.wait_with_timeout(Duration::from_secs(10));
    assert_eq!(status.code(), Some(0), "repeat signals do not abort the stop");
    assert!(sup.wait_for_log_default("shutdown already in progress"));
    assert!(sup.count_log_matches("sending SIGKILL") >= 1);
    assert!(wait_for_pid_gone(pid, Duration::from_secs(5)));
}

#[test]
fn test_clean_exit_restarts_backend() {
    let project = Project::new();
    let marker = project.root().join("ran-once");
    let script = format!(
        "if [ -f '{m}' ]; then exec sleep 300; else touch '{m}'; exit 0; fi",
        m = marker.display()
    );
    let mut sup = SupervisorHandle::start(&project.args(&script));
    assert!(sup.wait_for_log_default("backend restart: backend exited"));
    assert!(sup.wait_for_log_count("[backend] spawned", 2, helpers::DEFAULT_TIMEOUT));

    let pids = sup.spawned_pids();
    assert_eq!(pids.len(), 2);
    assert_eq!(sup.stop().code(), Some(0));
    assert!(wait_for_pid_gone(pids[1], Duration::from_secs(5)));
}

#[test]
fn test_local_env_file_reaches_backend() {
    let project = Project::new();
    std::fs::write(
        project.root().join(".env.local"),
        "# local overrides\nDEVSUP_SESSION_SECRET=\"from-env-file\"\nDEVSUP_EMAIL_TRANSPORT=smtp\n",
    )
    .unwrap();
    let script = "echo \"secret=$DEVSUP_SESSION_SECRET transport=$DEVSUP_EMAIL_TRANSPORT cookie=$DEVSUP_BACKEND_COOKIE_SECURE\"; exec sleep 300";
    let mut sup = SupervisorHandle::start(&project.args(script));
    assert!(sup.wait_for_log_default("secret=from-env-file transport=smtp cookie=0"));
    assert_eq!(sup.stop().code(), Some(0));
}

// ===========================================================================
// Group 3: Restart on change
// ===========================================================================

#[test]
fn test_file_change_restarts_once() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("exec sleep 300"));
    assert!(sup.wait_for_log_default("watching"));
    let first = sup.spawned_pids()[0];

    std::fs::write(project.backend_dir().join("lib").join("x.dart"), "void main() {}\n").unwrap();

    assert!(sup.wait_for_log_default("backend restart: file changed: backend/lib/x.dart"));
    assert!(sup.wait_for_log_count("[backend] spawned", 2, helpers::DEFAULT_TIMEOUT));
    assert!(sup.wait_for_log_count("waiting for backend health", 2, helpers::DEFAULT_TIMEOUT));
    // Let any straggling events settle before counting.
    std::thread::sleep(Duration::from_millis(800));
    assert_eq!(sup.count_log_matches("backend restart:"), 1);

    // The old backend's exit is logged before the replacement is spawned.
    let exited = sup.line_index("[backend] exited with", 0).unwrap();
    let respawned = sup.line_index("[backend] spawned", 1).unwrap();
    let readiness = sup.line_index("waiting for backend health", 1).unwrap();
    assert!(exited < respawned && respawned < readiness);
    assert!(!pid_is_alive(first));

    let second = sup.spawned_pids()[1];
    assert_eq!(sup.stop().code(), Some(0));
    assert!(wait_for_pid_gone(second, Duration::from_secs(5)));
}

#[test]
fn test_ignored_paths_do_not_restart() {
    let project = Project::new();
    let mut sup = SupervisorHandle::start(&project.args("exec sleep 300"));
    assert!(sup.wait_for_log_default("watching"));

    let backend = project.backend_dir();
    std::fs::write(backend.join("dev.sqlite-journal"), "x").unwrap();
    std::fs::write(backend.join("dev.db"), "x").unwrap();
    std::fs::create_dir_all(backend.join(".dart_tool")).unwrap();
    std::fs::write(backend.join(".dart_tool").join("package_config.json"), "{}").unwrap();

    std::thread::sleep(Duration::from_millis(1000));
    assert_eq!(sup.count_log_matches("backend restart:"), 0);
    assert_eq!(sup.spawned_pids().len(), 1);
    assert_eq!(sup.stop().code(), Some(0));
}

#[test]
fn test_watch_disabled() {
    let project = Project::new();
    let mut args = vec!["--no-backend-watch".to_string()];
    args.extend(project.args("exec sleep 300"));
    let mut sup = SupervisorHandle::start(&args);
    assert!(sup.wait_for_log_default("watch:    off"));
    assert!(sup.wait_for_log_default("waiting for backend health"));

    std::fs::write(project.backend_dir().join("lib").join("x.dart"), "void main() {}\n").unwrap();
    std::thread::sleep(Duration::from_millis(800));
    assert_eq!(sup.count_log_matches("backend restart:"), 0);
    assert_eq!(sup.stop().code(), Some(0));
}
