// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Recursive source-tree watcher with debounced change signals.
//!
//! Every directory under the root gets its own watch when `watch` is called.
//! A watch is a snapshot of the directory's entries that is re-read on a short
//! fixed interval; differences become raw change events. Raw events pass the
//! ignore rules, then feed a debouncer that emits one `WatchSignal` per burst.

use crate::errors::Result;
use log::{debug, info};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(200);
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Directory names whose contents never trigger a restart.
const IGNORED_DIRS: &[&str] = &[".dart_tool", ".cache", "build"];
/// Database artifacts the backend itself writes while running.
const IGNORED_SUFFIXES: &[&str] = &[
    ".sqlite",
    ".sqlite-wal",
    ".sqlite-shm",
    ".sqlite-journal",
    ".db",
    ".db-wal",
    ".db-shm",
    ".db-journal",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// One coalesced "something changed" notification.
#[derive(Debug, Clone)]
pub struct WatchSignal {
    pub changed_path: PathBuf,
    pub timestamp: SystemTime,
}

pub fn should_ignore(path: &Path) -> bool {
    let in_ignored_dir = path.components().any(|c| match c {
        Component::Normal(name) => IGNORED_DIRS.iter().any(|d| name == *d),
        _ => false,
    });
    if in_ignored_dir {
        return true;
    }
    let name = path.to_string_lossy();
    IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Ignore rules apply below the watched root only.
fn relative<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
    is_dir: bool,
}

type StampedEvent = (Option<SystemTime>, ChangeEvent);

/// Snapshot-based watch over the direct entries of one directory.
struct DirWatch {
    dir: PathBuf,
    entries: HashMap<OsString, Stamp>,
}

impl DirWatch {
    fn open(dir: PathBuf) -> std::io::Result<Self> {
        let entries = snapshot(&dir)?;
        Ok(Self { dir, entries })
    }

    /// Re-read the directory and report what changed since the last poll,
    /// each event paired with the entry's modification time (none for removals).
    /// Errors mean the directory is gone or unreadable.
    fn poll(&mut self, events: &mut Vec<StampedEvent>) -> std::io::Result<()> {
        let current = snapshot(&self.dir)?;
        for (name, stamp) in &current {
            let kind = match self.entries.get(name) {
                None => ChangeKind::Created,
                Some(prev) if prev != stamp && !stamp.is_dir => ChangeKind::Modified,
                Some(_) => continue,
            };
            events.push((
                stamp.modified,
                ChangeEvent {
                    kind,
                    path: self.dir.join(name),
                },
            ));
        }
        for name in self.entries.keys() {
            if !current.contains_key(name) {
                events.push((
                    None,
                    ChangeEvent {
                        kind: ChangeKind::Removed,
                        path: self.dir.join(name),
                    },
                ));
            }
        }
        self.entries = current;
        Ok(())
    }
}

fn snapshot(dir: &Path) -> std::io::Result<HashMap<OsString, Stamp>> {
    let mut entries = HashMap::new();
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        // Entries may vanish between read_dir and stat.
        let Ok(meta) = entry.metadata() else { continue };
        entries.insert(
            entry.file_name(),
            Stamp {
                modified: meta.modified().ok(),
                len: meta.len(),
                is_dir: meta.is_dir(),
            },
        );
    }
    Ok(entries)
}

/// Every directory under `root` worth watching. Symlinks are not followed;
/// hidden, ignored and unreadable directories are skipped.
fn collect_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !(is_hidden(e.file_name()) || should_ignore(relative(root, e.path())))
        })
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                debug!("watcher: skipping unreadable path: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

/// Closes the watches created by `watch`. Closing twice is harmless.
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    watched_dirs: usize,
}

impl WatchHandle {
    pub fn watched_dirs(&self) -> usize {
        self.watched_dirs
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start watching `root` recursively. Debounced signals are sent on `signals`.
pub fn watch(root: &Path, signals: mpsc::Sender<WatchSignal>) -> Result<WatchHandle> {
    watch_with(root, signals, WATCH_POLL_INTERVAL, DEBOUNCE_DELAY)
}

pub fn watch_with(
    root: &Path,
    signals: mpsc::Sender<WatchSignal>,
    poll_interval: Duration,
    debounce: Duration,
) -> Result<WatchHandle> {
    let mut watches = Vec::new();
    for dir in collect_dirs(root) {
        match DirWatch::open(dir.clone()) {
            Ok(w) => watches.push(w),
            Err(e) => debug!("watcher: cannot watch {}: {e}", dir.display()),
        }
    }
    if watches.is_empty() {
        // The root itself must be readable.
        std::fs::read_dir(root)?;
    }
    let watched_dirs = watches.len();
    info!(
        "watching {} ({watched_dirs} director{})",
        root.display(),
        if watched_dirs == 1 { "y" } else { "ies" }
    );

    let cancel = CancellationToken::new();
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    tokio::spawn(poll_loop(
        root.to_path_buf(),
        watches,
        raw_tx,
        poll_interval,
        cancel.clone(),
    ));
    tokio::spawn(debounce_loop(raw_rx, signals, debounce, cancel.clone()));

    Ok(WatchHandle {
        cancel,
        watched_dirs,
    })
}

async fn poll_loop(
    root: PathBuf,
    mut watches: Vec<DirWatch>,
    raw_tx: mpsc::UnboundedSender<ChangeEvent>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut events = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        watches.retain_mut(|w| match w.poll(&mut events) {
            Ok(()) => true,
            Err(e) => {
                debug!("watcher: dropping watch on {}: {e}", w.dir.display());
                false
            }
        });
        // One tick may span several writes; forward them oldest first so the
        // debouncer keeps the newest path. Removals carry no time and go first.
        // Writes sharing an mtime tick keep snapshot order.
        events.sort_by_key(|(modified, _)| *modified);
        for (_, event) in events.drain(..) {
            if should_ignore(relative(&root, &event.path)) {
                continue;
            }
            debug!("watcher: {:?} {}", event.kind, event.path.display());
            if raw_tx.send(event).is_err() {
                return;
            }
        }
    }
    debug!("watcher: closed {} watch(es)", watches.len());
}

/// Coalesce raw events: each event re-arms the timer; when it fires with no
/// newer event, send one signal carrying the most recent path.
pub async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<ChangeEvent>,
    signals: mpsc::Sender<WatchSignal>,
    delay: Duration,
    cancel: CancellationToken,
) {
    let mut pending: Option<PathBuf> = None;
    let mut deadline = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = raw_rx.recv() => match event {
                Some(event) => {
                    pending = Some(event.path);
                    deadline = Instant::now() + delay;
                }
                None => return,
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                if let Some(changed_path) = pending.take() {
                    let signal = WatchSignal {
                        changed_path,
                        timestamp: SystemTime::now(),
                    };
                    if signals.send(signal).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// `path` relative to `root` with `/` separators, for log lines.
pub fn display_relative(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => "(unknown)".to_string(),
    }
}
