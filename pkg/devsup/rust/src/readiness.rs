// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Readiness detection: either scan a child's captured output for a marker, or
//! poll an HTTP health endpoint until it answers 2xx.

use crate::process::ManagedProcess;
use log::{debug, warn};
use std::sync::Arc;
use tokio::time::{Duration, Instant, sleep};

pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(200);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub type OutputPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum ReadinessSpec {
    /// Ready once the captured output satisfies `predicate`.
    Output {
        predicate: OutputPredicate,
        timeout: Duration,
    },
    /// Ready once `GET url` returns a 2xx status.
    Http {
        url: String,
        timeout: Duration,
        interval: Duration,
    },
}

impl ReadinessSpec {
    /// Ready when the output mentions any of `markers`.
    pub fn output_contains(markers: Vec<String>, timeout: Duration) -> Self {
        ReadinessSpec::Output {
            predicate: Arc::new(move |out: &str| markers.iter().any(|m| out.contains(m.as_str()))),
            timeout,
        }
    }

    pub fn http(url: impl Into<String>, timeout: Duration) -> Self {
        ReadinessSpec::Http {
            url: url.into(),
            timeout,
            interval: HEALTH_POLL_INTERVAL,
        }
    }
}

impl std::fmt::Debug for ReadinessSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessSpec::Output { timeout, .. } => f
                .debug_struct("Output")
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            ReadinessSpec::Http {
                url,
                timeout,
                interval,
            } => f
                .debug_struct("Http")
                .field("url", url)
                .field("timeout", timeout)
                .field("interval", interval)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// The child exited before becoming ready.
    Exited,
}

/// GET `url` every `interval` until a 2xx answer or `timeout`. Connection
/// errors just mean "not yet".
pub async fn poll_health(url: &str, timeout: Duration, interval: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(HEALTH_REQUEST_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!("cannot build health check client: {e}");
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return true,
            Ok(resp) => debug!("health check {url}: {}", resp.status()),
            Err(e) => debug!("health check {url}: {e}"),
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Wait for `proc` to become ready according to `spec`.
pub async fn check(proc: &ManagedProcess, spec: &ReadinessSpec) -> Readiness {
    match spec {
        ReadinessSpec::Output { predicate, timeout } => {
            match proc.wait_for_output(|out| predicate(out), *timeout).await {
                Ok(()) => Readiness::Ready,
                Err(crate::Error::ExitedEarly { .. }) => Readiness::Exited,
                Err(e) => {
                    debug!("{e}");
                    Readiness::TimedOut
                }
            }
        }
        ReadinessSpec::Http {
            url,
            timeout,
            interval,
        } => {
            tokio::select! {
                healthy = poll_health(url, *timeout, *interval) => {
                    if healthy { Readiness::Ready } else { Readiness::TimedOut }
                }
                _ = proc.exit_watch().wait() => Readiness::Exited,
            }
        }
    }
}
