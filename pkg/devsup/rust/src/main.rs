// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use devsup::cli::Cli;
use devsup::config::{self, SupervisorConfig};
use devsup::{RunOutcome, Supervisor, env};
use log::{error, info};
use std::process::ExitCode;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = simple_logger::init_with_level(cli.log_level) {
        eprintln!("devsup: cannot initialise logging: {e}");
    }
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    info!("devsup starting (version {})", env!("CARGO_PKG_VERSION"));

    let config = match config::resolve_root(cli.root.as_deref()).and_then(|root| {
        let env = env::resolve(&root);
        SupervisorConfig::from_cli(cli, root, env)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return Ok(e.exit_code());
        }
    };

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        // Repeat signals during a slow stop are logged and ignored.
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => return,
            };
            if on_signal.is_cancelled() {
                info!("received {name}, shutdown already in progress");
            } else {
                info!("received {name}");
                on_signal.cancel();
            }
        }
    });

    let mut supervisor = Supervisor::new(config, cancel);
    let outcome = match supervisor.start().await {
        Ok(()) => supervisor.run().await,
        Err(e) => RunOutcome::Fatal(e),
    };
    if let RunOutcome::Fatal(ref e) = outcome {
        error!("{e}");
    }
    supervisor.stop().await;

    info!("devsup shutting down");
    Ok(outcome.exit_code())
}
