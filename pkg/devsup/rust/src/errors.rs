// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no free port on {host} (preferred {preferred:?}): {source}")]
    Allocation {
        host: String,
        preferred: Option<u16>,
        #[source]
        source: std::io::Error,
    },

    #[error("[{name}] failed to spawn {command}: {source}")]
    Spawn {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{name}] exited early with {status}. Last output:\n\n{output}")]
    ExitedEarly {
        name: String,
        status: String,
        output: String,
    },

    #[error("timed out after {}ms waiting for {name}. Last output:\n\n{output}", timeout.as_millis())]
    OutputTimeout {
        name: String,
        timeout: Duration,
        output: String,
    },

    #[error("{step} failed with exit code {code}")]
    Prerequisite { step: String, code: i32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for errors that end the supervisor.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::Prerequisite { code, .. } => u8::try_from(*code).unwrap_or(1),
            _ => 1,
        }
    }
}
