// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! devsup keeps a backend service and a frontend dev server running during
//! local development, restarting the backend when its sources change.

pub mod cli;
pub mod config;
pub mod env;
pub mod errors;
pub mod output;
pub mod port;
pub mod process;
pub mod readiness;
pub mod shutdown;
pub mod state;
pub mod supervisor;
pub mod watcher;

pub use errors::{Error, Result};
pub use supervisor::{RunOutcome, Supervisor};
