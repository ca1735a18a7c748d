// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use log::debug;
use std::net::TcpListener;

/// Find a free TCP port on `host`.
///
/// `preferred` is tried first; if it cannot be bound the OS picks an ephemeral
/// port instead. The check listener is closed before returning, so another
/// process may grab the port before the child binds it. That race is accepted
/// and not retried.
pub fn allocate(host: &str, preferred: Option<u16>) -> Result<u16> {
    if let Some(port) = preferred {
        match TcpListener::bind((host, port)) {
            Ok(listener) => return Ok(listener.local_addr()?.port()),
            Err(e) => debug!("preferred port {host}:{port} unavailable ({e}), using ephemeral"),
        }
    }

    let listener = TcpListener::bind((host, 0)).map_err(|source| Error::Allocation {
        host: host.to_string(),
        preferred,
        source,
    })?;
    Ok(listener.local_addr()?.port())
}
