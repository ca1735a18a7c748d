// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::debug;
use std::collections::HashMap;
use std::path::Path;

pub const LOCAL_ENV_FILE: &str = ".env.local";

pub type EnvMap = HashMap<String, String>;

/// Parse a dotenv-style file into a map.
/// Blank lines, `#` comments and lines without `=` are skipped. A value wrapped
/// in a matching pair of `"` or `'` has that pair removed. A missing or
/// unreadable file yields an empty map.
pub fn parse_environment_file(path: &Path) -> EnvMap {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("no environment file at {}: {e}", path.display());
            return EnvMap::new();
        }
    };
    let mut vars = EnvMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, raw_val)) = trimmed.split_once('=') else {
            continue;
        };
        vars.insert(key.trim().to_string(), unquote(raw_val.trim()).to_string());
    }
    vars
}

fn unquote(val: &str) -> &str {
    for quote in ['"', '\''] {
        if val.len() >= 2
            && let Some(inner) = val.strip_prefix(quote).and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    val
}

/// Layer `overrides` on top of `base`; keys present in both take the override.
pub fn merge(base: EnvMap, overrides: impl IntoIterator<Item = (String, String)>) -> EnvMap {
    let mut merged = base;
    merged.extend(overrides);
    merged
}

/// `<root>/.env.local` merged under the current process environment.
pub fn resolve(root: &Path) -> EnvMap {
    merge(
        parse_environment_file(&root.join(LOCAL_ENV_FILE)),
        std::env::vars(),
    )
}
