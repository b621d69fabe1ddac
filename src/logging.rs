// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::OnceCell;
use std::io::{self, IsTerminal};
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber, writing human-readable lines to stderr.
///
/// `RUST_LOG` takes precedence over `level`. Only the first call has any
/// effect; later calls return `Ok` without touching the global subscriber.
pub fn init(level: &str) -> crate::Result<()> {
    LOGGING
        .get_or_try_init(|| {
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(level))
                .map_err(|e| crate::Error::Config(format!("invalid log level '{}': {}", level, e)))?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .try_init()
                .map_err(|e| crate::Error::Config(format!("failed to install logger: {}", e)))
        })
        .map(|_| ())
}

/// Log level implied by the quiet/verbose flags, if either was given.
pub fn level_from_flags(quiet: bool, verbose: bool) -> Option<&'static str> {
    match (quiet, verbose) {
        (true, _) => Some("warn"),
        (_, true) => Some("debug"),
        _ => None,
    }
}
