// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Console logging for the `labsync` binary.
//!
//! `RUST_LOG`, when set, replaces the configured filter entirely. Otherwise
//! the configured level applies to this crate and third-party noise (sqlx
//! statement logging, redis) is held at `warn`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::SyncError;

/// Filter used when `RUST_LOG` is unset.
#[must_use]
pub fn default_filter(config: &LoggingConfig) -> String {
    format!("warn,labsync={},sqlx=warn,redis=warn", config.level)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), SyncError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(config)))
        .map_err(|e| SyncError::Configuration(format!("invalid logging.level: {}", e)))?;

    let console = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .try_init()
        .map_err(|e| SyncError::Configuration(format!("logging already initialized: {}", e)))
}
