// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `labsync` daemon: subscribe to the request/sample feed and keep the SQL
//! store in sync until Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use labsync::feed::RedisStreamFeed;
use labsync::logging::init_logging;
use labsync::storage::sql::SqlStore;
use labsync::{Dispatcher, SyncConfig, SyncEngine, SyncError};

#[derive(Parser)]
#[command(name = "labsync")]
#[command(about = "Synchronize laboratory requests and samples from a message feed into a SQL store")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'f', long = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match SyncConfig::load(&cli.config).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("labsync: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("labsync: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Exiting on error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SyncConfig) -> Result<(), SyncError> {
    let store = Arc::new(SqlStore::new(&config.store).await?);
    let feed = Arc::new(RedisStreamFeed::connect(&config.feed).await?);

    let engine = SyncEngine::new(store, &config.store)
        .with_duplicate_policy(config.dispatch.duplicate_policy);
    let dispatcher = Dispatcher::new(feed, Arc::new(engine), &config.feed, &config.dispatch);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, draining");
                on_signal.cancel();
            }
            Err(e) => error!(error = %e, "Cannot listen for interrupt"),
        }
    });

    info!(
        stream = %config.feed.stream,
        consumer = %config.feed.consumer,
        max_in_flight = config.dispatch.max_in_flight,
        ack_policy = ?config.dispatch.ack_policy,
        "Dispatcher starting"
    );
    dispatcher.run(cancel).await
}
