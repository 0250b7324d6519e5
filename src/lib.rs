// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # labsync
//!
//! One-way synchronizer from a pub/sub feed of laboratory requests and
//! samples into two tables of an analytic SQL store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Feed (Redis Streams)                   │
//! │  • Consumer group, at-least-once delivery                  │
//! │  • Unacknowledged messages redelivered once idle, and on   │
//! │    restart                                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  subject + quoted JSON
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                          │
//! │  • Routes by exact subject: new request, update request,   │
//! │    update sample                                           │
//! │  • Bounded fan-out, one task per event                     │
//! │  • Drains running tasks on cancellation                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Sync Engine                          │
//! │  • Add: replace request + samples, compensate on failure   │
//! │  • Update: keyed by old version, verified by row count     │
//! │  • Per-request-id locks                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  parameterized statements
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Store (sqlx Any: MySQL/Postgres/SQLite)     │
//! │  • <catalog>.<request_table>, <catalog>.<sample_table>     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use labsync::feed::RedisStreamFeed;
//! use labsync::storage::sql::SqlStore;
//! use labsync::{Dispatcher, SyncConfig, SyncEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), labsync::SyncError> {
//!     let config = SyncConfig::load("labsync.toml".as_ref())?;
//!     config.validate()?;
//!
//!     let store = Arc::new(SqlStore::new(&config.store).await?);
//!     let feed = Arc::new(RedisStreamFeed::connect(&config.feed).await?);
//!     let engine = Arc::new(SyncEngine::new(store, &config.store));
//!
//!     let dispatcher = Dispatcher::new(feed, engine, &config.feed, &config.dispatch);
//!     dispatcher.run(CancellationToken::new()).await
//! }
//! ```
//!
//! ## Delivery Semantics
//!
//! At-least-once from the feed, idempotent replace at the store. A message
//! that fails to decode is never acknowledged and comes back. Whether a
//! message whose sync failed comes back is the [`AckPolicy`].
//!
//! ## Modules
//!
//! - [`dispatch`]: the [`Dispatcher`] and subject routing
//! - [`engine`]: the [`SyncEngine`] add and update algorithms
//! - [`feed`]: feed clients (Redis Streams, in-memory)
//! - [`storage`]: store client over sqlx
//! - [`model`]: [`Request`] and [`Sample`] records
//! - [`resilience`]: circuit breaker and retry

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod feed;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod resilience;
pub mod storage;

pub use config::{AckPolicy, DispatchConfig, DuplicatePolicy, FeedConfig, StoreConfig, SyncConfig};
pub use dispatch::{DispatchState, Dispatcher};
pub use engine::{SyncEngine, Synchronizer};
pub use error::SyncError;
pub use model::{Request, Sample, SampleKey};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use storage::traits::{StoreClient, StoreConnection, StoreError};
