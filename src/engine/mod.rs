// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine: applies request and sample events to the two store tables.
//!
//! # Operations
//!
//! - [`add_request`](SyncEngine::add_request): replace-or-insert a request and
//!   all its samples, deleting partially written samples if any insert fails
//! - [`update_request`](SyncEngine::update_request): rewrite the request row
//!   keyed by the old version's id, verified by affected-row count
//! - [`update_sample`](SyncEngine::update_sample): rewrite the sample row keyed
//!   by the old version's composite key, or attach a lone new version to its
//!   stored request
//!
//! Each operation acquires its own pooled connection and holds the per-id
//! lock(s) for the request ids it touches until it returns.
//!
//! # Consistency
//!
//! The two tables are not written in one transaction. During an add, a
//! reader can see the request without samples, or neither. The length of that
//! window is exported as `labsync_replace_window_seconds`.

mod add;
mod keyed_lock;
pub mod statements;
mod update;

pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use statements::Tables;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DuplicatePolicy, StoreConfig};
use crate::error::SyncError;
use crate::model::{Request, Sample};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
use crate::storage::traits::{StoreClient, StoreConnection};

/// The three operations the dispatcher drives.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn add_request(&self, request: &Request) -> Result<(), SyncError>;
    async fn update_request(&self, versions: &[Request]) -> Result<(), SyncError>;
    async fn update_sample(&self, versions: &[Sample]) -> Result<(), SyncError>;
}

pub struct SyncEngine {
    pub(super) store: Arc<dyn StoreClient>,
    pub(super) tables: Tables,
    pub(super) locks: KeyedLocks,
    pub(super) circuit: CircuitBreaker,
    pub(super) duplicate_policy: DuplicatePolicy,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn StoreClient>, config: &StoreConfig) -> Self {
        Self::with_tables(
            store,
            Tables::new(config.qualified_request_table(), config.qualified_sample_table()),
        )
    }

    pub fn with_tables(store: Arc<dyn StoreClient>, tables: Tables) -> Self {
        Self {
            store,
            tables,
            locks: KeyedLocks::new(),
            circuit: CircuitBreaker::new("store", CircuitConfig::default()),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    #[must_use]
    pub fn with_circuit_config(mut self, config: CircuitConfig) -> Self {
        self.circuit = CircuitBreaker::new("store", config);
        self
    }

    #[must_use]
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Ids currently locked by in-flight operations.
    #[must_use]
    pub fn locked_ids(&self) -> usize {
        self.locks.len()
    }

    /// Acquire a store connection through the circuit breaker.
    pub(super) async fn connect(&self) -> Result<Box<dyn StoreConnection>, SyncError> {
        self.circuit
            .call(|| self.store.connect())
            .await
            .map_err(|e| match e {
                CircuitError::Rejected => {
                    SyncError::Connection("store circuit open, not attempting".to_string())
                }
                CircuitError::Inner(e) => e.into(),
            })
    }
}

#[async_trait]
impl Synchronizer for SyncEngine {
    async fn add_request(&self, request: &Request) -> Result<(), SyncError> {
        SyncEngine::add_request(self, request).await
    }

    async fn update_request(&self, versions: &[Request]) -> Result<(), SyncError> {
        SyncEngine::update_request(self, versions).await
    }

    async fn update_sample(&self, versions: &[Sample]) -> Result<(), SyncError> {
        SyncEngine::update_sample(self, versions).await
    }
}

/// Metric label for an operation result.
pub(crate) fn outcome<T>(result: &Result<T, SyncError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    }
}
