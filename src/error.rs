// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for synchronization.
//!
//! Lower layers have their own enums ([`StoreError`], [`FeedError`]); they
//! collapse into [`SyncError`] at the engine and dispatcher boundary.

use thiserror::Error;

use crate::feed::traits::FeedError;
use crate::storage::traits::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A required configuration value is missing or invalid. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The feed or the store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A feed payload could not be decoded into the expected event.
    #[error("decode error on subject '{subject}': {reason}")]
    Decode { subject: String, reason: String },

    /// An add wrote some rows and then failed; compensation has already run.
    #[error("partial write for request '{request_id}' during {stage}: {source}")]
    PartialWrite {
        request_id: String,
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    /// An update matched no rows.
    #[error("update target not found: {0}")]
    UpdateTargetNotFound(String),

    /// An update matched more than one row while duplicates are rejected.
    #[error("update for {target} affected {affected} rows")]
    AmbiguousUpdate { target: String, affected: u64 },

    /// A lone sample version arrived for a request that is not stored.
    #[error("request '{0}' not found")]
    NotFound(String),

    /// The version list was shorter than the operation needs.
    #[error("{kind} versions contain {got} entries, at least {need} required")]
    InvalidVersions {
        kind: &'static str,
        got: usize,
        need: usize,
    },

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("feed error: {0}")]
    Feed(FeedError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => SyncError::Connection(msg),
            other => SyncError::Store(other),
        }
    }
}

impl From<FeedError> for SyncError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Connection(msg) => SyncError::Connection(msg),
            other => SyncError::Feed(other),
        }
    }
}

impl SyncError {
    /// Short label used for metrics and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::Decode { .. } => "decode",
            Self::PartialWrite { .. } => "partial_write",
            Self::UpdateTargetNotFound(_) => "update_target_not_found",
            Self::AmbiguousUpdate { .. } => "ambiguous_update",
            Self::NotFound(_) => "not_found",
            Self::InvalidVersions { .. } => "invalid_versions",
            Self::Serialization(_) => "serialization",
            Self::Store(_) => "store",
            Self::Feed(_) => "feed",
        }
    }
}
