// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Add: replace-or-insert a request and its samples.
//!
//! ```text
//! select request ──found──► delete request
//!        │                        │
//!        └───────────┬────────────┘
//!                    ▼
//!             delete samples
//!                    ▼
//!            insert samples (chunked) ──fail──► delete samples ──► PartialWrite
//!                       ▼
//!               insert request ──fail──► delete samples ──► PartialWrite
//!                       ▼
//!                      Ok
//! ```
//!
//! Samples land before the request, so a failure only ever leaves samples
//! behind, and those are removed by a single delete on the request id.
//! Samples under the id are cleared even when no request row is stored.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::{outcome, SyncEngine};
use crate::error::SyncError;
use crate::metrics::{record_compensation, record_replace_window, record_sync, LatencyTimer};
use crate::model::Request;
use crate::storage::traits::{affected_rows, StoreConnection, StoreError};

impl SyncEngine {
    #[tracing::instrument(skip(self, request), fields(request_id = %request.request_id, samples = request.samples.len()))]
    pub async fn add_request(&self, request: &Request) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new("add_request");
        let result = self.replace_request(request).await;
        record_sync("add_request", outcome(&result));
        result
    }

    async fn replace_request(&self, request: &Request) -> Result<(), SyncError> {
        let id = request.request_id.as_str();
        let _guard = self.locks.lock(&[id]).await;

        // Serialize everything up front: a bad document must fail before the
        // existing rows are deleted.
        let document = request.to_document()?;
        let sample_inserts = self.tables.insert_samples(id, &request.samples)?;

        let mut conn = self.connect().await?;

        let existing = conn.execute(&self.tables.select_request(id)).await?;
        let replacing = !existing.is_empty();
        if existing.len() > 1 {
            warn!(rows = existing.len(), "Multiple stored rows share this request id, replacing all");
        }

        let window = Instant::now();
        if replacing {
            conn.execute(&self.tables.delete_request(id)).await?;
        }
        // Also clears samples orphaned by an earlier failed compensation
        let cleared = affected_rows(&conn.execute(&self.tables.delete_samples(id)).await?)?;
        if !replacing && cleared > 0 {
            warn!(cleared, "Removed samples stored without their request");
        }
        debug!(replacing, cleared, "Existing rows deleted");

        for (chunk, stmt) in sample_inserts.iter().enumerate() {
            if let Err(source) = conn.execute(stmt).await {
                warn!(chunk, error = %source, "Sample insert failed");
                self.compensate(conn, id, "insert_samples").await;
                return Err(SyncError::PartialWrite {
                    request_id: id.to_string(),
                    stage: "insert_samples",
                    source,
                });
            }
        }

        if let Err(source) = conn.execute(&self.tables.insert_request(id, &document)).await {
            warn!(error = %source, "Request insert failed");
            self.compensate(conn, id, "insert_request").await;
            return Err(SyncError::PartialWrite {
                request_id: id.to_string(),
                stage: "insert_request",
                source,
            });
        }

        record_replace_window(window.elapsed());
        info!(replaced = replacing, "Request synchronized");
        Ok(())
    }

    /// Delete every sample stored under `request_id`.
    ///
    /// Tries the connection the failure happened on first, then one fresh
    /// connection. A compensation that fails both times leaves orphaned
    /// samples; it is logged and counted, and the next add for the same id
    /// clears them.
    async fn compensate(&self, mut conn: Box<dyn StoreConnection>, request_id: &str, stage: &'static str) {
        let delete = self.tables.delete_samples(request_id);

        let first = conn.execute(&delete).await;
        drop(conn);

        let result: Result<(), StoreError> = match first {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(error = %e, "Compensation failed on original connection, retrying on a fresh one");
                match self.store.connect().await {
                    Ok(mut fresh) => fresh.execute(&delete).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(()) => {
                info!(stage, "Compensation removed partially written samples");
                record_compensation(stage, true);
            }
            Err(e) => {
                error!(stage, error = %e, "Compensation failed, samples may be orphaned");
                record_compensation(stage, false);
            }
        }
    }
}
