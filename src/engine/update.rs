// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Update: rewrite one row in place, keyed by the old version.
//!
//! Versions arrive newest first: `[new, old]`. The old version supplies the
//! lookup key, the new version every replacement value (key included). The
//! store's affected-row count tells us whether the old row was there.

use std::slice;

use tracing::{info, warn};

use super::{outcome, SyncEngine};
use crate::config::DuplicatePolicy;
use crate::error::SyncError;
use crate::metrics::{record_duplicate_update, record_sync, LatencyTimer};
use crate::model::{Request, Sample};
use crate::storage::traits::affected_rows;

impl SyncEngine {
    /// Apply a `[new, old]` request pair. Entries past the second are ignored.
    #[tracing::instrument(skip(self, versions), fields(versions = versions.len()))]
    pub async fn update_request(&self, versions: &[Request]) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new("update_request");
        let result = self.rewrite_request(versions).await;
        record_sync("update_request", outcome(&result));
        result
    }

    /// Apply sample versions.
    ///
    /// A lone version has no stored predecessor to key off (typically it
    /// failed validation earlier and was never written). If its request is
    /// stored, any row at the same composite key is replaced by it; otherwise
    /// [`SyncError::NotFound`].
    #[tracing::instrument(skip(self, versions), fields(versions = versions.len()))]
    pub async fn update_sample(&self, versions: &[Sample]) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new("update_sample");
        let result = match versions {
            [] => Err(SyncError::InvalidVersions { kind: "sample", got: 0, need: 1 }),
            [lone] => self.attach_sample(lone).await,
            [new, old, ..] => self.rewrite_sample(new, old).await,
        };
        record_sync("update_sample", outcome(&result));
        result
    }

    async fn rewrite_request(&self, versions: &[Request]) -> Result<(), SyncError> {
        let (new, old) = match versions {
            [new, old, ..] => (new, old),
            _ => {
                return Err(SyncError::InvalidVersions {
                    kind: "request",
                    got: versions.len(),
                    need: 2,
                })
            }
        };

        let _guard = self.locks.lock(&[new.request_id.as_str(), old.request_id.as_str()]).await;
        let document = new.to_document()?;

        let mut conn = self.connect().await?;
        let rows = conn
            .execute(&self.tables.update_request(&new.request_id, &document, &old.request_id))
            .await?;
        let affected = affected_rows(&rows)?;

        self.check_affected(affected, || format!("request '{}'", old.request_id), "request")?;
        info!(old = %old.request_id, new = %new.request_id, "Request updated");
        Ok(())
    }

    async fn rewrite_sample(&self, new: &Sample, old: &Sample) -> Result<(), SyncError> {
        let old_key = old.key();
        let _guard = self.locks.lock(&[new.request_id(), old_key.request_id.as_str()]).await;
        let statement = self.tables.update_sample(new, &old_key)?;

        let mut conn = self.connect().await?;
        let rows = conn.execute(&statement).await?;
        let affected = affected_rows(&rows)?;

        self.check_affected(affected, || format!("sample {}", old_key), "sample")?;
        info!(old = %old_key, new = %new.key(), "Sample updated");
        Ok(())
    }

    async fn attach_sample(&self, sample: &Sample) -> Result<(), SyncError> {
        let request_id = sample.request_id();
        let _guard = self.locks.lock(&[request_id]).await;
        let inserts = self.tables.insert_samples(request_id, slice::from_ref(sample))?;

        let mut conn = self.connect().await?;
        let owner = conn.execute(&self.tables.select_request(request_id)).await?;
        if owner.is_empty() {
            return Err(SyncError::NotFound(request_id.to_string()));
        }

        // A redelivered lone version replaces its own earlier insert
        conn.execute(&self.tables.delete_sample(&sample.key())).await?;
        for stmt in &inserts {
            conn.execute(stmt).await?;
        }
        info!(sample = %sample.key(), "Sample stored with no prior version");
        Ok(())
    }

    fn check_affected(
        &self,
        affected: u64,
        target: impl FnOnce() -> String,
        table: &'static str,
    ) -> Result<(), SyncError> {
        match affected {
            0 => Err(SyncError::UpdateTargetNotFound(target())),
            1 => Ok(()),
            n => {
                record_duplicate_update(table);
                let target = target();
                match self.duplicate_policy {
                    DuplicatePolicy::Accept => {
                        warn!(%target, affected = n, "Update touched more than one row");
                        Ok(())
                    }
                    DuplicatePolicy::Reject => Err(SyncError::AmbiguousUpdate { target, affected: n }),
                }
            }
        }
    }
}
