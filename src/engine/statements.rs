// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statement builders for the request and sample tables.
//!
//! Every value goes through a `?` placeholder; only the configured,
//! catalog-qualified table names are spliced into the SQL text.
//!
//! Barcodes are optional, so the composite-key match compares
//! `COALESCE(BARCODE, '')` on both sides: a NULL barcode matches a missing one
//! and nothing else, on every driver.

use crate::model::{Sample, SampleKey};
use crate::storage::traits::{SqlValue, Statement};

/// Rows per multi-row INSERT; keeps statements under typical packet limits.
pub const INSERT_CHUNK_SIZE: usize = 500;

const SAMPLE_COLUMNS: &str = "REQUEST_ID, SAMPLE_NAME, ALT_SAMPLE_NAME, BARCODE, SAMPLE_JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    /// `<catalog>.<request table>`
    pub request: String,
    /// `<catalog>.<sample table>`
    pub sample: String,
}

impl Tables {
    pub fn new(request: impl Into<String>, sample: impl Into<String>) -> Self {
        Self { request: request.into(), sample: sample.into() }
    }

    pub fn select_request(&self, request_id: &str) -> Statement {
        Statement::query(format!(
            "SELECT REQUEST_ID, REQUEST_JSON FROM {} WHERE REQUEST_ID = ?",
            self.request
        ))
        .bind(request_id)
    }

    pub fn insert_request(&self, request_id: &str, document: &str) -> Statement {
        Statement::mutation(format!(
            "INSERT INTO {} (REQUEST_ID, REQUEST_JSON) VALUES (?, ?)",
            self.request
        ))
        .bind(request_id)
        .bind(document)
    }

    pub fn delete_request(&self, request_id: &str) -> Statement {
        Statement::mutation(format!("DELETE FROM {} WHERE REQUEST_ID = ?", self.request))
            .bind(request_id)
    }

    pub fn update_request(&self, new_id: &str, document: &str, old_id: &str) -> Statement {
        Statement::mutation(format!(
            "UPDATE {} SET REQUEST_ID = ?, REQUEST_JSON = ? WHERE REQUEST_ID = ?",
            self.request
        ))
        .bind(new_id)
        .bind(document)
        .bind(old_id)
    }

    pub fn delete_samples(&self, request_id: &str) -> Statement {
        Statement::mutation(format!("DELETE FROM {} WHERE REQUEST_ID = ?", self.sample))
            .bind(request_id)
    }

    /// Multi-row inserts for `samples`, all stored under `request_id`.
    ///
    /// Documents are serialized before any statement is returned, so a bad
    /// sample fails here rather than halfway through the writes.
    pub fn insert_samples(
        &self,
        request_id: &str,
        samples: &[Sample],
    ) -> Result<Vec<Statement>, serde_json::Error> {
        let mut statements = Vec::with_capacity(samples.len().div_ceil(INSERT_CHUNK_SIZE));

        for chunk in samples.chunks(INSERT_CHUNK_SIZE) {
            let placeholders = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let mut stmt = Statement::mutation(format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.sample, SAMPLE_COLUMNS, placeholders
            ));
            for sample in chunk {
                stmt = stmt
                    .bind(request_id)
                    .bind(sample.sample_name.as_str())
                    .bind(sample.alt_sample_name.as_str())
                    .bind(sample.barcode.clone())
                    .bind(sample.to_document()?);
            }
            statements.push(stmt);
        }
        Ok(statements)
    }

    /// Remove the row(s) at one composite key.
    pub fn delete_sample(&self, key: &SampleKey) -> Statement {
        Statement::mutation(format!(
            "DELETE FROM {} WHERE REQUEST_ID = ? AND SAMPLE_NAME = ? AND ALT_SAMPLE_NAME = ? \
             AND COALESCE(BARCODE, '') = COALESCE(?, '')",
            self.sample
        ))
        .bind(key.request_id.as_str())
        .bind(key.sample_name.as_str())
        .bind(key.alt_sample_name.as_str())
        .bind(SqlValue::from(key.barcode.clone()))
    }

    /// Rewrite the row at `old` with every field of `new`, key included.
    pub fn update_sample(&self, new: &Sample, old: &SampleKey) -> Result<Statement, serde_json::Error> {
        let stmt = Statement::mutation(format!(
            "UPDATE {} SET REQUEST_ID = ?, SAMPLE_NAME = ?, ALT_SAMPLE_NAME = ?, BARCODE = ?, SAMPLE_JSON = ? \
             WHERE REQUEST_ID = ? AND SAMPLE_NAME = ? AND ALT_SAMPLE_NAME = ? \
             AND COALESCE(BARCODE, '') = COALESCE(?, '')",
            self.sample
        ))
        .bind(new.request_id())
        .bind(new.sample_name.as_str())
        .bind(new.alt_sample_name.as_str())
        .bind(new.barcode.clone())
        .bind(new.to_document()?)
        .bind(old.request_id.as_str())
        .bind(old.sample_name.as_str())
        .bind(old.alt_sample_name.as_str())
        .bind(SqlValue::from(old.barcode.clone()));
        Ok(stmt)
    }
}
