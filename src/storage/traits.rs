// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store client seam.
//!
//! The engine never talks to a database driver directly: it builds
//! parameterized [`Statement`]s and runs them on a [`StoreConnection`]
//! obtained from a [`StoreClient`]. A connection is scoped to one engine
//! operation and goes back to its pool when dropped.

use async_trait::async_trait;
use thiserror::Error;

/// Column carrying the affected-row count on mutating statements.
pub const RECORDS_COLUMN: &str = "Records";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("statement failed: {0}")]
    Statement(String),
    #[error("unexpected row shape: {0}")]
    Decode(String),
}

/// A bound parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl SqlValue {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.parse().ok(),
            Self::Null => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(s: Option<String>) -> Self {
        s.map_or(Self::Null, Self::Text)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// Whether a statement yields a result set or an affected-row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Mutation,
}

/// SQL text with `?` placeholders plus the values bound to them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub kind: StatementKind,
}

impl Statement {
    pub fn query(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new(), kind: StatementKind::Query }
    }

    pub fn mutation(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new(), kind: StatementKind::Mutation }
    }

    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// One result row as ordered (column, value) pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    /// Column lookup, case-insensitive (drivers disagree on case).
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub type RowSet = Vec<Row>;

/// Build the single-row result a mutating statement reports.
#[must_use]
pub fn records_row(affected: u64) -> RowSet {
    vec![Row::new(vec![(RECORDS_COLUMN.to_string(), SqlValue::Int(affected as i64))])]
}

/// Sum of the `Records` column across a mutation's result rows.
///
/// A result set without the column is a driver contract violation.
pub fn affected_rows(rows: &[Row]) -> Result<u64, StoreError> {
    let mut total: u64 = 0;
    let mut seen = false;
    for row in rows {
        if let Some(value) = row.get(RECORDS_COLUMN) {
            let n = value.as_i64().ok_or_else(|| {
                StoreError::Decode(format!("{} is not an integer: {:?}", RECORDS_COLUMN, value))
            })?;
            total += n.max(0) as u64;
            seen = true;
        }
    }
    if seen {
        Ok(total)
    } else {
        Err(StoreError::Decode(format!("mutation result has no {} column", RECORDS_COLUMN)))
    }
}

/// An acquired store connection. Dropping it releases it.
#[async_trait]
pub trait StoreConnection: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<RowSet, StoreError>;
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Acquire a connection for the duration of one operation.
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;
}
