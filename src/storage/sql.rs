// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL store client backed by a `sqlx` Any pool.
//!
//! Works against any driver sqlx's `Any` supports (MySQL, Postgres, SQLite).
//! The two tables it serves look like this:
//!
//! ```sql
//! CREATE TABLE <catalog>.<request_table> (
//!   REQUEST_ID   VARCHAR(255) NOT NULL,
//!   REQUEST_JSON TEXT NOT NULL
//! );
//! CREATE TABLE <catalog>.<sample_table> (
//!   REQUEST_ID      VARCHAR(255) NOT NULL,
//!   SAMPLE_NAME     VARCHAR(255) NOT NULL,
//!   ALT_SAMPLE_NAME VARCHAR(255) NOT NULL,
//!   BARCODE         VARCHAR(255),
//!   SAMPLE_JSON     TEXT NOT NULL
//! );
//! ```
//!
//! There are deliberately no primary keys or foreign keys: uniqueness and
//! ownership are maintained by the sync engine, not the store.
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL TEXT columns come back as BLOB through the `Any` driver, so text
//! decoding falls back to reading bytes. Mutations have no result set; their
//! affected-row count is reported as a synthetic `Records` row.
//!
//! `Any` passes SQL through untouched. Statements are written with `?`
//! placeholders, which Postgres rejects, so against a Postgres URL they are
//! renumbered to `$1, $2, ...` before execution.

use std::borrow::Cow;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Column, Row as _};
use tracing::{debug, info};

use super::traits::{
    records_row, Row, RowSet, SqlValue, Statement, StatementKind, StoreClient, StoreConnection,
    StoreError,
};
use crate::config::StoreConfig;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
    numbered_placeholders: bool,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        install_drivers();

        let is_sqlite = config.url.starts_with("sqlite:");
        let numbered_placeholders = is_postgres_url(&config.url);
        let url = config.url.as_str();

        let pool = retry("store_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                .idle_timeout(Duration::from_secs(300))
                .connect(url)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite, numbered_placeholders };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }
        if config.create_tables {
            store
                .init_schema(&config.qualified_request_table(), &config.qualified_sample_table())
                .await?;
        }

        info!(sqlite = is_sqlite, postgres = numbered_placeholders, "Store pool ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// SQLite only: readers do not block the writer under WAL.
    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Statement(format!("Failed to enable WAL mode: {}", e)))?;
        Ok(())
    }

    /// Create both tables if they are missing.
    ///
    /// Meant for local SQLite deployments and tests; production catalogs are
    /// provisioned outside this process.
    pub async fn init_schema(&self, request_table: &str, sample_table: &str) -> Result<(), StoreError> {
        let text = if self.is_sqlite { "TEXT" } else { "VARCHAR(255)" };
        let requests = format!(
            "CREATE TABLE IF NOT EXISTS {request_table} (
                REQUEST_ID {text} NOT NULL,
                REQUEST_JSON TEXT NOT NULL
            )"
        );
        let samples = format!(
            "CREATE TABLE IF NOT EXISTS {sample_table} (
                REQUEST_ID {text} NOT NULL,
                SAMPLE_NAME {text} NOT NULL,
                ALT_SAMPLE_NAME {text} NOT NULL,
                BARCODE {text},
                SAMPLE_JSON TEXT NOT NULL
            )"
        );

        for sql in [requests, samples] {
            retry("store_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(&sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Statement(e.to_string()))
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for SqlStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Box::new(SqlConnection { conn, numbered_placeholders: self.numbered_placeholders }))
    }
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres:") || url.starts_with("postgresql:")
}

/// Rewrite `?` placeholders as `$1, $2, ...`, leaving quoted text alone.
fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '?') => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
                continue;
            }
            (None, _) => {}
        }
        out.push(c);
    }
    out
}

/// A pooled connection; returns to the pool on drop.
pub struct SqlConnection {
    conn: PoolConnection<Any>,
    numbered_placeholders: bool,
}

#[async_trait]
impl StoreConnection for SqlConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<RowSet, StoreError> {
        let sql = if self.numbered_placeholders {
            Cow::Owned(numbered_placeholders(&statement.sql))
        } else {
            Cow::Borrowed(statement.sql.as_str())
        };
        let mut query = sqlx::query(&sql);
        for param in &statement.params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Text(s) => query.bind(s.clone()),
            };
        }

        match statement.kind {
            StatementKind::Query => {
                let rows = query
                    .fetch_all(&mut *self.conn)
                    .await
                    .map_err(|e| StoreError::Statement(e.to_string()))?;
                debug!(rows = rows.len(), "Query returned");
                Ok(rows.iter().map(decode_row).collect())
            }
            StatementKind::Mutation => {
                let result = query
                    .execute(&mut *self.conn)
                    .await
                    .map_err(|e| StoreError::Statement(e.to_string()))?;
                Ok(records_row(result.rows_affected()))
            }
        }
    }
}

fn decode_row(row: &AnyRow) -> Row {
    let columns = row
        .columns()
        .iter()
        .map(|col| (col.name().to_string(), decode_value(row, col.ordinal())))
        .collect();
    Row::new(columns)
}

fn decode_value(row: &AnyRow, idx: usize) -> SqlValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(SqlValue::Null, SqlValue::Int);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(SqlValue::Null, SqlValue::Text);
    }
    // MySQL TEXT via Any arrives as bytes
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map_or(SqlValue::Null, |bytes| {
            SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        });
    }
    SqlValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::affected_rows;
    use tempfile::TempDir;

    async fn test_store() -> (SqlStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::sqlite_at(&dir.path().join("store.db"));
        let store = SqlStore::new(&config).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_schema_created() {
        let (store, _dir) = test_store().await;
        let mut conn = store.connect().await.unwrap();

        let rows = conn
            .execute(&Statement::query("SELECT COUNT(*) AS n FROM main.requests"))
            .await
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&SqlValue::Int(0)));
    }

    #[tokio::test]
    async fn test_mutation_reports_records() {
        let (store, _dir) = test_store().await;
        let mut conn = store.connect().await.unwrap();

        let insert = Statement::mutation(
            "INSERT INTO main.requests (REQUEST_ID, REQUEST_JSON) VALUES (?, ?), (?, ?)",
        )
        .bind("R1")
        .bind("{}")
        .bind("R2")
        .bind("{}");
        let rows = conn.execute(&insert).await.unwrap();
        assert_eq!(affected_rows(&rows).unwrap(), 2);

        let update = Statement::mutation("UPDATE main.requests SET REQUEST_JSON = ? WHERE REQUEST_ID = ?")
            .bind("{\"a\":1}")
            .bind("nope");
        let rows = conn.execute(&update).await.unwrap();
        assert_eq!(affected_rows(&rows).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_decodes_text_int_and_null() {
        let (store, _dir) = test_store().await;
        let mut conn = store.connect().await.unwrap();

        conn.execute(
            &Statement::mutation(
                "INSERT INTO main.samples (REQUEST_ID, SAMPLE_NAME, ALT_SAMPLE_NAME, BARCODE, SAMPLE_JSON) VALUES (?, ?, ?, ?, ?)",
            )
            .bind("R1")
            .bind("S1")
            .bind("C1")
            .bind(None::<String>)
            .bind("{}"),
        )
        .await
        .unwrap();

        let rows = conn
            .execute(&Statement::query(
                "SELECT REQUEST_ID, BARCODE, LENGTH(SAMPLE_NAME) AS len FROM main.samples",
            ))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("REQUEST_ID"), Some(&SqlValue::Text("R1".into())));
        assert_eq!(rows[0].get("BARCODE"), Some(&SqlValue::Null));
        assert_eq!(rows[0].get("len"), Some(&SqlValue::Int(2)));
    }

    #[tokio::test]
    async fn test_bad_statement_is_statement_error() {
        let (store, _dir) = test_store().await;
        let mut conn = store.connect().await.unwrap();

        let result = conn.execute(&Statement::query("SELECT * FROM main.nonexistent")).await;
        assert!(matches!(result, Err(StoreError::Statement(_))));
    }

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(
            numbered_placeholders("UPDATE t SET A = ?, B = ? WHERE C = ?"),
            "UPDATE t SET A = $1, B = $2 WHERE C = $3"
        );
        assert_eq!(
            numbered_placeholders("SELECT * FROM t WHERE COALESCE(B, '') = COALESCE(?, '')"),
            "SELECT * FROM t WHERE COALESCE(B, '') = COALESCE($1, '')"
        );
        assert_eq!(numbered_placeholders("SELECT '?' AS q, ? AS p"), "SELECT '?' AS q, $1 AS p");
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_sample_statements_renumbered_for_postgres() {
        use crate::engine::Tables;
        use crate::model::Sample;

        let tables = Tables::new("lims.requests", "lims.samples");
        let samples = vec![Sample::new("R1", "S1", "C1"), Sample::new("R1", "S2", "C2")];
        let insert = &tables.insert_samples("R1", &samples).unwrap()[0];

        let sql = numbered_placeholders(&insert.sql);
        assert!(!sql.contains('?'));
        assert!(sql.contains("($1, $2, $3, $4, $5), ($6, $7, $8, $9, $10)"));
        assert_eq!(sql.matches('$').count(), insert.params.len());
    }

    #[test]
    fn test_postgres_url_detection() {
        assert!(is_postgres_url("postgres://sync@analytics/lims"));
        assert!(is_postgres_url("postgresql://sync@analytics/lims"));
        assert!(!is_postgres_url("mysql://sync@analytics/lims"));
        assert!(!is_postgres_url("sqlite://store.db"));
    }

    #[tokio::test]
    async fn test_connection_returns_to_pool_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::sqlite_at(&dir.path().join("pool.db"));
        config.max_connections = 1;
        config.acquire_timeout_secs = 1;
        let store = SqlStore::new(&config).await.unwrap();

        for _ in 0..3 {
            let mut conn = store.connect().await.unwrap();
            conn.execute(&Statement::query("SELECT 1 AS one")).await.unwrap();
            // dropped here; the next acquire would time out otherwise
        }
    }
}
