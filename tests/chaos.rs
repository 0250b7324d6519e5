//! Chaos Testing for the Sync Engine
//!
//! Failure scenarios driven by a fault-injecting store wrapper around a real
//! SQLite store:
//! 1. **Partial writes** - inserts failing mid-add, compensation behaviour
//! 2. **Failed compensation** - orphaned samples and their cleanup
//! 3. **Store outages** - connection failures and the circuit breaker
//! 4. **Concurrent writers** - per-request-id serialization
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use labsync::feed::MemoryFeed;
use labsync::storage::sql::SqlStore;
use labsync::storage::traits::{RowSet, SqlValue, Statement, StoreClient, StoreConnection, StoreError};
use labsync::{
    AckPolicy, CircuitConfig, DispatchConfig, Dispatcher, FeedConfig, Request, Sample, StoreConfig,
    SyncEngine, SyncError,
};

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// Fail the statements whose SQL contains `pattern`, on the given 1-indexed
/// occurrences of that pattern.
struct Rule {
    pattern: String,
    fail_on: Vec<u64>,
    fail_after: Option<u64>,
    seen: AtomicU64,
}

impl Rule {
    fn should_fail(&self, statement: &Statement) -> bool {
        if !statement.sql.contains(&self.pattern) {
            return false;
        }
        let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        self.fail_on.contains(&n) || self.fail_after.is_some_and(|after| n > after)
    }
}

#[derive(Default)]
struct Faults {
    rules: Vec<Rule>,
    refuse_connections: AtomicBool,
}

pub struct FailingStore {
    inner: Arc<SqlStore>,
    faults: Arc<Faults>,
}

impl FailingStore {
    fn new(inner: Arc<SqlStore>) -> Self {
        Self { inner, faults: Arc::new(Faults::default()) }
    }

    /// Fail the listed occurrences of statements containing `pattern`.
    fn fail_on(mut self, pattern: &str, calls: Vec<u64>) -> Self {
        self.rules_mut().push(Rule {
            pattern: pattern.to_string(),
            fail_on: calls,
            fail_after: None,
            seen: AtomicU64::new(0),
        });
        self
    }

    /// Fail every statement containing `pattern` after the first `n`.
    fn fail_after(mut self, pattern: &str, n: u64) -> Self {
        self.rules_mut().push(Rule {
            pattern: pattern.to_string(),
            fail_on: Vec::new(),
            fail_after: Some(n),
            seen: AtomicU64::new(0),
        });
        self
    }

    fn rules_mut(&mut self) -> &mut Vec<Rule> {
        &mut Arc::get_mut(&mut self.faults).expect("configure before sharing").rules
    }

    fn refuse_connections(&self, refuse: bool) {
        self.faults.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// How many statements containing `pattern` have been attempted.
    fn seen(&self, pattern: &str) -> u64 {
        self.faults
            .rules
            .iter()
            .filter(|r| r.pattern == pattern)
            .map(|r| r.seen.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl StoreClient for FailingStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        if self.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected: store unreachable".into()));
        }
        let inner = self.inner.connect().await?;
        Ok(Box::new(FailingConnection { inner, faults: self.faults.clone() }))
    }
}

struct FailingConnection {
    inner: Box<dyn StoreConnection>,
    faults: Arc<Faults>,
}

#[async_trait]
impl StoreConnection for FailingConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<RowSet, StoreError> {
        // Evaluate every rule so each one counts its own occurrences
        let fail = self
            .faults
            .rules
            .iter()
            .fold(false, |fail, rule| rule.should_fail(statement) || fail);
        if fail {
            return Err(StoreError::Statement("injected failure".into()));
        }
        self.inner.execute(statement).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Env {
    store: Arc<SqlStore>,
    config: StoreConfig,
    _dir: TempDir,
}

async fn sqlite_env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::sqlite_at(&dir.path().join("chaos.db"));
    let store = Arc::new(SqlStore::new(&config).await.unwrap());
    Env { store, config, _dir: dir }
}

impl Env {
    fn engine_over(&self, store: Arc<dyn StoreClient>) -> SyncEngine {
        SyncEngine::new(store, &self.config)
    }

    async fn count(&self, sql: &str, id: &str) -> i64 {
        let mut conn = self.store.connect().await.unwrap();
        let rows = conn.execute(&Statement::query(sql).bind(id)).await.unwrap();
        rows[0].get("n").and_then(SqlValue::as_i64).unwrap()
    }

    async fn requests(&self, id: &str) -> i64 {
        self.count("SELECT COUNT(*) AS n FROM main.requests WHERE REQUEST_ID = ?", id).await
    }

    async fn samples(&self, id: &str) -> i64 {
        self.count("SELECT COUNT(*) AS n FROM main.samples WHERE REQUEST_ID = ?", id).await
    }

    async fn sample_names(&self, id: &str) -> Vec<String> {
        let mut conn = self.store.connect().await.unwrap();
        conn.execute(
            &Statement::query("SELECT SAMPLE_NAME FROM main.samples WHERE REQUEST_ID = ? ORDER BY SAMPLE_NAME")
                .bind(id),
        )
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.get("SAMPLE_NAME").and_then(SqlValue::as_str).map(String::from))
        .collect()
    }
}

fn request(id: &str, sample_count: usize) -> Request {
    (0..sample_count).fold(Request::new(id), |r, i| {
        r.with_sample(Sample::new(id, format!("S{:04}", i), format!("C{:04}", i)))
    })
}

const INSERT_REQUESTS: &str = "INSERT INTO main.requests";
const INSERT_SAMPLES: &str = "INSERT INTO main.samples";
const DELETE_SAMPLES: &str = "DELETE FROM main.samples";
const UPDATE_REQUESTS: &str = "UPDATE main.requests";

// =============================================================================
// Partial Writes
// =============================================================================

#[tokio::test]
async fn chaos_request_insert_failure_leaves_no_orphans() {
    let env = sqlite_env().await;
    let store = Arc::new(FailingStore::new(env.store.clone()).fail_on(INSERT_REQUESTS, vec![1]));
    let engine = env.engine_over(store);

    let err = engine.add_request(&request("REQ001", 3)).await.unwrap_err();

    assert!(matches!(err, SyncError::PartialWrite { stage: "insert_request", .. }));
    assert_eq!(env.requests("REQ001").await, 0);
    assert_eq!(env.samples("REQ001").await, 0);
}

#[tokio::test]
async fn chaos_second_sample_chunk_failure_rolls_back_first() {
    let env = sqlite_env().await;
    let store = Arc::new(FailingStore::new(env.store.clone()).fail_on(INSERT_SAMPLES, vec![2]));
    let engine = env.engine_over(store.clone());

    let err = engine.add_request(&request("REQ001", 700)).await.unwrap_err();

    assert!(matches!(err, SyncError::PartialWrite { stage: "insert_samples", .. }));
    assert_eq!(store.seen(INSERT_SAMPLES), 2);
    assert_eq!(env.samples("REQ001").await, 0);
    assert_eq!(env.requests("REQ001").await, 0);
}

#[tokio::test]
async fn chaos_failed_replace_loses_previous_version() {
    // Replace is not transactional: once the old rows are deleted, a failed
    // insert leaves nothing behind for the id.
    let env = sqlite_env().await;
    env.engine_over(env.store.clone()).add_request(&request("REQ001", 2)).await.unwrap();

    let store = Arc::new(FailingStore::new(env.store.clone()).fail_on(INSERT_REQUESTS, vec![1]));
    let err = env.engine_over(store).add_request(&request("REQ001", 4)).await.unwrap_err();

    assert!(matches!(err, SyncError::PartialWrite { .. }));
    assert_eq!(env.requests("REQ001").await, 0);
    assert_eq!(env.samples("REQ001").await, 0);
}

// =============================================================================
// Failed Compensation
// =============================================================================

#[tokio::test]
async fn chaos_failed_compensation_is_healed_by_next_add() {
    let env = sqlite_env().await;
    // Delete #1 is the pre-insert clear; #2 and #3 are the compensation attempts
    let store = Arc::new(
        FailingStore::new(env.store.clone())
            .fail_on(INSERT_REQUESTS, vec![1])
            .fail_on(DELETE_SAMPLES, vec![2, 3]),
    );
    let engine = env.engine_over(store.clone());

    let err = engine.add_request(&request("REQ001", 2)).await.unwrap_err();
    assert!(matches!(err, SyncError::PartialWrite { stage: "insert_request", .. }));
    assert_eq!(store.seen(DELETE_SAMPLES), 3);

    // Orphans remain until the next add for the id
    assert_eq!(env.requests("REQ001").await, 0);
    assert_eq!(env.samples("REQ001").await, 2);

    engine.add_request(&request("REQ001", 1)).await.unwrap();
    assert_eq!(env.requests("REQ001").await, 1);
    assert_eq!(env.sample_names("REQ001").await, vec!["S0000"]);
    assert_eq!(engine.locked_ids(), 0);
}

// =============================================================================
// Store Outages
// =============================================================================

#[tokio::test]
async fn chaos_unreachable_store_is_connection_error() {
    let env = sqlite_env().await;
    let store = Arc::new(FailingStore::new(env.store.clone()));
    store.refuse_connections(true);
    let engine = env.engine_over(store.clone());

    let err = engine.add_request(&request("REQ001", 1)).await.unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));

    let err = engine
        .update_sample(&[Sample::new("REQ001", "S1", "C1")])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));

    assert_eq!(env.requests("REQ001").await, 0);
}

#[tokio::test]
async fn chaos_circuit_opens_under_repeated_connection_failures() {
    let env = sqlite_env().await;
    let store = Arc::new(FailingStore::new(env.store.clone()));
    store.refuse_connections(true);
    let engine = env.engine_over(store.clone()).with_circuit_config(CircuitConfig {
        error_rate: 0.5,
        closed_window: 2,
        half_open_probes: 1,
        open_wait: Duration::from_secs(60),
    });

    let mut messages = Vec::new();
    for _ in 0..6 {
        match engine.add_request(&request("REQ001", 0)).await {
            Err(SyncError::Connection(msg)) => messages.push(msg),
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    assert!(messages.iter().any(|m| m.contains("injected")));
    assert!(messages.iter().any(|m| m.contains("circuit open")));
}

#[tokio::test]
async fn chaos_update_statement_failure_surfaces_store_error() {
    let env = sqlite_env().await;
    env.engine_over(env.store.clone()).add_request(&request("REQ001", 0)).await.unwrap();

    let store = Arc::new(FailingStore::new(env.store.clone()).fail_on(UPDATE_REQUESTS, vec![1]));
    let err = env
        .engine_over(store)
        .update_request(&[Request::new("REQ001a"), Request::new("REQ001")])
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Store(StoreError::Statement(_))));
    assert_eq!(env.requests("REQ001").await, 1);
    assert_eq!(env.requests("REQ001a").await, 0);
}

// =============================================================================
// Acknowledgement Policy Under Failure
// =============================================================================

fn feed_config() -> FeedConfig {
    FeedConfig {
        stream: "lims:events".into(),
        consumer: "chaos".into(),
        new_request_filter: "lims.request.new".into(),
        update_request_filter: "lims.request.update".into(),
        update_sample_filter: "lims.sample.update".into(),
        ..Default::default()
    }
}

async fn run_failed_add(policy: AckPolicy) -> bool {
    let env = sqlite_env().await;
    let store = Arc::new(FailingStore::new(env.store.clone()).fail_after(INSERT_REQUESTS, 0));
    let engine = Arc::new(env.engine_over(store.clone()));
    let feed = Arc::new(MemoryFeed::new());
    let dispatch = DispatchConfig { ack_policy: policy, ..Default::default() };
    let dispatcher = Arc::new(Dispatcher::new(feed.clone(), engine, &feed_config(), &dispatch));

    let cancel = CancellationToken::new();
    let handle = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    let payload = serde_json::to_vec(&json!({"igoRequestId": "REQ001"}).to_string()).unwrap();
    let token = feed.publish("lims.request.new", payload).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.seen(INSERT_REQUESTS) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Drain waits for the task, so its ack decision is final afterwards
    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(env.requests("REQ001").await, 0);
    feed.is_acked(&token)
}

#[tokio::test]
async fn chaos_failed_sync_acked_by_default() {
    assert!(run_failed_add(AckPolicy::Always).await);
}

#[tokio::test]
async fn chaos_failed_sync_left_pending_on_success_policy() {
    assert!(!run_failed_add(AckPolicy::OnSuccess).await);
}

// =============================================================================
// Concurrent Writers
// =============================================================================

#[tokio::test]
async fn chaos_concurrent_adds_for_one_id_never_mix() {
    let env = sqlite_env().await;
    let engine = Arc::new(env.engine_over(env.store.clone()));

    let mut handles = Vec::new();
    for writer in 0..12 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let r = Request::new("REQ001")
                .with_sample(Sample::new("REQ001", format!("W{:02}-a", writer), "C"))
                .with_sample(Sample::new("REQ001", format!("W{:02}-b", writer), "C"));
            engine.add_request(&r).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(env.requests("REQ001").await, 1);
    let names = env.sample_names("REQ001").await;
    assert_eq!(names.len(), 2);
    // Both samples come from the same writer
    assert_eq!(&names[0][..3], &names[1][..3]);
    assert_eq!(engine.locked_ids(), 0);
}

#[tokio::test]
async fn chaos_add_and_update_on_one_id_interleave_safely() {
    let env = sqlite_env().await;
    let engine = Arc::new(env.engine_over(env.store.clone()));
    engine.add_request(&request("REQ001", 2)).await.unwrap();

    let adder = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.add_request(&request("REQ001", 3)).await })
    };
    let updater = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .update_request(&[
                    Request::new("REQ001").with_metadata("status", json!("approved")),
                    Request::new("REQ001"),
                ])
                .await
        })
    };

    adder.await.unwrap().unwrap();
    // The update runs strictly before or after the add; either way its target exists
    updater.await.unwrap().unwrap();

    assert_eq!(env.requests("REQ001").await, 1);
    assert_eq!(env.samples("REQ001").await, 3);
}
