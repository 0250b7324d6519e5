// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic labsync usage example.
//!
//! Demonstrates, with no external services:
//! 1. A SQLite store and the in-memory feed
//! 2. Publishing a new request with two samples
//! 3. Renaming the request with an update event
//! 4. An update whose target does not exist
//! 5. Displaying metrics
//! 6. Draining and clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use labsync::feed::MemoryFeed;
use labsync::storage::sql::SqlStore;
use labsync::storage::traits::{SqlValue, Statement, StoreClient};
use labsync::{DispatchConfig, Dispatcher, FeedConfig, StoreConfig, SyncEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              labsync: Basic Usage Example                     ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Store, feed, engine, dispatcher
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let store_config = StoreConfig::sqlite_at(&dir.path().join("labsync.db"));
    let store = Arc::new(SqlStore::new(&store_config).await?);
    println!("📦 SQLite store at {}", dir.path().display());

    let feed_config = FeedConfig {
        stream: "lims:events".into(),
        consumer: "demo".into(),
        new_request_filter: "lims.request.new".into(),
        update_request_filter: "lims.request.update".into(),
        update_sample_filter: "lims.sample.update".into(),
        ..Default::default()
    };

    let feed = Arc::new(MemoryFeed::new());
    let engine = Arc::new(SyncEngine::new(store.clone(), &store_config));
    let dispatcher = Arc::new(Dispatcher::new(
        feed.clone(),
        engine,
        &feed_config,
        &DispatchConfig::default(),
    ));

    let cancel = CancellationToken::new();
    let running = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };
    println!("🚀 Dispatcher state: {}", dispatcher.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. New request with two samples
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Publishing new request REQ001 with samples S1, S2...");
    publish(
        &feed,
        "lims.request.new",
        json!({
            "igoRequestId": "REQ001",
            "piEmail": "pi@example.org",
            "samples": [
                {"sampleName": "S1", "cmoSampleName": "C-S1", "additionalProperties": {"igoRequestId": "REQ001"}},
                {"sampleName": "S2", "cmoSampleName": "C-S2", "additionalProperties": {"igoRequestId": "REQ001"}}
            ]
        }),
    )
    .await?;
    settle().await;
    show_tables(&*store).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Rename via update (new version first, old version second)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✏️  Publishing update REQ001 → REQ001a...");
    publish(
        &feed,
        "lims.request.update",
        json!([
            {"igoRequestId": "REQ001a", "piEmail": "pi@example.org", "status": "approved"},
            {"igoRequestId": "REQ001"}
        ]),
    )
    .await?;
    settle().await;
    show_tables(&*store).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Update with no stored target
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n❓ Publishing update X1 → X2 (no stored X1)...");
    publish(
        &feed,
        "lims.request.update",
        json!([{"igoRequestId": "X2"}, {"igoRequestId": "X1"}]),
    )
    .await?;
    settle().await;
    println!("   └─ Store unchanged; the failure is logged and counted");
    println!("   └─ Messages acknowledged: {}", feed.acked_count());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Drain and shut down
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    cancel.cancel();
    running.await??;
    println!("   ✅ Shutdown complete! State: {}", dispatcher.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Publish `doc` in wire form: the JSON text carried as a JSON string.
async fn publish(feed: &MemoryFeed, subject: &str, doc: Value) -> Result<(), Box<dyn std::error::Error>> {
    let payload = serde_json::to_vec(&doc.to_string())?;
    let token = feed.publish(subject, payload).await?;
    println!("   └─ Published {} as {}", subject, token);
    Ok(())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn show_tables(store: &dyn StoreClient) -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = store.connect().await?;

    let requests = conn
        .execute(&Statement::query(
            "SELECT REQUEST_ID, REQUEST_JSON FROM main.requests ORDER BY REQUEST_ID",
        ))
        .await?;
    println!("   ┌─ requests");
    for row in &requests {
        println!(
            "   │  └─ {} → {}",
            row.get("REQUEST_ID").and_then(SqlValue::as_str).unwrap_or("?"),
            row.get("REQUEST_JSON").and_then(SqlValue::as_str).unwrap_or("?"),
        );
    }

    let samples = conn
        .execute(&Statement::query(
            "SELECT REQUEST_ID, SAMPLE_NAME, ALT_SAMPLE_NAME FROM main.samples ORDER BY SAMPLE_NAME",
        ))
        .await?;
    println!("   └─ samples");
    for row in &samples {
        println!(
            "      └─ {} / {} / {}",
            row.get("REQUEST_ID").and_then(SqlValue::as_str).unwrap_or("?"),
            row.get("SAMPLE_NAME").and_then(SqlValue::as_str).unwrap_or("?"),
            row.get("ALT_SAMPLE_NAME").and_then(SqlValue::as_str).unwrap_or("?"),
        );
    }
    Ok(())
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let max = samples.iter().map(|v| v.into_inner()).fold(0.0, f64::max);
                histograms.push((name, label_str, count, sum, max));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.0}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum, max) in &histograms {
            println!("      └─ {}{} count={} sum={:.6}s max={:.6}s", name, labels, count, sum, max);
        }
    }

    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
