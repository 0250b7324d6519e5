// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Streams feed.
//!
//! Publishers append entries to one stream; every consumer of the gateway
//! shares a consumer group, so each entry goes to exactly one of them and
//! stays in the group's pending list until `XACK`.
//!
//! # Entry Format
//!
//! ```text
//! XADD lims:events *
//!   subject "lims.request.new"
//!   data    "\"{\\\"igoRequestId\\\":\\\"REQ001\\\", ...}\""
//! ```
//!
//! # Delivery
//!
//! On subscribe the loop first replays this consumer's own pending entries
//! (delivered before a crash or restart, never acknowledged), then blocks on
//! new entries with `XREADGROUP ... >`. Read errors back off and retry until
//! shutdown.
//!
//! Between reads, every `redeliver_after_ms` the loop sweeps the group's
//! pending list with `XAUTOCLAIM`: entries idle at least that long, whichever
//! consumer holds them, are claimed by this one and delivered again. An entry
//! left unacknowledged while the process keeps running (a decode failure, or a
//! failed sync under `on_success`) therefore comes back without a restart.
//! Zero disables the sweep.
//!
//! Reads and acknowledgements use separate connections: a blocking
//! `XREADGROUP` holds its connection for up to `block_ms`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{AckToken, FeedClient, FeedError, FeedMessage, MessageStream};
use crate::config::FeedConfig;
use crate::resilience::retry::{retry, RetryConfig};

pub const SUBJECT_FIELD: &str = "subject";
pub const DATA_FIELD: &str = "data";

struct Subscription {
    stream: String,
    poll: Option<JoinHandle<()>>,
}

pub struct RedisStreamFeed {
    reader: ConnectionManager,
    acker: ConnectionManager,
    group: String,
    read_count: usize,
    block_ms: u64,
    redeliver_after_ms: u64,
    cancel: CancellationToken,
    subscription: Mutex<Option<Subscription>>,
}

impl RedisStreamFeed {
    /// Open the read and ack connections, with startup-mode retry.
    pub async fn connect(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = Client::open(config.url.as_str()).map_err(|e| FeedError::Connection(e.to_string()))?;

        let reader = open_manager(&client).await?;
        let acker = open_manager(&client).await?;

        info!(group = %config.group_name(), "Feed connected");
        Ok(Self {
            reader,
            acker,
            group: config.group_name().to_string(),
            read_count: config.read_count.max(1),
            block_ms: config.block_ms,
            redeliver_after_ms: config.redeliver_after_ms,
            cancel: CancellationToken::new(),
            subscription: Mutex::new(None),
        })
    }

    /// Create the consumer group (and the stream) unless it already exists.
    async fn ensure_group(&self, stream: &str) -> Result<(), FeedError> {
        let mut conn = self.acker.clone();
        let created: Result<(), RedisError> = conn.xgroup_create_mkstream(stream, &self.group, "0").await;
        match created {
            Ok(()) => {
                info!(%stream, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(FeedError::Subscribe(e.to_string())),
        }
    }

    async fn subscribed_stream(&self) -> Result<String, FeedError> {
        self.subscription
            .lock()
            .await
            .as_ref()
            .map(|s| s.stream.clone())
            .ok_or_else(|| FeedError::Ack("not subscribed".into()))
    }
}

async fn open_manager(client: &Client) -> Result<ConnectionManager, FeedError> {
    retry("feed_connect", &RetryConfig::startup(), || async {
        ConnectionManager::new(client.clone()).await
    })
    .await
    .map_err(|e: RedisError| FeedError::Connection(e.to_string()))
}

#[async_trait]
impl FeedClient for RedisStreamFeed {
    /// `subject` is the stream key.
    async fn subscribe(&self, consumer: &str, subject: &str) -> Result<MessageStream, FeedError> {
        let mut slot = self.subscription.lock().await;
        if slot.is_some() {
            return Err(FeedError::Subscribe("already subscribed".into()));
        }
        if self.cancel.is_cancelled() {
            return Err(FeedError::Closed);
        }

        self.ensure_group(subject).await?;

        let (tx, rx) = mpsc::channel(self.read_count);
        let poller = Poller {
            conn: self.reader.clone(),
            acker: self.acker.clone(),
            stream: subject.to_string(),
            group: self.group.clone(),
            consumer: consumer.to_string(),
            read_count: self.read_count,
            block_ms: self.block_ms,
            redeliver_after: (self.redeliver_after_ms > 0)
                .then(|| Duration::from_millis(self.redeliver_after_ms)),
            tx,
            cancel: self.cancel.clone(),
        };
        let poll = tokio::spawn(poller.run());

        *slot = Some(Subscription { stream: subject.to_string(), poll: Some(poll) });
        info!(stream = %subject, %consumer, "Subscribed");
        Ok(rx)
    }

    async fn ack(&self, token: &AckToken) -> Result<(), FeedError> {
        let stream = self.subscribed_stream().await?;
        let mut conn = self.acker.clone();
        let _: i64 = conn
            .xack(&stream, &self.group, &[token.0.as_str()])
            .await
            .map_err(|e| FeedError::Ack(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), FeedError> {
        self.cancel.cancel();
        let poll = self.subscription.lock().await.as_mut().and_then(|s| s.poll.take());
        if let Some(handle) = poll {
            if let Err(e) = handle.await {
                warn!(error = %e, "Feed poll task ended abnormally");
            }
        }
        info!("Feed shut down");
        Ok(())
    }
}

/// The read loop behind one subscription.
struct Poller {
    conn: ConnectionManager,
    acker: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    read_count: usize,
    block_ms: u64,
    /// Minimum idle time before a pending entry is claimed again
    redeliver_after: Option<Duration>,
    tx: mpsc::Sender<FeedMessage>,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        // Some(id) while replaying our own pending entries, None once live
        let mut pending_cursor = Some("0".to_string());
        let mut backoff = RetryConfig::daemon().backoff();
        let mut next_sweep = self.redeliver_after.map(|every| Instant::now() + every);

        loop {
            if let (Some(due), Some(every)) = (next_sweep, self.redeliver_after) {
                if pending_cursor.is_none() && Instant::now() >= due {
                    let swept = tokio::select! {
                        _ = cancel.cancelled() => break,
                        swept = self.sweep(every) => swept,
                    };
                    match swept {
                        Ok(true) => {}
                        Ok(false) => return,
                        Err(e) => warn!(error = %e, "Pending sweep failed, retrying next interval"),
                    }
                    next_sweep = Some(Instant::now() + every);
                }
            }

            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.read(pending_cursor.as_deref()) => r,
            };

            let entries = match read {
                Ok(entries) => {
                    backoff = RetryConfig::daemon().backoff();
                    entries
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Stream read failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if pending_cursor.is_some() {
                match entries.last() {
                    Some(last) => pending_cursor = Some(last.id.clone()),
                    None => {
                        debug!(stream = %self.stream, "Pending replay complete");
                        pending_cursor = None;
                        continue;
                    }
                }
            }

            for entry in entries {
                if !self.deliver(entry).await {
                    return;
                }
            }
        }
        debug!(stream = %self.stream, "Poll loop stopped");
    }

    async fn read(&mut self, pending_from: Option<&str>) -> Result<Vec<StreamId>, RedisError> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.read_count);
        let id = match pending_from {
            Some(id) => id,
            None => {
                opts = opts.block(self.block_ms as usize);
                ">"
            }
        };

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[self.stream.as_str()], &[id], &opts)
            .await?;
        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    /// Claim and redeliver every group entry idle for at least `min_idle`.
    /// `Ok(false)` once delivery should stop.
    async fn sweep(&mut self, min_idle: Duration) -> Result<bool, RedisError> {
        let mut cursor = "0-0".to_string();
        let mut claimed_total = 0usize;

        loop {
            let opts = StreamAutoClaimOptions::default().count(self.read_count);
            let reply: StreamAutoClaimReply = self
                .conn
                .xautoclaim_options(
                    &self.stream,
                    &self.group,
                    &self.consumer,
                    min_idle.as_millis() as u64,
                    &cursor,
                    opts,
                )
                .await?;

            if !reply.deleted_ids.is_empty() {
                debug!(count = reply.deleted_ids.len(), "Pending entries no longer in stream, dropped");
            }
            claimed_total += reply.claimed.len();
            for entry in reply.claimed {
                if !self.deliver(entry).await {
                    return Ok(false);
                }
            }

            if reply.next_stream_id == "0-0" {
                break;
            }
            cursor = reply.next_stream_id;
        }

        if claimed_total > 0 {
            info!(stream = %self.stream, claimed = claimed_total, "Redelivering idle pending entries");
        }
        Ok(true)
    }

    /// Push one entry to the subscriber. False once delivery should stop.
    async fn deliver(&mut self, entry: StreamId) -> bool {
        let subject: Option<String> = entry.get(SUBJECT_FIELD);
        let payload: Option<Vec<u8>> = entry.get(DATA_FIELD);

        let (subject, payload) = match (subject, payload) {
            (Some(s), Some(p)) => (s, p),
            _ => {
                warn!(id = %entry.id, "Stream entry without subject or data, skipping");
                let acked: Result<i64, RedisError> =
                    self.acker.xack(&self.stream, &self.group, &[entry.id.as_str()]).await;
                if let Err(e) = acked {
                    warn!(id = %entry.id, error = %e, "Failed to acknowledge malformed entry");
                }
                return true;
            }
        };

        let message = FeedMessage { subject, payload, token: AckToken(entry.id) };
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(message) => sent.is_ok(),
        }
    }
}
