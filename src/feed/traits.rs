// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed connection error: {0}")]
    Connection(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("acknowledge failed: {0}")]
    Ack(String),
    #[error("feed already shut down")]
    Closed,
}

/// Opaque handle the feed uses to identify a delivered message when it is
/// acknowledged (a stream entry id for Redis).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(pub String);

impl std::fmt::Display for AckToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw message as delivered: subject plus undecoded payload bytes.
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub token: AckToken,
}

/// Push side of a subscription; closes when the feed shuts down.
pub type MessageStream = mpsc::Receiver<FeedMessage>;

/// At-least-once message feed.
///
/// A message that is never acknowledged may be delivered again. How and when
/// depends on the implementation: [`RedisStreamFeed`](super::RedisStreamFeed)
/// redelivers after a configurable idle time and on restart, while
/// [`MemoryFeed`](super::MemoryFeed) never redelivers.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Start delivering messages published on `subject` to `consumer`.
    async fn subscribe(&self, consumer: &str, subject: &str) -> Result<MessageStream, FeedError>;

    async fn ack(&self, token: &AckToken) -> Result<(), FeedError>;

    /// Stop delivery and release the connection. Idempotent.
    async fn shutdown(&self) -> Result<(), FeedError>;
}
