// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process feed for tests and for embedding without a broker.
//!
//! Every published message is delivered to the single subscriber regardless
//! of the subscribed subject. Acknowledgements are only recorded, and an
//! unacknowledged message is never delivered again.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};

use super::traits::{AckToken, FeedClient, FeedError, FeedMessage, MessageStream};

const DEFAULT_CAPACITY: usize = 1024;

pub struct MemoryFeed {
    sender: Mutex<Option<mpsc::Sender<FeedMessage>>>,
    receiver: Mutex<Option<mpsc::Receiver<FeedMessage>>>,
    acked: DashSet<AckToken>,
    next_id: AtomicU64,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A feed whose publish side waits once `capacity` messages are undelivered.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            acked: DashSet::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish a raw payload; returns the token it will be acknowledged with.
    pub async fn publish(&self, subject: &str, payload: impl Into<Vec<u8>>) -> Result<AckToken, FeedError> {
        let sender = self.sender.lock().await.clone().ok_or(FeedError::Closed)?;
        let token = AckToken(format!("{}-0", self.next_id.fetch_add(1, Ordering::Relaxed)));

        sender
            .send(FeedMessage {
                subject: subject.to_string(),
                payload: payload.into(),
                token: token.clone(),
            })
            .await
            .map_err(|_| FeedError::Closed)?;
        Ok(token)
    }

    #[must_use]
    pub fn is_acked(&self, token: &AckToken) -> bool {
        self.acked.contains(token)
    }

    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.acked.len()
    }

    pub async fn is_shut_down(&self) -> bool {
        self.sender.lock().await.is_none()
    }
}

#[async_trait]
impl FeedClient for MemoryFeed {
    async fn subscribe(&self, _consumer: &str, _subject: &str) -> Result<MessageStream, FeedError> {
        self.receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| FeedError::Subscribe("memory feed supports a single subscription".into()))
    }

    async fn ack(&self, token: &AckToken) -> Result<(), FeedError> {
        self.acked.insert(token.clone());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), FeedError> {
        self.sender.lock().await.take();
        Ok(())
    }
}
