// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dispatcher: feed messages in, one sync task per event out.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  raw   ┌────────┐  depth-1 queues   ┌──────────────┐
//! │   Feed   │──────► │ router │ ─── new_request ─►│              │ spawn  ┌────────────┐
//! └──────────┘        │  task  │ ─ update_request ►│ control loop │──────► │ sync tasks │
//!      ▲              └────────┘ ─ update_sample ─►│              │        └─────┬──────┘
//!      │  ack unmatched   │                        └──────────────┘              │
//!      └──────────────────┴────────────────────────── ack ─────────────────────-─┘
//! ```
//!
//! - The router acknowledges messages matching no filter and drops them.
//!   Messages that fail to decode are left unacknowledged for redelivery.
//! - The control loop takes a concurrency permit before it dequeues, so at
//!   most `max_in_flight` sync tasks run at once and the queues push back on
//!   the router.
//! - A sync task logs a failed sync and never re-raises it. Whether it then
//!   acknowledges depends on the [`AckPolicy`].
//!
//! # Shutdown
//!
//! Cancelling the token moves the dispatcher to `Draining`: queues are
//! dropped (queued but unstarted events stay unacknowledged), every running
//! task is awaited to completion, then the feed is shut down and the state
//! becomes `Stopped`. Running tasks are never aborted.

pub mod router;
pub mod types;

pub use router::Router;
pub use types::{Category, DispatchState, Envelope, Event};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AckPolicy, DispatchConfig, FeedConfig};
use crate::engine::Synchronizer;
use crate::error::SyncError;
use crate::feed::{FeedClient, FeedMessage, MessageStream};
use crate::metrics;

/// Per-category queue depth; back-pressure only.
const QUEUE_DEPTH: usize = 1;

pub struct Dispatcher {
    feed: Arc<dyn FeedClient>,
    sync: Arc<dyn Synchronizer>,
    router: Router,
    consumer: String,
    stream: String,
    ack_policy: AckPolicy,
    permits: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    state: watch::Sender<DispatchState>,
    state_rx: watch::Receiver<DispatchState>,
}

impl Dispatcher {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        sync: Arc<dyn Synchronizer>,
        feed_config: &FeedConfig,
        config: &DispatchConfig,
    ) -> Self {
        let (state, state_rx) = watch::channel(DispatchState::Listening);
        let max_in_flight = config.max_in_flight.max(1);

        Self {
            feed,
            sync,
            router: Router::from_config(feed_config),
            consumer: feed_config.consumer.clone(),
            stream: feed_config.stream.clone(),
            ack_policy: config.ack_policy,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            running: Arc::new(AtomicUsize::new(0)),
            state,
            state_rx,
        }
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<DispatchState> {
        self.state_rx.clone()
    }

    /// Sync tasks currently running.
    ///
    /// The permit the control loop holds while waiting for an event is not
    /// counted.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: DispatchState) {
        let _ = self.state.send(state);
        metrics::set_dispatch_state(state.as_gauge());
        info!(%state, "Dispatcher state changed");
    }

    /// Subscribe and dispatch until `cancel` fires, then drain and shut the
    /// feed down.
    ///
    /// Fails only if the subscription cannot be established or the feed
    /// fails to shut down. A feed that ends on its own also leads to drain and
    /// shutdown.
    #[tracing::instrument(skip_all, fields(consumer = %self.consumer, stream = %self.stream))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let messages = self.feed.subscribe(&self.consumer, &self.stream).await?;
        self.set_state(DispatchState::Listening);

        let (new_request_tx, mut new_request_rx) = mpsc::channel(QUEUE_DEPTH);
        let (update_request_tx, mut update_request_rx) = mpsc::channel(QUEUE_DEPTH);
        let (update_sample_tx, mut update_sample_rx) = mpsc::channel(QUEUE_DEPTH);

        let routing = tokio::spawn(route(
            messages,
            self.router.clone(),
            self.feed.clone(),
            Queues {
                new_request: new_request_tx,
                update_request: update_request_tx,
                update_sample: update_sample_tx,
            },
            cancel.clone(),
        ));

        let mut new_request_tasks = JoinSet::new();
        let mut update_request_tasks = JoinSet::new();
        let mut update_sample_tasks = JoinSet::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;
        let mut open = [true; 3];

        loop {
            if open.iter().all(|o| !o) {
                warn!("Feed stream ended, stopping");
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = new_request_tasks.join_next(), if !new_request_tasks.is_empty() => {
                    self.reaped(Category::NewRequest, joined);
                }
                Some(joined) = update_request_tasks.join_next(), if !update_request_tasks.is_empty() => {
                    self.reaped(Category::UpdateRequest, joined);
                }
                Some(joined) = update_sample_tasks.join_next(), if !update_sample_tasks.is_empty() => {
                    self.reaped(Category::UpdateSample, joined);
                }

                acquired = self.permits.clone().acquire_owned(), if permit.is_none() => {
                    match acquired {
                        Ok(p) => permit = Some(p),
                        Err(_) => break,
                    }
                }

                envelope = new_request_rx.recv(), if permit.is_some() && open[0] => match envelope {
                    Some(envelope) => self.spawn_task(&mut new_request_tasks, envelope, permit.take()),
                    None => open[0] = false,
                },
                envelope = update_request_rx.recv(), if permit.is_some() && open[1] => match envelope {
                    Some(envelope) => self.spawn_task(&mut update_request_tasks, envelope, permit.take()),
                    None => open[1] = false,
                },
                envelope = update_sample_rx.recv(), if permit.is_some() && open[2] => match envelope {
                    Some(envelope) => self.spawn_task(&mut update_sample_tasks, envelope, permit.take()),
                    None => open[2] = false,
                },
            }
        }

        self.set_state(DispatchState::Draining);
        drop(permit);
        drop(new_request_rx);
        drop(update_request_rx);
        drop(update_sample_rx);

        for (category, tasks) in [
            (Category::NewRequest, &mut new_request_tasks),
            (Category::UpdateRequest, &mut update_request_tasks),
            (Category::UpdateSample, &mut update_sample_tasks),
        ] {
            if !tasks.is_empty() {
                info!(category = category.as_str(), remaining = tasks.len(), "Waiting for sync tasks");
            }
            while let Some(joined) = tasks.join_next().await {
                self.reaped(category, joined);
            }
        }

        let shutdown = self.feed.shutdown().await;
        if let Err(e) = routing.await {
            warn!(error = %e, "Router task ended abnormally");
        }
        self.set_state(DispatchState::Stopped);

        shutdown.map_err(SyncError::from)
    }

    fn spawn_task(&self, tasks: &mut JoinSet<()>, envelope: Envelope, permit: Option<OwnedSemaphorePermit>) {
        let category = envelope.event.category();
        let sync = self.sync.clone();
        let feed = self.feed.clone();
        let policy = self.ack_policy;

        debug!(category = category.as_str(), token = %envelope.token, "Dispatching");
        let slot = TaskSlot::claim(self.running.clone(), permit);
        tasks.spawn(async move {
            let _slot = slot;
            run_sync(sync.as_ref(), feed.as_ref(), policy, envelope).await;
        });
        metrics::set_in_flight(self.in_flight());
    }

    fn reaped(&self, category: Category, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(category = category.as_str(), error = %e, "Sync task panicked");
        }
        metrics::set_in_flight(self.in_flight());
    }
}

/// A running task's concurrency permit and its share of the running count.
/// Both are released when the task's future is dropped, panicked or not.
struct TaskSlot {
    running: Arc<AtomicUsize>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl TaskSlot {
    fn claim(running: Arc<AtomicUsize>, permit: Option<OwnedSemaphorePermit>) -> Self {
        running.fetch_add(1, Ordering::SeqCst);
        Self { running, _permit: permit }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One sync task: apply the event, log the outcome, acknowledge per policy.
async fn run_sync(sync: &dyn Synchronizer, feed: &dyn FeedClient, policy: AckPolicy, envelope: Envelope) {
    let category = envelope.event.category().as_str();

    let result = match &envelope.event {
        Event::NewRequest(request) => sync.add_request(request).await,
        Event::UpdateRequest(versions) => sync.update_request(versions).await,
        Event::UpdateSample(versions) => sync.update_sample(versions).await,
    };

    match &result {
        Ok(()) => debug!(category, token = %envelope.token, "Sync complete"),
        Err(e) => error!(category, token = %envelope.token, kind = e.kind(), error = %e, "Sync failed"),
    }

    let ack = match policy {
        AckPolicy::Always => true,
        AckPolicy::OnSuccess => result.is_ok(),
    };
    if ack {
        if let Err(e) = feed.ack(&envelope.token).await {
            warn!(category, token = %envelope.token, error = %e, "Acknowledge failed, message will be redelivered");
        }
    }
    metrics::record_ack(category, ack);
}

struct Queues {
    new_request: mpsc::Sender<Envelope>,
    update_request: mpsc::Sender<Envelope>,
    update_sample: mpsc::Sender<Envelope>,
}

impl Queues {
    fn for_category(&self, category: Category) -> &mpsc::Sender<Envelope> {
        match category {
            Category::NewRequest => &self.new_request,
            Category::UpdateRequest => &self.update_request,
            Category::UpdateSample => &self.update_sample,
        }
    }
}

/// Classify, decode and enqueue feed messages until cancelled or the feed
/// stream ends.
async fn route(
    mut messages: MessageStream,
    router: Router,
    feed: Arc<dyn FeedClient>,
    queues: Queues,
    cancel: CancellationToken,
) {
    loop {
        let message: FeedMessage = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = messages.recv() => match received {
                Some(m) => m,
                None => break,
            },
        };

        let Some(category) = router.classify(&message.subject) else {
            metrics::record_message_routed("unmatched");
            debug!(subject = %message.subject, "No filter matches, acknowledging and dropping");
            if let Err(e) = feed.ack(&message.token).await {
                warn!(subject = %message.subject, error = %e, "Acknowledge of unmatched message failed");
            }
            continue;
        };
        metrics::record_message_routed(category.as_str());

        let event = match router::decode(category, &message.subject, &message.payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::record_decode_failure(category.as_str());
                warn!(token = %message.token, error = %e, "Undecodable message left unacknowledged");
                continue;
            }
        };

        let envelope = Envelope { event, token: message.token };
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = queues.for_category(category).send(envelope) => sent.is_ok(),
        };
        if !sent {
            break;
        }
    }
    debug!("Router stopped");
}
