// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the dispatcher.

use crate::feed::AckToken;
use crate::model::{Request, Sample};

/// Dispatcher lifecycle state.
///
/// `Listening → Draining → Stopped`, never backwards. Watch it with
/// [`super::Dispatcher::state_receiver()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Consuming events and spawning sync tasks
    Listening,
    /// Cancelled: no new events, waiting for running tasks
    Draining,
    /// All tasks finished and the feed is shut down
    Stopped,
}

impl DispatchState {
    pub(crate) fn as_gauge(self) -> u8 {
        match self {
            Self::Listening => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listening => write!(f, "Listening"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Which filter a message matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    NewRequest,
    UpdateRequest,
    UpdateSample,
}

impl Category {
    /// Metric and log label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewRequest => "new_request",
            Self::UpdateRequest => "update_request",
            Self::UpdateSample => "update_sample",
        }
    }
}

/// A decoded feed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewRequest(Request),
    /// `[new, old, ...]`
    UpdateRequest(Vec<Request>),
    /// `[new]` or `[new, old, ...]`
    UpdateSample(Vec<Sample>),
}

impl Event {
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::NewRequest(_) => Category::NewRequest,
            Self::UpdateRequest(_) => Category::UpdateRequest,
            Self::UpdateSample(_) => Category::UpdateSample,
        }
    }
}

/// An event together with the token its message is acknowledged with.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    pub token: AckToken,
}
