// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-request-id async mutexes.
//!
//! Adds and updates for the same request would otherwise interleave their
//! multi-statement writes. Each id gets a `tokio::sync::Mutex` on first use;
//! the entry is dropped again once nobody holds or waits on it.
//!
//! Multiple keys are always acquired in sorted order, so two operations that
//! both touch ids A and B cannot deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys` (duplicates allowed) and return a guard that
    /// releases them all.
    pub async fn lock(&self, keys: &[&str]) -> KeyGuard<'_> {
        let mut sorted: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            let mutex = self.locks.entry(key.clone()).or_default().clone();
            guards.push(mutex.lock_owned().await);
        }

        KeyGuard { owner: self, keys: sorted, guards }
    }

    /// Number of ids currently locked or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            // Only the map's own reference left: no holder, no waiter.
            self.owner
                .locks
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
