// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory retry counters keyed by message id.
//!
//! The ledger is owned by a dispatcher and shared with its per-delivery tasks.
//! Nothing is persisted: after a restart a redelivered message starts over at
//! zero failures.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Default)]
pub struct RetryLedger {
    counts: Mutex<HashMap<String, u32>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        RetryLedger::default()
    }

    /// Consecutive failures recorded for `id`, 0 when absent.
    pub fn get(&self, id: &str) -> u32 {
        self.lock().get(id).copied().unwrap_or_default()
    }

    /// Records one more failure for `id` and returns the new count.
    pub fn increment(&self, id: &str) -> u32 {
        let mut counts = self.lock();
        let count = counts.entry(id.to_owned()).or_default();
        *count = count.saturating_add(1);
        *count
    }

    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // a panicking holder cannot leave the map half-updated
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
