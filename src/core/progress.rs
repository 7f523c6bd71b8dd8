//! Progress reporting
//!
//! Latest event per item, queryable while a batch is still running. Each item
//! has a single writer, so a per-key concurrent map is all the locking needed.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::types::{BatchState, ProgressEvent};

/// Point-in-time view of a batch
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub state: BatchState,
    pub total_items: usize,
    pub items: BTreeMap<u32, ProgressEvent>,
}

#[derive(Debug, Default)]
pub struct ProgressReporter {
    latest: DashMap<u32, ProgressEvent>,
    state: Mutex<BatchState>,
    total_items: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event` as the latest for its item, replacing what was there
    pub fn record(&self, event: ProgressEvent) {
        debug!(
            item = event.item_index,
            phase = ?event.phase,
            percent = ?event.percent,
            speed = event.speed.as_deref().unwrap_or(""),
            "progress"
        );
        self.latest.insert(event.item_index, event);
    }

    /// Latest event per item, ordered by index
    pub fn current_status(&self) -> BTreeMap<u32, ProgressEvent> {
        self.latest
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn latest(&self, item_index: u32) -> Option<ProgressEvent> {
        self.latest.get(&item_index).map(|e| e.value().clone())
    }

    pub fn set_state(&self, state: BatchState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }

    pub fn state(&self) -> BatchState {
        self.state.lock().map(|guard| *guard).unwrap_or_default()
    }

    pub fn set_total_items(&self, total: usize) {
        self.total_items.store(total, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            state: self.state(),
            total_items: self.total_items.load(Ordering::Relaxed),
            items: self.current_status(),
        }
    }
}
