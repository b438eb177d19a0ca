//! Per-job state shared by the stateful routers.
//!
//! The table is a `DashMap` keyed by job id. All entries are discarded once
//! the reset window has elapsed, and an optional capacity evicts the least
//! recently touched job before a new one is admitted.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::core::types::JobId;

/// Default reset window: 24 hours.
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

struct Slot<V> {
    value: V,
    touched: u64,
}

/// Concurrent job-keyed state with a fixed reset window.
pub struct JobStateTable<V> {
    entries: DashMap<JobId, Slot<V>>,
    reset_interval_ms: i64,
    valid_until_ms: AtomicI64,
    capacity: Option<usize>,
    clock: AtomicU64,
}

impl<V> JobStateTable<V> {
    /// Create a table.
    ///
    /// `capacity` of `None` (or zero) leaves the table unbounded.
    pub fn new(reset_interval: Duration, capacity: Option<usize>) -> Self {
        let reset_interval_ms = i64::try_from(reset_interval.as_millis()).unwrap_or(i64::MAX);
        Self {
            entries: DashMap::new(),
            reset_interval_ms,
            valid_until_ms: AtomicI64::new(now_ms().saturating_add(reset_interval_ms)),
            capacity: capacity.filter(|c| *c > 0),
            clock: AtomicU64::new(0),
        }
    }

    /// Run `f` against the state of `job_id`, creating it with `init` first.
    ///
    /// The entry's shard stays locked while `f` runs, so concurrent calls for
    /// the same job are serialized.
    pub fn with_state<R>(
        &self,
        job_id: JobId,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        self.with_state_at(now_ms(), job_id, init, f)
    }

    pub(crate) fn with_state_at<R>(
        &self,
        now_ms: i64,
        job_id: JobId,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        self.reset_if_expired(now_ms);

        if let Some(capacity) = self.capacity {
            if !self.entries.contains_key(&job_id) && self.entries.len() >= capacity {
                self.evict_least_recent();
            }
        }

        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.entries.entry(job_id).or_insert_with(|| Slot {
            value: init(),
            touched: tick,
        });
        slot.touched = tick;
        f(&mut slot.value)
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether state exists for `job_id`.
    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    /// Drop all state immediately.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn reset_if_expired(&self, now_ms: i64) {
        let valid_until = self.valid_until_ms.load(Ordering::Acquire);
        if now_ms <= valid_until {
            return;
        }
        let next = now_ms.saturating_add(self.reset_interval_ms);
        // Only the caller that wins the swap clears the table.
        if self
            .valid_until_ms
            .compare_exchange(valid_until, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let dropped = self.entries.len();
            self.entries.clear();
            tracing::debug!(dropped, "Reset router state table");
        }
    }

    fn evict_least_recent(&self) {
        let eldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().touched)
            .map(|entry| *entry.key());
        if let Some(job_id) = eldest {
            self.entries.remove(&job_id);
            tracing::trace!(job_id = %job_id, "Evicted router state");
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
