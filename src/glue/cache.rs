//! Content-addressed cache of compiled handler types.

use dashmap::DashMap;
use md5::{Digest, Md5};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::HandlerType;

/// MD5 hex digest of the exact source text.
pub fn source_digest(source: &str) -> String {
    hex::encode(Md5::digest(source.as_bytes()))
}

struct CacheEntry {
    handler_type: Arc<dyn HandlerType>,
    touched: AtomicU64,
}

/// Digest-keyed map of compiled handler types.
///
/// Entries are immutable once inserted. With a capacity the least recently
/// used entry is evicted to make room; without one the cache only grows.
pub struct GlueCache {
    entries: DashMap<String, CacheEntry>,
    capacity: Option<usize>,
    clock: AtomicU64,
}

impl GlueCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a cache holding at most `capacity` types (`None` or zero = unbounded).
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.filter(|c| *c > 0),
            clock: AtomicU64::new(0),
        }
    }

    /// Look up a compiled type by digest.
    pub fn get(&self, digest: &str) -> Option<Arc<dyn HandlerType>> {
        let entry = self.entries.get(digest)?;
        entry.touched.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.handler_type))
    }

    /// Insert `handler_type` unless the digest is already present.
    ///
    /// Returns whichever type ends up cached; a losing duplicate is dropped.
    pub fn insert_if_absent(
        &self,
        digest: String,
        handler_type: Arc<dyn HandlerType>,
    ) -> Arc<dyn HandlerType> {
        if let Some(capacity) = self.capacity {
            if !self.entries.contains_key(&digest) && self.entries.len() >= capacity {
                self.evict_least_recent();
            }
        }

        let touched = self.tick();
        let entry = self.entries.entry(digest).or_insert_with(|| CacheEntry {
            handler_type,
            touched: AtomicU64::new(touched),
        });
        Arc::clone(&entry.handler_type)
    }

    /// Whether a digest is cached.
    pub fn contains(&self, digest: &str) -> bool {
        self.entries.contains_key(digest)
    }

    /// Number of cached types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_least_recent(&self) {
        let eldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().touched.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());
        if let Some(digest) = eldest {
            self.entries.remove(&digest);
            tracing::debug!(digest = %digest, "Evicted compiled glue type");
        }
    }
}

impl Default for GlueCache {
    fn default() -> Self {
        Self::new()
    }
}
