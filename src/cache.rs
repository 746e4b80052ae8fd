//! A process-local key/value store with per-entry time-to-live, used to memoize expensive host
//! queries across many concurrent pull-request evaluations.
//!
//! Values are stored as opaque [`Any`] payloads behind an [`Arc`]; consumers downcast on read.
//! Expired entries are simply reported as missing; they are physically removed the next time an
//! insert finds the store over its size cap.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, trace};

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
    expires_at: Instant,
}

/// Thread-safe TTL cache. Reads vastly outnumber writes, so storage sits behind a reader/writer
/// lock and the read path never takes the write half.
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl Default for TtlCache {
    fn default() -> Self {
        TtlCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl TtlCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        TtlCache {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_entries,
        }
    }

    /// Looks up `key`, downcasting the stored payload to `T`. Returns `None` for missing entries,
    /// expired entries, and entries stored under a different type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries.get(key)?;

        if entry.expires_at <= Instant::now() {
            trace!("Cache entry [{}] has expired.", key);
            return None;
        }

        entry.value.clone().downcast::<T>().ok()
    }

    /// Stores `value` under `key` with the cache-wide default TTL.
    pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Stores `value` under `key`, expiring after `ttl`.
    pub fn set_with_ttl<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            Self::cull(&mut entries, self.max_entries);
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value: Arc::new(value),
                stored_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired entries first; if the store is still at capacity, evicts the oldest
    /// surviving entries until one slot is free.
    fn cull(entries: &mut HashMap<String, CacheEntry>, max_entries: usize) {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);

        while entries.len() >= max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }

        debug!("Culled cache from [{}] down to [{}] entries.", before, entries.len());
    }
}
