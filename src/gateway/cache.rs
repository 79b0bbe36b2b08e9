//! TTL cache for aggregate listings.
//!
//! Aggregating `resources/list` or `prompts/list` fans out to every
//! healthy backend; the cache bounds how often that happens. Entries are
//! keyed by method name and expire individually. A stale entry is never
//! served: expiry is checked on every read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug)]
struct CacheEntry {
    payload: Value,
    expires_at: Instant,
}

/// Small TTL cache keyed by method name.
///
/// Concurrent readers recompute on miss; duplicate computation is
/// acceptable, serving expired payloads is not.
#[derive(Debug)]
pub struct ListingCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ListingCache {
    /// Create a cache with the given entry lifetime. A zero TTL disables
    /// caching entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Whether caching is active.
    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Fetch an unexpired entry.
    pub fn get(&self, method: &str) -> Option<Value> {
        if !self.enabled() {
            return None;
        }
        let entries = self.entries.read();
        let entry = entries.get(method)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.payload.clone())
    }

    /// Store a freshly-computed payload.
    pub fn put(&self, method: &str, payload: Value) {
        if !self.enabled() {
            return;
        }
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(method.to_string(), entry);
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        if !self.enabled() {
            return;
        }
        let now = Instant::now();
        self.entries.write().retain(|_, entry| entry.expires_at > now);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
