// SPDX-License-Identifier: MIT OR Apache-2.0
//! The resolver's descriptor cache: maps a fetch URL to the bytes, validators,
//! and freshness window for a previously-fetched `agent.json`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One cached descriptor fetch, keyed externally by its request URL.
///
/// The layout mirrors §6's persisted-state note: implementation-private,
/// no cross-implementation compatibility required, but stable enough to be
/// written to a key-value store if a host process wants that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The descriptor's raw JSON bytes.
    pub body_bytes: Vec<u8>,
    /// `ETag` from the response that produced this entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` from the response that produced this entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Unix epoch seconds when this entry was stored.
    pub stored_at_epoch: u64,
    /// Unix epoch seconds after which this entry must be revalidated.
    pub expires_at_epoch: u64,
}

impl CacheEntry {
    /// Whether this entry is still servable without a network call, as of
    /// `now_epoch`.
    pub fn is_fresh(&self, now_epoch: u64) -> bool {
        now_epoch < self.expires_at_epoch
    }
}

/// Current wall-clock time as Unix epoch seconds.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Pluggable storage for cached descriptor fetches.
///
/// A host process can implement this over its own key-value store; the
/// resolver ships [`InMemoryCache`] as the default.
pub trait CacheProvider: Send + Sync {
    /// Look up a cached entry by its request URL.
    fn get(&self, url: &str) -> Option<CacheEntry>;
    /// Insert or replace a cached entry.
    fn put(&self, url: &str, entry: CacheEntry);
    /// Remove a single cached entry.
    fn remove(&self, url: &str);
    /// Remove every cached entry.
    fn clear(&self);
}

/// A bounded, process-local descriptor cache.
///
/// Eviction is FIFO by insertion order once `max_entries` is exceeded — a
/// deliberate simplification of strict LRU, acceptable because the
/// resolver's cache correctness invariant (fresh entries served without a
/// network call, stale entries revalidated) doesn't depend on eviction order.
#[derive(Debug)]
pub struct InMemoryCache {
    max_entries: usize,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    order: Mutex<VecDeque<String>>,
}

impl InMemoryCache {
    /// Create an empty cache bounded to `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(BTreeMap::new()),
            order: Mutex::new(VecDeque::new()),
        }
    }
}

impl CacheProvider for InMemoryCache {
    fn get(&self, url: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries.get(url).cloned()
    }

    fn put(&self, url: &str, entry: CacheEntry) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let mut order = self.order.lock().expect("cache order lock poisoned");

        if !entries.contains_key(url) {
            order.push_back(url.to_string());
        }
        entries.insert(url.to_string(), entry);

        while entries.len() > self.max_entries {
            if let Some(oldest) = order.pop_front() {
                entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn remove(&self, url: &str) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let mut order = self.order.lock().expect("cache order lock poisoned");
        entries.remove(url);
        order.retain(|u| u != url);
    }

    fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
        self.order.lock().expect("cache order lock poisoned").clear();
    }
}
