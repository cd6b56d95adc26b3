// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-session state for `memory_enabled` capabilities.
//!
//! Shaped after a sidecar pool: a bounded map of named slots, each
//! independently lockable so one session's handler call never blocks
//! another's. Here the "slot" holds opaque caller context instead of a
//! live process, and the per-entry lock is what satisfies §5's "per-session
//! handlers … MUST be serialized" rule.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

/// The mutable state held for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Opaque context the handler asked to carry forward to its next call.
    pub context: Option<serde_json::Value>,
    /// Used for eviction bookkeeping.
    last_used: Option<Instant>,
}

/// A bounded, FIFO-evicted map from `session_id` to a lockable [`SessionState`].
///
/// Holding a session's lock for the duration of a handler invocation is what
/// serializes concurrent calls against the same session; the store itself
/// is only locked for the brief get-or-create/evict bookkeeping.
#[derive(Debug)]
pub struct SessionStore {
    max_entries: usize,
    slots: Mutex<BTreeMap<String, Arc<AsyncMutex<SessionState>>>>,
    order: Mutex<VecDeque<String>>,
}

impl SessionStore {
    /// Build an empty store bounded to `max_entries` sessions.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            slots: Mutex::new(BTreeMap::new()),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Get the slot for `session_id`, creating it if absent.
    ///
    /// Creating a slot past `max_entries` evicts the oldest session.
    pub fn slot(&self, session_id: &str) -> Arc<AsyncMutex<SessionState>> {
        let mut slots = self.slots.lock().expect("session store lock poisoned");
        let mut order = self.order.lock().expect("session order lock poisoned");

        if let Some(existing) = slots.get(session_id) {
            return existing.clone();
        }

        let slot = Arc::new(AsyncMutex::new(SessionState::default()));
        slots.insert(session_id.to_string(), slot.clone());
        order.push_back(session_id.to_string());

        while slots.len() > self.max_entries {
            if let Some(oldest) = order.pop_front() {
                slots.remove(&oldest);
            } else {
                break;
            }
        }

        slot
    }

    /// Drop a session's state entirely.
    pub fn evict(&self, session_id: &str) {
        self.slots.lock().expect("session store lock poisoned").remove(session_id);
        self.order
            .lock()
            .expect("session order lock poisoned")
            .retain(|s| s != session_id);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("session store lock poisoned").len()
    }

    /// Whether the store currently holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionState {
    pub(crate) fn touch(&mut self) {
        self.last_used = Some(Instant::now());
    }
}
