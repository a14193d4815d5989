//! Named event triggers with a thread-safe wake-up path.
//!
//! Triggers are edge-level: the callback runs at least once after each
//! `trigger_event`, and multiple `trigger_event` calls before a dispatch
//! coalesce into one callback invocation. `trigger_event` may be called
//! from any thread; the scheduler serializes the actual callback
//! invocation into its own loop iteration.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mio::Waker;

/// Opaque trigger identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(u64);

struct TriggerState {
    pending: AtomicBool,
}

/// Registry of triggers plus the mio [`Waker`] used to interrupt the
/// scheduler's poll wait when `trigger_event` is called from another
/// thread. Mirrors the bounded-MPSC-equivalent the design notes call for:
/// pending flags coalesce (a `bool`, not a counted channel), and the waker
/// guarantees the poll wakes up promptly.
pub struct TriggerTable {
    next_id: AtomicU64,
    states: parking_lot::RwLock<HashMap<TriggerId, Arc<TriggerState>>>,
    waker: Arc<Waker>,
}

impl TriggerTable {
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            states: parking_lot::RwLock::new(HashMap::new()),
            waker,
        }
    }

    pub fn create(&self) -> TriggerId {
        let id = TriggerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.states.write().insert(
            id,
            Arc::new(TriggerState {
                pending: AtomicBool::new(false),
            }),
        );
        id
    }

    pub fn delete(&self, id: TriggerId) {
        self.states.write().remove(&id);
    }

    /// Mark the trigger pending and wake the event loop. Safe to call from
    /// any thread.
    pub fn fire(&self, id: TriggerId) {
        if let Some(state) = self.states.read().get(&id) {
            state.pending.store(true, Ordering::Release);
            let _ = self.waker.wake();
        }
    }

    /// Drain all pending triggers in registration order, clearing their
    /// pending flags. Called once per loop iteration from the scheduler
    /// thread only.
    pub fn drain_pending(&self) -> Vec<TriggerId> {
        let states = self.states.read();
        let mut ids: Vec<_> = states.keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids.into_iter()
            .filter(|id| {
                states
                    .get(id)
                    .map(|s| s.pending.swap(false, Ordering::AcqRel))
                    .unwrap_or(false)
            })
            .collect()
    }
}
