//! State-change observers with explicit unsubscribe handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use llamactl_core::ServiceState;
use tracing::debug;

pub(super) type StateCallback = Arc<dyn Fn(&ServiceState) + Send + Sync>;

/// A state snapshot stamped with the order it was taken in.
pub(super) struct Transition {
    seq: u64,
    state: ServiceState,
}

impl Transition {
    pub(super) const fn new(seq: u64, state: ServiceState) -> Self {
        Self { seq, state }
    }

    pub(super) const fn state(&self) -> &ServiceState {
        &self.state
    }
}

#[derive(Default)]
pub(super) struct ObserverList {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, StateCallback)>>,
    /// Sequence number of the last delivered transition. Held while
    /// delivering so observers see transitions in order.
    delivered: Mutex<u64>,
}

impl ObserverList {
    pub(super) fn register(self: &Arc<Self>, callback: StateCallback) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        ObserverHandle {
            id,
            list: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Invoke every observer, unless a newer transition was already
    /// delivered. Callbacks may read supervisor state but must not trigger
    /// another transition synchronously.
    pub(super) fn notify(&self, transition: Transition) {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        if transition.seq <= *delivered {
            debug!(seq = transition.seq, latest = *delivered, "Dropping stale state snapshot");
            return;
        }
        *delivered = transition.seq;

        let callbacks: Vec<StateCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&transition.state);
        }
    }

    pub(super) fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Keeps a state observer registered. Dropping the handle unsubscribes.
#[must_use = "dropping the handle unsubscribes the observer"]
pub struct ObserverHandle {
    id: u64,
    list: Weak<ObserverList>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}
