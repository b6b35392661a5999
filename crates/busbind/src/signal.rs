//! # Signal Relay
//!
//! Per-proxy fan-out of typed signal notifications to registered listeners.
//!
//! ## Invariants
//!
//! - Listeners for a name run in registration order.
//! - Each emission walks a snapshot taken when it starts. A listener removed
//!   during an emission still runs for that emission, and one added during it
//!   does not.
//! - Removing an unknown or already-removed handle is a no-op.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use varpack::Value;

/// A typed signal notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    /// Unique name of the emitting connection.
    pub sender: String,
    pub signal_name: String,
    pub args: Vec<Value>,
}

/// Opaque handle returned by [`SignalRelay::connect`].
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct SignalHandlerId(u64);

pub type Listener = Arc<dyn Fn(&SignalEvent) + Send + Sync>;

#[derive(Default)]
pub struct SignalRelay {
    listeners: Mutex<Vec<(SignalHandlerId, String, Listener)>>,
    next_id: AtomicU64,
}

impl SignalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SignalHandlerId, String, Listener)>> {
        // Listeners run outside the lock, so a poisoned lock only means a panic elsewhere.
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, signal_name: &str, listener: Listener) -> SignalHandlerId {
        let id = SignalHandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, signal_name.to_string(), listener));
        id
    }

    /// Returns whether a listener was removed.
    pub fn disconnect(&self, id: SignalHandlerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(entry, _, _)| *entry != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, signal_name: &str) -> usize {
        self.lock().iter().filter(|(_, name, _)| name == signal_name).count()
    }

    /// Delivers `event` to every listener for its name. Returns how many ran.
    pub fn emit(&self, event: &SignalEvent) -> usize {
        let snapshot: Vec<Listener> = self
            .lock()
            .iter()
            .filter(|(_, name, _)| *name == event.signal_name)
            .map(|(_, _, listener)| listener.clone())
            .collect();

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

impl std::fmt::Debug for SignalRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRelay").field("listeners", &self.lock().len()).finish()
    }
}
