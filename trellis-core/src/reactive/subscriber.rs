//! Listener registry for observers.
//!
//! A listener is a host callback run when an observer sees its target
//! change. Registering one hands back a [`Disconnect`] handle that removes
//! it again.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::scope::Disposable;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type Listener = Arc<dyn Fn() + Send + Sync>;

/// Listeners of one observer, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Mutex<IndexMap<ListenerId, Listener>>,
}

impl Listeners {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add(self: &Arc<Self>, listener: Listener) -> Disconnect {
        let id = ListenerId::new();
        self.entries.lock().insert(id, listener);
        Disconnect {
            id,
            listeners: Arc::downgrade(self),
        }
    }

    /// Copy the current listeners out, so they can run without the lock.
    pub(crate) fn snapshot(&self) -> Vec<Listener> {
        self.entries.lock().values().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn remove(&self, id: ListenerId) -> bool {
        self.entries.lock().shift_remove(&id).is_some()
    }
}

/// Handle that removes a listener from its observer.
///
/// Dropping the handle leaves the listener connected; it lives until
/// [`disconnect`](Self::disconnect) is called or the observer is destroyed.
/// The handle is also a [`Disposable`], so it can be handed to a scope.
pub struct Disconnect {
    id: ListenerId,
    listeners: Weak<Listeners>,
}

impl Disconnect {
    /// A handle that removes nothing.
    pub(crate) fn inert() -> Self {
        Self {
            id: ListenerId::new(),
            listeners: Weak::new(),
        }
    }

    /// Get the listener's ID.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns whether it was still connected.
    pub fn disconnect(&self) -> bool {
        match self.listeners.upgrade() {
            Some(listeners) => listeners.remove(self.id),
            None => false,
        }
    }
}

impl Disposable for Disconnect {
    fn dispose(&mut self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        self.disconnect();
        Ok(())
    }
}

impl fmt::Debug for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disconnect").field("id", &self.id).finish()
    }
}
