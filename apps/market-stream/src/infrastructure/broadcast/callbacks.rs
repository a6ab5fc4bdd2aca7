//! Consumer Callback Registry
//!
//! Callbacks are keyed by an opaque [`CallbackHandle`] and owned by a
//! consumer, so a binding can drop one callback or all of its callbacks
//! without touching anyone else's.
//!
//! Dispatch never runs user code under the registry lock: the callbacks are
//! cloned out first, then invoked. A callback may therefore register or
//! remove callbacks itself.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::streaming::{AssetClass, ConnectionState, PriceUpdate, StreamError};
use crate::domain::subscription::ConsumerId;

/// Callback invoked with each price update the consumer asked for.
pub type UpdateCallback = Arc<dyn Fn(&PriceUpdate) + Send + Sync>;

/// Callback invoked on every connection state change of a session.
pub type StateCallback = Arc<dyn Fn(AssetClass, ConnectionState) + Send + Sync>;

/// Callback invoked with every soft error.
pub type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Opaque handle identifying one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackHandle(u64);

#[derive(Clone)]
enum Callback {
    Update(UpdateCallback),
    State(StateCallback),
    Error(ErrorCallback),
}

struct Entry {
    consumer: ConsumerId,
    callback: Callback,
}

/// Registry of consumer callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    next_handle: AtomicU64,
    entries: RwLock<BTreeMap<CallbackHandle, Entry>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.len())
            .finish_non_exhaustive()
    }
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a price update callback for `consumer`.
    pub fn on_update<F>(&self, consumer: ConsumerId, callback: F) -> CallbackHandle
    where
        F: Fn(&PriceUpdate) + Send + Sync + 'static,
    {
        self.insert(consumer, Callback::Update(Arc::new(callback)))
    }

    /// Register a connection state callback for `consumer`.
    pub fn on_state<F>(&self, consumer: ConsumerId, callback: F) -> CallbackHandle
    where
        F: Fn(AssetClass, ConnectionState) + Send + Sync + 'static,
    {
        self.insert(consumer, Callback::State(Arc::new(callback)))
    }

    /// Register a soft error callback for `consumer`.
    pub fn on_error<F>(&self, consumer: ConsumerId, callback: F) -> CallbackHandle
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.insert(consumer, Callback::Error(Arc::new(callback)))
    }

    /// Remove one callback owned by `consumer`.
    ///
    /// Returns `false` if the handle is unknown or belongs to another
    /// consumer.
    pub fn remove(&self, consumer: ConsumerId, handle: CallbackHandle) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&handle) {
            Some(entry) if entry.consumer == consumer => entries.remove(&handle).is_some(),
            _ => false,
        }
    }

    /// Remove every callback owned by `consumer`. Returns how many were removed.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.consumer != consumer);
        before - entries.len()
    }

    /// Update callbacks with their owners, in registration order.
    #[must_use]
    pub fn update_callbacks(&self) -> Vec<(ConsumerId, UpdateCallback)> {
        self.entries
            .read()
            .values()
            .filter_map(|entry| match &entry.callback {
                Callback::Update(callback) => Some((entry.consumer, Arc::clone(callback))),
                _ => None,
            })
            .collect()
    }

    /// State callbacks, in registration order.
    #[must_use]
    pub fn state_callbacks(&self) -> Vec<StateCallback> {
        self.entries
            .read()
            .values()
            .filter_map(|entry| match &entry.callback {
                Callback::State(callback) => Some(Arc::clone(callback)),
                _ => None,
            })
            .collect()
    }

    /// Error callbacks, in registration order.
    #[must_use]
    pub fn error_callbacks(&self) -> Vec<ErrorCallback> {
        self.entries
            .read()
            .values()
            .filter_map(|entry| match &entry.callback {
                Callback::Error(callback) => Some(Arc::clone(callback)),
                _ => None,
            })
            .collect()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn insert(&self, consumer: ConsumerId, callback: Callback) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entries.write().insert(handle, Entry { consumer, callback });
        handle
    }
}
