//! Broadcast Channel Adapters
//!
//! Fan-out of everything the feed routers produce to consumers.
//!
//! # Architecture
//!
//! The `UpdateHub` implements [`MarketEventSink`] and delivers through two
//! mechanisms:
//! - Price updates and soft errors on tokio broadcast channels
//! - Consumer callbacks from the [`CallbackRegistry`]
//!
//! Connection state itself lives on each session's watch channel; the hub
//! only fans state changes out to callbacks.
//!
//! Update callbacks only see symbols their consumer subscribed to; the
//! subscription ledger is consulted at delivery time. A panicking callback
//! is logged and does not affect other consumers or the router.

mod callbacks;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::broadcast;

pub use callbacks::{CallbackHandle, CallbackRegistry, ErrorCallback, StateCallback, UpdateCallback};

use crate::application::ports::MarketEventSink;
use crate::domain::streaming::{AssetClass, ConnectionState, PriceUpdate, StreamError};
use crate::domain::subscription::SubscriptionManager;
use crate::infrastructure::config::ChannelSettings;

/// Capacity of the soft error channel.
const ERROR_CAPACITY: usize = 256;

// =============================================================================
// Update Hub
// =============================================================================

/// Central hub for update, state and error delivery.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use market_stream::domain::subscription::SubscriptionManager;
/// use market_stream::infrastructure::broadcast::UpdateHub;
/// use market_stream::infrastructure::config::ChannelSettings;
///
/// let hub = UpdateHub::new(ChannelSettings::default(), Arc::new(SubscriptionManager::new()));
///
/// // Every price update routed by any session
/// let _rx = hub.updates_rx();
/// assert_eq!(hub.update_receiver_count(), 1);
/// ```
pub struct UpdateHub {
    updates_tx: broadcast::Sender<Arc<PriceUpdate>>,
    errors_tx: broadcast::Sender<StreamError>,
    callbacks: CallbackRegistry,
    subscriptions: Arc<SubscriptionManager>,
}

impl std::fmt::Debug for UpdateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHub")
            .field("update_receivers", &self.updates_tx.receiver_count())
            .field("error_receivers", &self.errors_tx.receiver_count())
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl UpdateHub {
    /// Create a hub that filters update callbacks through `subscriptions`.
    #[must_use]
    pub fn new(channels: ChannelSettings, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            updates_tx: broadcast::channel(channels.update_capacity.max(1)).0,
            errors_tx: broadcast::channel(ERROR_CAPACITY).0,
            callbacks: CallbackRegistry::new(),
            subscriptions,
        }
    }

    /// Callback registry shared by all bindings.
    #[must_use]
    pub const fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Get a new receiver for every price update.
    #[must_use]
    pub fn updates_rx(&self) -> broadcast::Receiver<Arc<PriceUpdate>> {
        self.updates_tx.subscribe()
    }

    /// Get the number of active update receivers.
    #[must_use]
    pub fn update_receiver_count(&self) -> usize {
        self.updates_tx.receiver_count()
    }

    /// Get a new receiver for soft errors.
    #[must_use]
    pub fn errors_rx(&self) -> broadcast::Receiver<StreamError> {
        self.errors_tx.subscribe()
    }
}

impl MarketEventSink for UpdateHub {
    fn publish_update(&self, update: Arc<PriceUpdate>) {
        for (consumer, callback) in self.callbacks.update_callbacks() {
            if self
                .subscriptions
                .is_subscribed(consumer, update.asset_class, &update.symbol)
                && !invoke(|| callback(&update))
            {
                tracing::error!(consumer, symbol = %update.symbol, "Update callback panicked");
            }
        }

        // No receivers is fine; the store already holds the value.
        let _ = self.updates_tx.send(update);
    }

    fn publish_state(&self, asset_classes: &[AssetClass], state: ConnectionState) {
        for callback in self.callbacks.state_callbacks() {
            for asset_class in asset_classes {
                if !invoke(|| callback(*asset_class, state)) {
                    tracing::error!(asset_class = %asset_class, state = %state, "State callback panicked");
                }
            }
        }
    }

    fn publish_error(&self, error: StreamError) {
        for callback in self.callbacks.error_callbacks() {
            if !invoke(|| callback(&error)) {
                tracing::error!(error = %error, "Error callback panicked");
            }
        }

        let _ = self.errors_tx.send(error);
    }
}

/// Run a consumer callback, containing panics. Returns `false` if it panicked.
fn invoke(callback: impl FnOnce()) -> bool {
    catch_unwind(AssertUnwindSafe(callback)).is_ok()
}

// =============================================================================
// Tests
// =============================================================================
