//! Consumer Bindings
//!
//! A [`ConsumerBinding`] is one feature area's view of the stream. It
//! declares symbols of interest, registers callbacks and reads snapshots
//! without knowing which endpoint serves which asset class or who else is
//! subscribed.
//!
//! Symbol changes go through the subscription ledger first; only symbols
//! whose consumer count crosses zero reach the transport session. Dropping
//! a binding (or calling [`ConsumerBinding::detach`]) releases its symbols
//! and callbacks and leaves every other consumer's subscriptions alone.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Stream, StreamExt, future};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{
    AssetClass, ConnectionState, PriceUpdate, StreamError, Symbol, normalize_symbol,
};
use crate::domain::subscription::{ConsumerId, SubscriptionChanges, SubscriptionRequest};
use crate::infrastructure::broadcast::CallbackHandle;
use crate::infrastructure::feed::SessionError;

use super::stream::StreamCore;

/// Async stream of the price updates a binding subscribed to.
pub type UpdateStream = Pin<Box<dyn Stream<Item = Arc<PriceUpdate>> + Send>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by [`ConsumerBinding`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// No configured endpoint serves the asset class.
    #[error("no feed endpoint serves asset class {0}")]
    UnroutedAssetClass(AssetClass),

    /// The binding was detached.
    #[error("consumer binding has been detached")]
    Detached,

    /// The session serving the asset class has stopped.
    #[error(transparent)]
    Session(#[from] SessionError),
}

// =============================================================================
// Consumer Binding
// =============================================================================

/// One consumer's handle on the market stream.
pub struct ConsumerBinding {
    core: Arc<StreamCore>,
    id: ConsumerId,
    label: String,
    detached: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConsumerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerBinding")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

impl ConsumerBinding {
    pub(crate) fn new(core: Arc<StreamCore>, id: ConsumerId, label: String) -> Self {
        let cancel = core.cancel.child_token();
        Self {
            core,
            id,
            label,
            detached: AtomicBool::new(false),
            cancel,
        }
    }

    /// Process-unique consumer id.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Label given at bind time.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Check if the binding was detached.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    // =========================================================================
    // Symbols of Interest
    // =========================================================================

    /// Add symbols of interest.
    ///
    /// Symbols are normalized; ones this binding already holds are ignored.
    /// While the session is not connected the request is queued and applied
    /// on the next open.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is detached, no endpoint serves the
    /// asset class, or the session has stopped.
    pub fn subscribe<I, S>(&self, asset_class: AssetClass, symbols: I) -> Result<(), BindingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = normalize_all(symbols);
        self.apply(asset_class, |core, id| {
            core.subscriptions.add_subscriptions(id, asset_class, &symbols)
        })
    }

    /// Remove symbols of interest.
    ///
    /// Symbols another consumer still wants stay subscribed upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is detached, no endpoint serves the
    /// asset class, or the session has stopped.
    pub fn unsubscribe<I, S>(&self, asset_class: AssetClass, symbols: I) -> Result<(), BindingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = normalize_all(symbols);
        self.apply(asset_class, |core, id| {
            core.subscriptions.remove_subscriptions(id, asset_class, &symbols)
        })
    }

    /// Replace this binding's symbols for one asset class.
    ///
    /// Only the difference against the current set is sent upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is detached, no endpoint serves the
    /// asset class, or the session has stopped.
    pub fn set_symbols<I, S>(&self, asset_class: AssetClass, symbols: I) -> Result<(), BindingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = normalize_all(symbols);
        self.apply(asset_class, |core, id| {
            core.subscriptions.replace_subscriptions(id, asset_class, &symbols)
        })
    }

    /// Symbols this binding holds for an asset class, sorted.
    #[must_use]
    pub fn symbols(&self, asset_class: AssetClass) -> Vec<Symbol> {
        self.core.subscriptions.consumer_symbols(self.id, asset_class)
    }

    /// Every request this binding holds.
    #[must_use]
    pub fn requests(&self) -> Vec<SubscriptionRequest> {
        self.core
            .subscriptions
            .consumer_asset_classes(self.id)
            .into_iter()
            .flat_map(|asset_class| {
                self.symbols(asset_class)
                    .into_iter()
                    .map(move |symbol| SubscriptionRequest { asset_class, symbol })
            })
            .collect()
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Call `callback` for every update of a symbol this binding holds.
    ///
    /// Callbacks run on the router task and must not block.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is detached.
    pub fn on_update<F>(&self, callback: F) -> Result<CallbackHandle, BindingError>
    where
        F: Fn(&PriceUpdate) + Send + Sync + 'static,
    {
        let _order = self.core.upstream_order.lock();
        self.ensure_attached()?;
        Ok(self.core.hub.callbacks().on_update(self.id, callback))
    }

    /// Call `callback` on every session state change.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is detached.
    pub fn on_connection_state<F>(&self, callback: F) -> Result<CallbackHandle, BindingError>
    where
        F: Fn(AssetClass, ConnectionState) + Send + Sync + 'static,
    {
        let _order = self.core.upstream_order.lock();
        self.ensure_attached()?;
        Ok(self.core.hub.callbacks().on_state(self.id, callback))
    }

    /// Call `callback` with every soft error.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is detached.
    pub fn on_error<F>(&self, callback: F) -> Result<CallbackHandle, BindingError>
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        let _order = self.core.upstream_order.lock();
        self.ensure_attached()?;
        Ok(self.core.hub.callbacks().on_error(self.id, callback))
    }

    /// Remove one of this binding's callbacks.
    ///
    /// Returns `false` for unknown handles and handles of other bindings.
    pub fn remove_callback(&self, handle: CallbackHandle) -> bool {
        self.core.hub.callbacks().remove(self.id, handle)
    }

    /// Stream of updates for the symbols this binding holds.
    ///
    /// The filter follows later subscription changes. The stream ends when
    /// the binding is detached or the client shuts down. A receiver that
    /// falls behind skips the missed updates; the store still has them.
    #[must_use]
    pub fn updates(&self) -> UpdateStream {
        let subscriptions = Arc::clone(&self.core.subscriptions);
        let consumer = self.id;
        let label = self.label.clone();

        BroadcastStream::new(self.core.hub.updates_rx())
            .filter_map(move |item| {
                let kept = match item {
                    Ok(update) => subscriptions
                        .is_subscribed(consumer, update.asset_class, &update.symbol)
                        .then_some(update),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(consumer, label = %label, skipped, "Update stream lagged");
                        None
                    }
                };
                future::ready(kept)
            })
            .take_until(self.cancel.clone().cancelled_owned())
            .boxed()
    }

    // =========================================================================
    // Snapshot and State
    // =========================================================================

    /// Most recent update for a symbol, whoever subscribed to it.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<Arc<PriceUpdate>> {
        self.core.store.get(symbol)
    }

    /// Most recent updates for the symbols that have one, in input order.
    #[must_use]
    pub fn latest_many<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Arc<PriceUpdate>> {
        self.core.store.get_many(symbols)
    }

    /// State of the session serving an asset class.
    #[must_use]
    pub fn connection_state(&self, asset_class: AssetClass) -> ConnectionState {
        self.core.state(asset_class)
    }

    /// Check if every session this binding depends on is connected.
    ///
    /// A binding without symbols depends on every routed asset class.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let mut asset_classes = self.core.subscriptions.consumer_asset_classes(self.id);
        if asset_classes.is_empty() {
            asset_classes = AssetClass::ALL
                .into_iter()
                .filter(|asset_class| self.core.route(*asset_class).is_some())
                .collect();
        }

        !asset_classes.is_empty()
            && asset_classes
                .into_iter()
                .all(|asset_class| self.connection_state(asset_class).is_connected())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release every symbol and callback of this binding.
    ///
    /// Symbols still wanted by other consumers stay subscribed upstream.
    /// Calling it again, or after the client shut down, does nothing.
    pub fn detach(&self) {
        let (changes, callbacks) = {
            let _order = self.core.upstream_order.lock();
            if self.detached.swap(true, Ordering::AcqRel) {
                return;
            }

            let changes = self.core.subscriptions.consumer_disconnected(self.id);
            for (asset_class, change) in &changes {
                if let Some(session) = self.core.route(*asset_class)
                    && let Err(e) = session.unsubscribe(*asset_class, change.unsubscribe.clone())
                {
                    tracing::debug!(consumer = self.id, error = %e, "Unsubscribe on detach not delivered");
                }
            }
            (changes, self.core.hub.callbacks().remove_consumer(self.id))
        };

        self.cancel.cancel();

        tracing::debug!(
            consumer = self.id,
            label = %self.label,
            released = changes.values().map(|c| c.unsubscribe.len()).sum::<usize>(),
            callbacks,
            "Consumer detached"
        );
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_attached(&self) -> Result<(), BindingError> {
        if self.is_detached() {
            Err(BindingError::Detached)
        } else {
            Ok(())
        }
    }

    /// Update the ledger and forward the upstream diff, in one critical
    /// section. Nothing is recorded once the client has shut down.
    fn apply<F>(&self, asset_class: AssetClass, update: F) -> Result<(), BindingError>
    where
        F: FnOnce(&StreamCore, ConsumerId) -> SubscriptionChanges,
    {
        self.ensure_attached()?;
        let session = self
            .core
            .route(asset_class)
            .ok_or(BindingError::UnroutedAssetClass(asset_class))?;

        // Detach and shutdown flip under the same lock; re-check before
        // touching the ledger.
        let _order = self.core.upstream_order.lock();
        self.ensure_attached()?;
        if self.core.cancel.is_cancelled() {
            return Err(SessionError::Stopped(session.endpoint().to_string()).into());
        }
        let changes = update(&self.core, self.id);

        if !changes.unsubscribe.is_empty() {
            tracing::debug!(consumer = self.id, %asset_class, symbols = ?changes.unsubscribe, "Releasing symbols upstream");
            session.unsubscribe(asset_class, changes.unsubscribe)?;
        }
        if !changes.subscribe.is_empty() {
            tracing::debug!(consumer = self.id, %asset_class, symbols = ?changes.subscribe, "Requesting symbols upstream");
            session.subscribe(asset_class, changes.subscribe)?;
        }

        Ok(())
    }
}

impl Drop for ConsumerBinding {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Normalize and deduplicate symbols, dropping blanks.
fn normalize_all<I, S>(symbols: I) -> Vec<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<Symbol> = symbols
        .into_iter()
        .map(|symbol| normalize_symbol(symbol.as_ref()))
        .filter(|symbol| !symbol.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Group requests by asset class.
#[must_use]
pub fn group_requests(requests: &[SubscriptionRequest]) -> BTreeMap<AssetClass, Vec<Symbol>> {
    let mut grouped: BTreeMap<AssetClass, Vec<Symbol>> = BTreeMap::new();
    for request in requests {
        grouped
            .entry(request.asset_class)
            .or_default()
            .push(normalize_symbol(&request.symbol));
    }
    grouped
}
