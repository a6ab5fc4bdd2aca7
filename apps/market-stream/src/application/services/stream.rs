//! Market Stream Facade
//!
//! Builds the whole client from a [`StreamConfig`]: one transport session
//! and one message router per distinct endpoint, a shared latest-value
//! store, the subscription ledger and the update hub. Consumers get at it
//! through [`MarketStream::bind`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedConnector, MarketEventSink};
use crate::domain::snapshot::LatestValueStore;
use crate::domain::streaming::{AssetClass, ConnectionState, PriceUpdate, StreamError};
use crate::domain::subscription::{
    ConsumerId, DesiredSubscriptionSet, SubscriptionManager, TotalSubscriptionStats,
};
use crate::infrastructure::broadcast::UpdateHub;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::feed::{
    MessageRouter, SessionConfig, SessionError, SessionHandle, TransportSession, WsConnector,
};

use super::binding::ConsumerBinding;

// =============================================================================
// Shared State
// =============================================================================

/// State shared by the facade and every binding.
pub(crate) struct StreamCore {
    sessions: Vec<SessionHandle>,
    routes: BTreeMap<AssetClass, usize>,
    pub(crate) subscriptions: Arc<SubscriptionManager>,
    pub(crate) store: Arc<LatestValueStore>,
    pub(crate) hub: Arc<UpdateHub>,
    /// Held across ledger bookkeeping and command enqueue so upstream frames
    /// follow bookkeeping order. Detach, callback registration and shutdown
    /// take it too.
    pub(crate) upstream_order: Mutex<()>,
    next_consumer: AtomicU64,
    pub(crate) cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamCore {
    /// Session serving an asset class.
    pub(crate) fn route(&self, asset_class: AssetClass) -> Option<&SessionHandle> {
        self.routes
            .get(&asset_class)
            .and_then(|index| self.sessions.get(*index))
    }

    pub(crate) fn state(&self, asset_class: AssetClass) -> ConnectionState {
        self.route(asset_class)
            .map_or(ConnectionState::Disconnected, SessionHandle::state)
    }

    fn next_consumer_id(&self) -> ConsumerId {
        self.next_consumer.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for StreamCore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Market Stream
// =============================================================================

/// Real-time market data client.
///
/// Cheap to clone; clones share the same sessions, store and consumers.
///
/// # Example
///
/// ```rust,no_run
/// use market_stream::{AssetClass, MarketStream, StreamConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = StreamConfig::from_env()?;
/// let stream = MarketStream::with_websocket(&config);
///
/// let watchlist = stream.bind("watchlist");
/// watchlist.subscribe(AssetClass::Crypto, ["BTCUSDT", "ETHUSDT"])?;
/// watchlist.on_update(|update| println!("{} {}", update.display_symbol, update.price))?;
///
/// // Later: last known value, without waiting for the next frame
/// let btc = stream.get("BTCUSDT");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MarketStream {
    core: Arc<StreamCore>,
}

impl std::fmt::Debug for MarketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStream")
            .field("sessions", &self.core.sessions)
            .field("symbols", &self.core.store.len())
            .finish_non_exhaustive()
    }
}

impl MarketStream {
    /// Create the client and spawn its sessions.
    ///
    /// When `config.auto_connect` is set every session starts connecting
    /// immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(config: &StreamConfig, connector: Arc<dyn FeedConnector>) -> Self {
        let cancel = CancellationToken::new();
        let subscriptions = Arc::new(SubscriptionManager::new());
        let store = Arc::new(LatestValueStore::new());
        let hub = Arc::new(UpdateHub::new(config.channels, Arc::clone(&subscriptions)));

        let mut sessions = Vec::new();
        let mut routes = BTreeMap::new();
        let mut tasks = Vec::new();

        for route in config.session_routes() {
            let session_config = SessionConfig::from_settings(
                route.endpoint.clone(),
                route.asset_classes.clone(),
                &config.websocket,
                &config.channels,
            );
            let (handle, events, session_task) = TransportSession::spawn(
                session_config,
                Arc::clone(&connector),
                cancel.child_token(),
            );

            let sink: Arc<dyn MarketEventSink> = Arc::clone(&hub) as Arc<dyn MarketEventSink>;
            let router = MessageRouter::new(
                route.endpoint.clone(),
                route.asset_classes.clone(),
                Arc::clone(&store),
                sink,
            );
            tasks.push(session_task);
            tasks.push(tokio::spawn(router.run(events)));

            for asset_class in &route.asset_classes {
                routes.insert(*asset_class, sessions.len());
            }

            tracing::info!(
                endpoint = %route.endpoint,
                asset_classes = ?route.asset_classes,
                "Transport session created"
            );
            sessions.push(handle);
        }

        let stream = Self {
            core: Arc::new(StreamCore {
                sessions,
                routes,
                subscriptions,
                store,
                hub,
                upstream_order: Mutex::new(()),
                next_consumer: AtomicU64::new(1),
                cancel,
                tasks: Mutex::new(tasks),
            }),
        };

        if config.auto_connect
            && let Err(e) = stream.connect()
        {
            tracing::warn!(error = %e, "Auto-connect failed");
        }

        stream
    }

    /// Create the client over real WebSocket connections.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_websocket(config: &StreamConfig) -> Self {
        Self::new(config, Arc::new(WsConnector::new()))
    }

    /// Attach a new consumer.
    ///
    /// `label` only appears in logs.
    #[must_use]
    pub fn bind(&self, label: impl Into<String>) -> ConsumerBinding {
        let id = self.core.next_consumer_id();
        let binding = ConsumerBinding::new(Arc::clone(&self.core), id, label.into());
        tracing::debug!(consumer = id, label = binding.label(), "Consumer bound");
        binding
    }

    /// Connect every session. A session in `Failed` starts a fresh retry
    /// budget.
    ///
    /// # Errors
    ///
    /// Returns an error if a session has stopped.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.core.sessions.iter().try_for_each(SessionHandle::connect)
    }

    /// Close every session normally and stop reconnecting.
    ///
    /// Subscriptions are kept and replayed on the next `connect()`.
    ///
    /// # Errors
    ///
    /// Returns an error if a session has stopped.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.core.sessions.iter().try_for_each(SessionHandle::disconnect)
    }

    /// Stop every session and router, waiting for them to finish.
    pub async fn shutdown(&self) {
        {
            let _order = self.core.upstream_order.lock();
            self.core.cancel.cancel();
        }

        let tasks = std::mem::take(&mut *self.core.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Stream task ended abnormally");
            }
        }

        tracing::info!("Market stream shut down");
    }

    /// Latest-value store shared by all sessions.
    #[must_use]
    pub fn store(&self) -> Arc<LatestValueStore> {
        Arc::clone(&self.core.store)
    }

    /// Most recent update for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Arc<PriceUpdate>> {
        self.core.store.get(symbol)
    }

    /// Most recent updates for the symbols that have one, in input order.
    #[must_use]
    pub fn get_many<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Arc<PriceUpdate>> {
        self.core.store.get_many(symbols)
    }

    /// State of the session serving an asset class.
    ///
    /// Asset classes without an endpoint report `Disconnected`.
    #[must_use]
    pub fn connection_state(&self, asset_class: AssetClass) -> ConnectionState {
        self.core.state(asset_class)
    }

    /// Receiver that observes state changes for an asset class.
    ///
    /// Asset classes without an endpoint get a receiver that stays
    /// `Disconnected`.
    #[must_use]
    pub fn state_changes(&self, asset_class: AssetClass) -> watch::Receiver<ConnectionState> {
        match self.core.route(asset_class) {
            Some(session) => session.state_changes(),
            None => watch::channel(ConnectionState::Disconnected).1,
        }
    }

    /// Endpoint serving an asset class.
    #[must_use]
    pub fn endpoint_for(&self, asset_class: AssetClass) -> Option<&str> {
        self.core.route(asset_class).map(SessionHandle::endpoint)
    }

    /// Union of every consumer's subscriptions.
    #[must_use]
    pub fn desired_subscriptions(&self) -> DesiredSubscriptionSet {
        self.core.subscriptions.desired_set()
    }

    /// Subscription counts per asset class.
    #[must_use]
    pub fn subscription_stats(&self) -> TotalSubscriptionStats {
        self.core.subscriptions.total_stats()
    }

    /// Receiver for every soft error.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<StreamError> {
        self.core.hub.errors_rx()
    }

    /// Receiver for every price update, regardless of subscriber.
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<Arc<PriceUpdate>> {
        self.core.hub.updates_rx()
    }
}
