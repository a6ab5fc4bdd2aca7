//! Subscription Management Types
//!
//! Domain types for tracking consumer interest in streamed symbols.
//!
//! # Design
//!
//! The subscription manager tracks:
//! - Which symbols each consumer is subscribed to, per asset class
//! - Reference counts per symbol, so the upstream set is the union
//! - The [`DesiredSubscriptionSet`] replayed after every reconnect
//!
//! Several consumers can want the same symbol while the feed only ever
//! sees one subscription for it. A symbol leaves the upstream set only when
//! its last consumer lets go.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use super::streaming::{AssetClass, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a consumer binding.
pub type ConsumerId = u64;

/// One unit of interest: a symbol within an asset class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionRequest {
    /// Asset class the symbol trades in.
    pub asset_class: AssetClass,
    /// Normalized symbol.
    pub symbol: Symbol,
}

// =============================================================================
// Desired Subscription Set
// =============================================================================

/// Union of all live consumer requests, ordered for deterministic frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredSubscriptionSet {
    by_class: BTreeMap<AssetClass, BTreeSet<Symbol>>,
}

impl DesiredSubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol. Returns `true` if it was not present.
    pub fn insert(&mut self, asset_class: AssetClass, symbol: Symbol) -> bool {
        self.by_class.entry(asset_class).or_default().insert(symbol)
    }

    /// Remove a symbol. Returns `true` if it was present.
    pub fn remove(&mut self, asset_class: AssetClass, symbol: &str) -> bool {
        let Some(symbols) = self.by_class.get_mut(&asset_class) else {
            return false;
        };

        let removed = symbols.remove(symbol);
        if symbols.is_empty() {
            self.by_class.remove(&asset_class);
        }
        removed
    }

    /// Check whether a symbol is desired.
    #[must_use]
    pub fn contains(&self, asset_class: AssetClass, symbol: &str) -> bool {
        self.by_class
            .get(&asset_class)
            .is_some_and(|symbols| symbols.contains(symbol))
    }

    /// Symbols desired for one asset class, in sorted order.
    #[must_use]
    pub fn symbols(&self, asset_class: AssetClass) -> Vec<Symbol> {
        self.by_class
            .get(&asset_class)
            .map(|symbols| symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Asset classes with at least one desired symbol.
    pub fn asset_classes(&self) -> impl Iterator<Item = AssetClass> + '_ {
        self.by_class.keys().copied()
    }

    /// Iterate over every request.
    pub fn iter(&self) -> impl Iterator<Item = SubscriptionRequest> + '_ {
        self.by_class.iter().flat_map(|(asset_class, symbols)| {
            symbols.iter().map(|symbol| SubscriptionRequest {
                asset_class: *asset_class,
                symbol: symbol.clone(),
            })
        })
    }

    /// Total number of desired symbols across classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_class.values().map(BTreeSet::len).sum()
    }

    /// Check if nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe to.
    pub subscribe: Vec<Symbol>,
    /// Symbols to unsubscribe from.
    pub unsubscribe: Vec<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: Vec::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: Vec::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Subscription State (per asset class)
// =============================================================================

/// Tracks subscriptions for a single asset class.
#[derive(Debug, Default)]
struct ClassSubscriptionState {
    /// Map from consumer ID to their subscribed symbols.
    consumer_symbols: HashMap<ConsumerId, HashSet<Symbol>>,
    /// Map from symbol to reference count.
    symbol_refcount: HashMap<Symbol, usize>,
}

impl ClassSubscriptionState {
    /// Add subscriptions for a consumer.
    ///
    /// Returns symbols that need upstream subscription (refcount went 0→1).
    fn add(&mut self, consumer: ConsumerId, symbols: &[Symbol]) -> Vec<Symbol> {
        let consumer_set = self.consumer_symbols.entry(consumer).or_default();
        let mut new_upstream = Vec::new();

        for symbol in symbols {
            if !consumer_set.insert(symbol.clone()) {
                continue;
            }

            let refcount = self.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;

            if *refcount == 1 {
                new_upstream.push(symbol.clone());
            }
        }

        if consumer_set.is_empty() {
            self.consumer_symbols.remove(&consumer);
        }

        new_upstream
    }

    /// Remove subscriptions for a consumer.
    ///
    /// Returns symbols that need upstream unsubscription (refcount went 1→0).
    fn remove(&mut self, consumer: ConsumerId, symbols: &[Symbol]) -> Vec<Symbol> {
        let Some(consumer_set) = self.consumer_symbols.get_mut(&consumer) else {
            return vec![];
        };

        let mut released = Vec::new();
        for symbol in symbols {
            if consumer_set.remove(symbol) {
                released.push(symbol.clone());
            }
        }

        if consumer_set.is_empty() {
            self.consumer_symbols.remove(&consumer);
        }

        self.release(released)
    }

    /// Remove all subscriptions for a consumer.
    ///
    /// Returns symbols that need upstream unsubscription.
    fn remove_consumer(&mut self, consumer: ConsumerId) -> Vec<Symbol> {
        let Some(consumer_set) = self.consumer_symbols.remove(&consumer) else {
            return vec![];
        };

        self.release(consumer_set)
    }

    /// Drop one reference per symbol; returns the symbols that reached zero.
    fn release(&mut self, symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
        let mut remove_upstream = Vec::new();

        for symbol in symbols {
            if let Some(refcount) = self.symbol_refcount.get_mut(&symbol) {
                *refcount = refcount.saturating_sub(1);

                if *refcount == 0 {
                    self.symbol_refcount.remove(&symbol);
                    remove_upstream.push(symbol);
                }
            }
        }

        remove_upstream
    }

    fn is_subscribed(&self, consumer: ConsumerId, symbol: &str) -> bool {
        self.consumer_symbols
            .get(&consumer)
            .is_some_and(|symbols| symbols.contains(symbol))
    }

    fn consumer_symbols(&self, consumer: ConsumerId) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .consumer_symbols
            .get(&consumer)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbol_refcount.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn symbol_count(&self) -> usize {
        self.symbol_refcount.len()
    }

    fn consumer_count(&self) -> usize {
        self.consumer_symbols.len()
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Manages subscriptions across all consumers and asset classes.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::streaming::AssetClass;
/// use market_stream::domain::subscription::SubscriptionManager;
///
/// let manager = SubscriptionManager::new();
/// let btc = ["BTCUSDT".to_string()];
///
/// // Consumer 1 subscribes - upstream subscribe needed
/// let changes = manager.add_subscriptions(1, AssetClass::Crypto, &btc);
/// assert_eq!(changes.subscribe, vec!["BTCUSDT".to_string()]);
///
/// // Consumer 2 also subscribes - no upstream change needed
/// let changes = manager.add_subscriptions(2, AssetClass::Crypto, &btc);
/// assert!(changes.is_empty());
///
/// // Consumer 1 leaves - still subscribed via Consumer 2
/// let changes = manager.remove_subscriptions(1, AssetClass::Crypto, &btc);
/// assert!(changes.is_empty());
///
/// // Consumer 2 leaves - now unsubscribe upstream
/// let changes = manager.remove_subscriptions(2, AssetClass::Crypto, &btc);
/// assert_eq!(changes.unsubscribe, vec!["BTCUSDT".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    equity: RwLock<ClassSubscriptionState>,
    forex: RwLock<ClassSubscriptionState>,
    crypto: RwLock<ClassSubscriptionState>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add subscriptions for a consumer.
    ///
    /// Returns changes that need to be applied upstream.
    pub fn add_subscriptions(
        &self,
        consumer: ConsumerId,
        asset_class: AssetClass,
        symbols: &[Symbol],
    ) -> SubscriptionChanges {
        let added = self.state(asset_class).write().add(consumer, symbols);
        SubscriptionChanges::subscribe_only(added)
    }

    /// Remove subscriptions for a consumer.
    ///
    /// Returns changes that need to be applied upstream.
    pub fn remove_subscriptions(
        &self,
        consumer: ConsumerId,
        asset_class: AssetClass,
        symbols: &[Symbol],
    ) -> SubscriptionChanges {
        let removed = self.state(asset_class).write().remove(consumer, symbols);
        SubscriptionChanges::unsubscribe_only(removed)
    }

    /// Replace a consumer's symbol set for one asset class.
    ///
    /// Only the difference against the consumer's current set is applied,
    /// and only symbols whose refcount crosses zero show up upstream.
    pub fn replace_subscriptions(
        &self,
        consumer: ConsumerId,
        asset_class: AssetClass,
        symbols: &[Symbol],
    ) -> SubscriptionChanges {
        let mut state = self.state(asset_class).write();

        let wanted: HashSet<&Symbol> = symbols.iter().collect();
        let current = state.consumer_symbols(consumer);

        let dropped: Vec<Symbol> = current
            .iter()
            .filter(|symbol| !wanted.contains(symbol))
            .cloned()
            .collect();
        let added: Vec<Symbol> = symbols
            .iter()
            .filter(|symbol| !current.contains(symbol))
            .cloned()
            .collect();

        SubscriptionChanges {
            subscribe: state.add(consumer, &added),
            unsubscribe: state.remove(consumer, &dropped),
        }
    }

    /// Handle consumer teardown.
    ///
    /// Removes all subscriptions for the consumer and returns the upstream
    /// changes per asset class. Calling it twice is harmless.
    pub fn consumer_disconnected(
        &self,
        consumer: ConsumerId,
    ) -> BTreeMap<AssetClass, SubscriptionChanges> {
        let mut changes = BTreeMap::new();

        for asset_class in AssetClass::ALL {
            let removed = self.state(asset_class).write().remove_consumer(consumer);

            if !removed.is_empty() {
                changes.insert(asset_class, SubscriptionChanges::unsubscribe_only(removed));
            }
        }

        changes
    }

    /// Check whether a consumer asked for a symbol.
    #[must_use]
    pub fn is_subscribed(&self, consumer: ConsumerId, asset_class: AssetClass, symbol: &str) -> bool {
        self.state(asset_class).read().is_subscribed(consumer, symbol)
    }

    /// Get all active symbols for an asset class, sorted.
    #[must_use]
    pub fn active_symbols(&self, asset_class: AssetClass) -> Vec<Symbol> {
        self.state(asset_class).read().active_symbols()
    }

    /// Get symbols for a specific consumer, sorted.
    #[must_use]
    pub fn consumer_symbols(&self, consumer: ConsumerId, asset_class: AssetClass) -> Vec<Symbol> {
        self.state(asset_class).read().consumer_symbols(consumer)
    }

    /// Asset classes in which the consumer holds at least one symbol.
    #[must_use]
    pub fn consumer_asset_classes(&self, consumer: ConsumerId) -> Vec<AssetClass> {
        AssetClass::ALL
            .into_iter()
            .filter(|asset_class| {
                self.state(*asset_class)
                    .read()
                    .consumer_symbols
                    .contains_key(&consumer)
            })
            .collect()
    }

    /// Union of every consumer's requests.
    #[must_use]
    pub fn desired_set(&self) -> DesiredSubscriptionSet {
        let mut desired = DesiredSubscriptionSet::new();
        for asset_class in AssetClass::ALL {
            for symbol in self.active_symbols(asset_class) {
                desired.insert(asset_class, symbol);
            }
        }
        desired
    }

    /// Get statistics for an asset class.
    #[must_use]
    pub fn stats(&self, asset_class: AssetClass) -> SubscriptionStats {
        let state = self.state(asset_class).read();
        SubscriptionStats {
            symbol_count: state.symbol_count(),
            consumer_count: state.consumer_count(),
        }
    }

    /// Get overall statistics.
    #[must_use]
    pub fn total_stats(&self) -> TotalSubscriptionStats {
        TotalSubscriptionStats {
            equity: self.stats(AssetClass::Equity),
            forex: self.stats(AssetClass::Forex),
            crypto: self.stats(AssetClass::Crypto),
        }
    }

    const fn state(&self, asset_class: AssetClass) -> &RwLock<ClassSubscriptionState> {
        match asset_class {
            AssetClass::Equity => &self.equity,
            AssetClass::Forex => &self.forex,
            AssetClass::Crypto => &self.crypto,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single asset class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of unique symbols.
    pub symbol_count: usize,
    /// Number of consumers.
    pub consumer_count: usize,
}

/// Overall subscription statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TotalSubscriptionStats {
    /// Equity subscription stats.
    pub equity: SubscriptionStats,
    /// Forex subscription stats.
    pub forex: SubscriptionStats,
    /// Crypto subscription stats.
    pub crypto: SubscriptionStats,
}

impl TotalSubscriptionStats {
    /// Total unique symbols across all asset classes.
    #[must_use]
    pub const fn symbol_count(&self) -> usize {
        self.equity.symbol_count + self.forex.symbol_count + self.crypto.symbol_count
    }
}

// =============================================================================
// Tests
// =============================================================================
