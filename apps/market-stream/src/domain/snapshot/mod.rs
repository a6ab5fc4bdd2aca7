//! Latest-Value Store
//!
//! Symbol-keyed map holding the most recent [`PriceUpdate`] seen for every
//! symbol. Entries are swapped whole; a record is never mutated in place.
//! The map grows as new symbols are observed and is never evicted.
//!
//! Only the feed routers write to the store. Readers anywhere in the
//! process get shared handles to immutable records.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::streaming::{PriceUpdate, Symbol, normalize_symbol};

/// Latest price per symbol, last write wins.
#[derive(Debug, Default)]
pub struct LatestValueStore {
    entries: RwLock<HashMap<Symbol, Arc<PriceUpdate>>>,
}

impl LatestValueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for the update's symbol.
    ///
    /// Returns the previous record, if any.
    pub(crate) fn put(&self, update: Arc<PriceUpdate>) -> Option<Arc<PriceUpdate>> {
        self.entries.write().insert(update.symbol.clone(), update)
    }

    /// Most recent update for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Arc<PriceUpdate>> {
        let key = normalize_symbol(symbol);
        self.entries.read().get(&key).cloned()
    }

    /// Updates for the requested symbols.
    ///
    /// Keeps the input order and silently omits symbols never seen.
    #[must_use]
    pub fn get_many<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Arc<PriceUpdate>> {
        let entries = self.entries.read();
        symbols
            .iter()
            .filter_map(|symbol| entries.get(&normalize_symbol(symbol.as_ref())).cloned())
            .collect()
    }

    /// Copy of the whole map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Symbol, Arc<PriceUpdate>> {
        self.entries.read().clone()
    }

    /// Symbols with a stored value, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.entries.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of symbols with a stored value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
