//! Subscription Registry
//!
//! Records the (asset class, symbol) set a transport session should be
//! subscribed to. The registry only sees the final desired set: per-consumer
//! reference counting happens upstream in the subscription manager.
//!
//! Every change returns the control frame that describes it, carrying only
//! the symbols that actually changed the set. The session puts that frame on
//! the wire when connected and otherwise drops it, because the full set is
//! replayed on the next open anyway.

use crate::domain::streaming::{AssetClass, Symbol, normalize_symbol};
use crate::domain::subscription::DesiredSubscriptionSet;

use super::messages::ControlFrame;

/// Desired subscriptions of one transport session.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    desired: DesiredSubscriptionSet,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to the desired set.
    ///
    /// Returns a subscribe frame for the symbols that were not yet desired,
    /// or `None` when nothing changed.
    pub fn subscribe(&mut self, asset_class: AssetClass, symbols: &[Symbol]) -> Option<ControlFrame> {
        let mut added: Vec<Symbol> = Vec::new();

        for symbol in symbols.iter().map(|s| normalize_symbol(s)) {
            if symbol.is_empty() {
                continue;
            }
            if self.desired.insert(asset_class, symbol.clone()) {
                added.push(symbol);
            }
        }

        (!added.is_empty()).then(|| ControlFrame::subscribe(asset_class, added))
    }

    /// Remove symbols from the desired set.
    ///
    /// Returns an unsubscribe frame for the symbols that were desired, or
    /// `None` when nothing changed.
    pub fn unsubscribe(
        &mut self,
        asset_class: AssetClass,
        symbols: &[Symbol],
    ) -> Option<ControlFrame> {
        let mut removed: Vec<Symbol> = Vec::new();

        for symbol in symbols.iter().map(|s| normalize_symbol(s)) {
            if self.desired.remove(asset_class, &symbol) {
                removed.push(symbol);
            }
        }

        (!removed.is_empty()).then(|| ControlFrame::unsubscribe(asset_class, removed))
    }

    /// Frames that restore the whole desired set: one per asset class.
    #[must_use]
    pub fn replay_frames(&self) -> Vec<ControlFrame> {
        self.desired
            .asset_classes()
            .map(|asset_class| ControlFrame::subscribe(asset_class, self.desired.symbols(asset_class)))
            .collect()
    }

    /// Current desired set.
    #[must_use]
    pub const fn desired(&self) -> &DesiredSubscriptionSet {
        &self.desired
    }

    /// Number of desired symbols across classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.desired.len()
    }

    /// Check if nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}
