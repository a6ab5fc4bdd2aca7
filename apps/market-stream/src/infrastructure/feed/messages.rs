//! Feed Wire Message Types
//!
//! Wire format types for the market data feed. Outbound traffic is limited
//! to control frames; inbound traffic is tagged by a `type` field.
//!
//! # Control Frames (outbound)
//!
//! ```json
//! {"action": "subscribe", "assetClass": "crypto", "symbols": ["BTCUSDT", "ETHUSDT"]}
//! ```
//!
//! # Inbound Frames
//!
//! - `connected` / `connection_ack`: connection acknowledgment
//! - `price_update` / `price` / `update`: latest price for one symbol
//! - `subscribed` / `subscription_ack`: subscription confirmation
//! - `unsubscribed`: unsubscription confirmation
//! - `error`: feed-reported error, connection stays open

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{AssetClass, Symbol};

// =============================================================================
// Control Frames (outbound)
// =============================================================================

/// Direction of a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start streaming the listed symbols.
    Subscribe,
    /// Stop streaming the listed symbols.
    Unsubscribe,
}

/// Subscribe/unsubscribe request for one asset class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFrame {
    /// Subscribe or unsubscribe.
    pub action: ControlAction,
    /// Asset class the symbols belong to.
    pub asset_class: AssetClass,
    /// Symbols affected by the request.
    pub symbols: Vec<Symbol>,
}

impl ControlFrame {
    /// Create a subscribe frame.
    #[must_use]
    pub const fn subscribe(asset_class: AssetClass, symbols: Vec<Symbol>) -> Self {
        Self {
            action: ControlAction::Subscribe,
            asset_class,
            symbols,
        }
    }

    /// Create an unsubscribe frame.
    #[must_use]
    pub const fn unsubscribe(asset_class: AssetClass, symbols: Vec<Symbol>) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            asset_class,
            symbols,
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// Connection acknowledgment.
    Connected(ConnectedFrame),
    /// Price update for one symbol.
    Price(PriceFrame),
    /// Subscription confirmation.
    Subscribed(AckFrame),
    /// Unsubscription confirmation.
    Unsubscribed(AckFrame),
    /// Feed-reported error.
    Error(ErrorFrame),
}

/// Connection acknowledgment.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "connected", "message": "welcome"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectedFrame {
    /// Optional greeting from the feed.
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
}

/// Subscription acknowledgment.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribed", "assetClass": "crypto", "symbols": ["BTCUSDT"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    /// Asset class of the acknowledged symbols.
    #[serde(default)]
    pub asset_class: Option<AssetClass>,
    /// Acknowledged symbols.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

/// Feed-reported error.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "error", "code": 404, "message": "unknown symbol FOO"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    /// Feed-specific error code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Error description.
    #[serde(default, alias = "msg", alias = "error")]
    pub message: String,
}

/// Price update as sent by the feed.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "type": "price_update",
///   "symbol": "BTCUSDT",
///   "assetClass": "crypto",
///   "price": "64250.12",
///   "volume": "1.25",
///   "timestamp": 1718035200000,
///   "change": "-120.50",
///   "changePercent": "-0.19"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFrame {
    /// Symbol as sent by the feed.
    pub symbol: String,
    /// Human-facing symbol, when the feed supplies one.
    #[serde(default)]
    pub display_symbol: Option<String>,
    /// Asset class; omitted by single-class feeds.
    #[serde(default)]
    pub asset_class: Option<AssetClass>,
    /// Last price.
    pub price: Decimal,
    /// Volume reported with the update.
    #[serde(default)]
    pub volume: Decimal,
    /// Exchange timestamp.
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    /// Absolute change.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percentage change.
    #[serde(default)]
    pub change_percent: Option<Decimal>,
    /// Company name (equities).
    #[serde(default)]
    pub company_name: Option<String>,
    /// Listing exchange (equities).
    #[serde(default)]
    pub exchange: Option<String>,
}

/// Timestamp as it appears on the wire: epoch milliseconds or RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Milliseconds since the Unix epoch.
    EpochMillis(i64),
    /// RFC 3339 timestamp.
    Rfc3339(DateTime<Utc>),
}

impl WireTimestamp {
    /// Convert to a UTC timestamp, if representable.
    #[must_use]
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::EpochMillis(millis) => Utc.timestamp_millis_opt(*millis).single(),
            Self::Rfc3339(timestamp) => Some(*timestamp),
        }
    }
}
