//! Market Data Streaming Types
//!
//! Core domain types for streamed prices: asset classes, normalized price
//! updates, connection lifecycle states and the soft errors surfaced to
//! consumers. These types are codec-agnostic and represent the canonical
//! internal representation of market data.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol string (equity ticker, FX pair or crypto pair).
pub type Symbol = String;

/// Quote currencies recognised when splitting crypto pairs for display.
/// Longer suffixes first so `USDT` wins over `USD`.
const CRYPTO_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH"];

/// Normalize a symbol as received from a consumer or the wire.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> Symbol {
    symbol.trim().to_ascii_uppercase()
}

// =============================================================================
// Asset Class
// =============================================================================

/// Category of tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Listed equities (and indices).
    #[serde(alias = "stock", alias = "stocks", alias = "equities")]
    Equity,
    /// Foreign exchange pairs.
    #[serde(alias = "fx")]
    Forex,
    /// Cryptocurrency pairs.
    Crypto,
}

impl AssetClass {
    /// All asset classes, in routing order.
    pub const ALL: [Self; 3] = [Self::Equity, Self::Forex, Self::Crypto];

    /// Wire / label name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Forex => "forex",
            Self::Crypto => "crypto",
        }
    }

    /// Parse an asset class name, accepting the same aliases as the wire format.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equity" | "equities" | "stock" | "stocks" => Some(Self::Equity),
            "forex" | "fx" => Some(Self::Forex),
            "crypto" => Some(Self::Crypto),
            _ => None,
        }
    }

    /// Derive the human-facing form of a symbol for this asset class.
    ///
    /// `EURUSD` becomes `EUR/USD`, `BTCUSDT` becomes `BTC/USDT`; equities and
    /// anything already containing a separator are returned unchanged.
    #[must_use]
    pub fn display_symbol(self, symbol: &str) -> String {
        if symbol.contains('/') || symbol.contains('-') {
            return symbol.to_string();
        }

        match self {
            Self::Equity => symbol.to_string(),
            Self::Forex if symbol.len() == 6 && symbol.is_ascii() => {
                format!("{}/{}", &symbol[..3], &symbol[3..])
            }
            Self::Forex => symbol.to_string(),
            Self::Crypto => CRYPTO_QUOTES
                .iter()
                .find(|quote| symbol.len() > quote.len() && symbol.ends_with(*quote))
                .map_or_else(
                    || symbol.to_string(),
                    |quote| {
                        let base = &symbol[..symbol.len() - quote.len()];
                        format!("{base}/{quote}")
                    },
                ),
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Price Update
// =============================================================================

/// Normalized latest-price record for one symbol.
///
/// Immutable once received. A newer update for the same symbol replaces the
/// whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Normalized symbol (store key).
    pub symbol: Symbol,
    /// Symbol as shown to users (`BTC/USDT`).
    pub display_symbol: String,
    /// Asset class the update belongs to.
    pub asset_class: AssetClass,
    /// Last price.
    pub price: Decimal,
    /// Traded volume reported with the update.
    pub volume: Decimal,
    /// Exchange timestamp of the update.
    pub timestamp: DateTime<Utc>,
    /// Absolute change versus the reference price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,
    /// Percentage change versus the reference price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,
    /// Company name (equities).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Listing exchange (equities).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connection open; frames flowing.
    Connected,
    /// Connection lost; waiting for the backoff delay to elapse.
    Reconnecting,
    /// Retry budget exhausted; only a manual `connect()` leaves this state.
    Failed,
}

impl ConnectionState {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Check if frames can currently be sent.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if `connect()` would be a no-op in this state.
    #[must_use]
    pub const fn is_connecting_or_connected(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Soft Errors
// =============================================================================

/// Errors surfaced to consumers. None of these close the consumer's binding;
/// the last known data stays readable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The connection failed or dropped; recovery is automatic.
    #[error("transport error on {endpoint}: {message}")]
    Transport {
        /// Endpoint of the affected session.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    /// The feed reported an error (e.g. invalid symbol).
    #[error("feed error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Application {
        /// Feed-specific error code, when provided.
        code: Option<i64>,
        /// Error message from the feed.
        message: String,
    },

    /// Automatic reconnection gave up; a manual `connect()` is required.
    #[error("maximum reconnection attempts reached ({attempts}) for {endpoint}")]
    ReconnectExhausted {
        /// Endpoint of the affected session.
        endpoint: String,
        /// Number of reconnection attempts made.
        attempts: u32,
    },
}

impl StreamError {
    /// Check if this error requires caller action to recover.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_symbol("  btcusdt "), "BTCUSDT");
        assert_eq!(normalize_symbol("AAPL"), "AAPL");
    }

    #[test]
    fn asset_class_parse_accepts_aliases() {
        assert_eq!(AssetClass::parse("stocks"), Some(AssetClass::Equity));
        assert_eq!(AssetClass::parse("EQUITY"), Some(AssetClass::Equity));
        assert_eq!(AssetClass::parse("fx"), Some(AssetClass::Forex));
        assert_eq!(AssetClass::parse("crypto"), Some(AssetClass::Crypto));
        assert_eq!(AssetClass::parse("bonds"), None);
    }

    #[test]
    fn asset_class_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&AssetClass::Forex).unwrap();
        assert_eq!(json, r#""forex""#);

        let parsed: AssetClass = serde_json::from_str(r#""stocks""#).unwrap();
        assert_eq!(parsed, AssetClass::Equity);
    }

    #[test]
    fn display_symbol_forex_pair() {
        assert_eq!(AssetClass::Forex.display_symbol("EURUSD"), "EUR/USD");
        assert_eq!(AssetClass::Forex.display_symbol("EUR/USD"), "EUR/USD");
    }

    #[test]
    fn display_symbol_crypto_pair() {
        assert_eq!(AssetClass::Crypto.display_symbol("BTCUSDT"), "BTC/USDT");
        assert_eq!(AssetClass::Crypto.display_symbol("ETHUSD"), "ETH/USD");
        assert_eq!(AssetClass::Crypto.display_symbol("USDT"), "USDT");
    }

    #[test]
    fn display_symbol_equity_unchanged() {
        assert_eq!(AssetClass::Equity.display_symbol("AAPL"), "AAPL");
    }

    #[test]
    fn connection_state_helpers() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(ConnectionState::Connecting.is_connecting_or_connected());
        assert!(!ConnectionState::Failed.is_connecting_or_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn stream_error_messages() {
        let err = StreamError::ReconnectExhausted {
            endpoint: "wss://feed".to_string(),
            attempts: 5,
        };
        assert!(err.is_terminal());
        assert_eq!(
            err.to_string(),
            "maximum reconnection attempts reached (5) for wss://feed"
        );

        let err = StreamError::Application {
            code: Some(404),
            message: "invalid symbol".to_string(),
        };
        assert!(!err.is_terminal());
        assert_eq!(err.to_string(), "feed error 404: invalid symbol");
    }
}
