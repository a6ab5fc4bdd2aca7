//! Stream Configuration Settings
//!
//! Configuration types for the market stream client, loaded from
//! environment variables.
//!
//! Endpoints resolve per asset class: a class-specific URL
//! (`MARKET_STREAM_CRYPTO_URL`, ...) always wins over the generic
//! multi-asset `MARKET_STREAM_URL`. Asset classes that resolve to the same
//! URL share one session.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::streaming::{AssetClass, normalize_symbol};
use crate::domain::subscription::SubscriptionRequest;

/// Environment variable holding the generic multi-asset endpoint.
pub const GENERIC_URL_VAR: &str = "MARKET_STREAM_URL";

/// Environment variable holding the monitor's watchlist.
pub const WATCHLIST_VAR: &str = "MARKET_STREAM_WATCH";

/// Environment variable holding the class-specific endpoint.
#[must_use]
pub const fn endpoint_var(asset_class: AssetClass) -> &'static str {
    match asset_class {
        AssetClass::Equity => "MARKET_STREAM_EQUITY_URL",
        AssetClass::Forex => "MARKET_STREAM_FOREX_URL",
        AssetClass::Crypto => "MARKET_STREAM_CRYPTO_URL",
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Feed endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Generic multi-asset endpoint.
    pub generic: Option<String>,
    /// Class-specific endpoints.
    pub by_class: BTreeMap<AssetClass, String>,
}

impl EndpointSettings {
    /// Endpoints with only a generic URL.
    #[must_use]
    pub fn generic(url: impl Into<String>) -> Self {
        Self {
            generic: Some(url.into()),
            by_class: BTreeMap::new(),
        }
    }

    /// Add a class-specific URL.
    #[must_use]
    pub fn with_class(mut self, asset_class: AssetClass, url: impl Into<String>) -> Self {
        self.by_class.insert(asset_class, url.into());
        self
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval (`None` = disabled).
    pub heartbeat_interval: Option<Duration>,
    /// Silence after which the connection is considered dead.
    pub idle_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to reconnection delays (0 = none).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Some(Duration::from_secs(20)),
            idle_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
        }
    }
}

/// Channel capacity settings.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    /// Capacity of each session's event channel.
    pub event_capacity: usize,
    /// Capacity of the update broadcast channel.
    pub update_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            update_capacity: 4096,
        }
    }
}

/// One transport session to spawn: an endpoint and the classes it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoute {
    /// Endpoint URL.
    pub endpoint: String,
    /// Asset classes served, in routing order.
    pub asset_classes: Vec<AssetClass>,
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed endpoints.
    pub endpoints: EndpointSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Channel capacity settings.
    pub channels: ChannelSettings,
    /// Connect every session as soon as it is created.
    pub auto_connect: bool,
}

impl StreamConfig {
    /// Create a configuration with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is given or an endpoint is not a
    /// WebSocket URL.
    pub fn new(endpoints: EndpointSettings) -> Result<Self, ConfigError> {
        let config = Self {
            endpoints,
            websocket: WebSocketSettings::default(),
            channels: ChannelSettings::default(),
            auto_connect: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured, an endpoint is not a
    /// WebSocket URL, or the backoff multiplier or jitter is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured, an endpoint is not a
    /// WebSocket URL, or the backoff multiplier or jitter is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let mut endpoints = EndpointSettings {
            generic: env.non_empty(GENERIC_URL_VAR),
            by_class: BTreeMap::new(),
        };
        for asset_class in AssetClass::ALL {
            if let Some(url) = env.non_empty(endpoint_var(asset_class)) {
                endpoints.by_class.insert(asset_class, url);
            }
        }

        let defaults = WebSocketSettings::default();
        let heartbeat_secs = env.parse(
            "MARKET_STREAM_HEARTBEAT_INTERVAL_SECS",
            defaults.heartbeat_interval.map_or(0, |d| d.as_secs()),
        );

        let websocket = WebSocketSettings {
            heartbeat_interval: (heartbeat_secs > 0).then(|| Duration::from_secs(heartbeat_secs)),
            idle_timeout: Duration::from_secs(
                env.parse("MARKET_STREAM_IDLE_TIMEOUT_SECS", defaults.idle_timeout.as_secs()),
            ),
            reconnect_delay_initial: Duration::from_millis(env.parse(
                "MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS",
                u64::try_from(defaults.reconnect_delay_initial.as_millis()).unwrap_or(u64::MAX),
            )),
            reconnect_delay_max: Duration::from_secs(env.parse(
                "MARKET_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max.as_secs(),
            )),
            reconnect_delay_multiplier: env.parse(
                "MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse("MARKET_STREAM_RECONNECT_JITTER", defaults.reconnect_jitter),
            max_reconnect_attempts: env.parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let channel_defaults = ChannelSettings::default();
        let channels = ChannelSettings {
            event_capacity: env.parse("MARKET_STREAM_EVENT_CAPACITY", channel_defaults.event_capacity),
            update_capacity: env.parse(
                "MARKET_STREAM_UPDATE_CAPACITY",
                channel_defaults.update_capacity,
            ),
        };

        let config = Self {
            endpoints,
            websocket,
            channels,
            auto_connect: env.flag("MARKET_STREAM_AUTO_CONNECT", true),
        };
        config.validate()?;
        Ok(config)
    }

    /// Endpoint serving an asset class, if any.
    ///
    /// A class-specific endpoint takes precedence over the generic one.
    #[must_use]
    pub fn endpoint_for(&self, asset_class: AssetClass) -> Option<&str> {
        self.endpoints
            .by_class
            .get(&asset_class)
            .or(self.endpoints.generic.as_ref())
            .map(String::as_str)
    }

    /// Sessions to spawn: one per distinct endpoint.
    #[must_use]
    pub fn session_routes(&self) -> Vec<SessionRoute> {
        let mut routes: Vec<SessionRoute> = Vec::new();

        for asset_class in AssetClass::ALL {
            let Some(endpoint) = self.endpoint_for(asset_class) else {
                continue;
            };

            match routes.iter_mut().find(|route| route.endpoint == endpoint) {
                Some(route) => route.asset_classes.push(asset_class),
                None => routes.push(SessionRoute {
                    endpoint: endpoint.to_string(),
                    asset_classes: vec![asset_class],
                }),
            }
        }

        routes
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.generic.is_none() && self.endpoints.by_class.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        let all = self
            .endpoints
            .generic
            .iter()
            .chain(self.endpoints.by_class.values());
        for url in all {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::InvalidEndpoint(url.clone()));
            }
        }

        let multiplier = self.websocket.reconnect_delay_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoff(format!(
                "reconnect delay multiplier must be a finite number >= 1, got {multiplier}"
            )));
        }

        let jitter = self.websocket.reconnect_jitter;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::InvalidBackoff(format!(
                "reconnect jitter must be within 0..=1, got {jitter}"
            )));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No endpoint configured at all.
    #[error("no feed endpoint configured: set MARKET_STREAM_URL or a class-specific URL")]
    MissingEndpoint,
    /// Endpoint is not a WebSocket URL.
    #[error("invalid feed endpoint (expected ws:// or wss://): {0}")]
    InvalidEndpoint(String),
    /// Backoff multiplier or jitter out of range.
    #[error("invalid backoff settings: {0}")]
    InvalidBackoff(String),
    /// Watchlist entry is not `class:SYM1,SYM2`.
    #[error("invalid watchlist entry: {0}")]
    InvalidWatchlist(String),
}

// =============================================================================
// Watchlist
// =============================================================================

/// Parse a watchlist such as `crypto:BTCUSDT,ETHUSDT;equity:AAPL`.
///
/// Entries are separated by `;`, symbols by `,`. Blank entries and blank
/// symbols are skipped; symbols are normalized.
///
/// # Errors
///
/// Returns an error if an entry has no `:` or names an unknown asset class.
pub fn parse_watchlist(watchlist: &str) -> Result<Vec<SubscriptionRequest>, ConfigError> {
    let mut requests = Vec::new();

    for entry in watchlist.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (class, symbols) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidWatchlist(entry.to_string()))?;
        let asset_class = AssetClass::parse(class)
            .ok_or_else(|| ConfigError::InvalidWatchlist(entry.to_string()))?;

        requests.extend(
            symbols
                .split(',')
                .map(normalize_symbol)
                .filter(|symbol| !symbol.is_empty())
                .map(|symbol| SubscriptionRequest { asset_class, symbol }),
        );
    }

    Ok(requests)
}

// =============================================================================
// Environment Parsing
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.non_empty(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.non_empty(key)
            .map_or(default, |v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }
}
