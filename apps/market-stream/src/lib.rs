#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - Real-time Market Data Client
//!
//! Maintains streaming connections to market data feeds, multiplexes
//! per-symbol subscriptions from independent consumers across asset
//! classes (equities, forex, crypto), recovers from connection loss with
//! bounded exponential backoff and keeps the latest known price per symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming types and bookkeeping
//!   - `streaming`: Asset classes, price updates, connection states, errors
//!   - `subscription`: Per-consumer ledger and the desired upstream set
//!   - `snapshot`: Latest-value store
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed connector/link and event sink interfaces
//!   - `services`: `MarketStream` facade and `ConsumerBinding`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Wire format, transport sessions, routing, WebSocket adapter
//!   - `broadcast`: Update, state and error fan-out
//!   - `config`: Configuration from the environment
//!   - `metrics` / `telemetry`: Prometheus metrics and tracing
//!
//! # Data Flow
//!
//! ```text
//!                  ┌───────────┐    ┌──────────┐    ┌─────────────┐
//! Feed WS (equity)─┤ Transport ├───►│  Router  ├───►│ Latest-Value│
//!                  │  Session  │    └────┬─────┘    │    Store    │
//!                  └─────▲─────┘         │          └─────────────┘
//!                        │               ▼
//!        subscribe diffs │          ┌──────────┐
//!                  ┌─────┴─────┐    │Update Hub├──► Consumer A callbacks
//!                  │  Ledger   │◄───┤          ├──► Consumer B stream
//!                  └───────────┘    └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::snapshot::LatestValueStore;
pub use domain::streaming::{AssetClass, ConnectionState, PriceUpdate, StreamError, Symbol};
pub use domain::subscription::{
    ConsumerId, DesiredSubscriptionSet, SubscriptionChanges, SubscriptionManager,
    SubscriptionRequest, SubscriptionStats, TotalSubscriptionStats,
};

// Ports
pub use application::ports::{
    FeedConnector, FeedLink, LinkMessage, MarketEventSink, NORMAL_CLOSURE, TransportError,
};

// Facade
pub use application::services::{BindingError, ConsumerBinding, MarketStream, UpdateStream};

// Infrastructure config
pub use infrastructure::config::{
    ChannelSettings, ConfigError, EndpointSettings, StreamConfig, WebSocketSettings,
};

// Callback handles
pub use infrastructure::broadcast::CallbackHandle;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
