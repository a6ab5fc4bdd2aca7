//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data streaming
//! with no transport dependencies. Everything here is plain data plus the
//! bookkeeping that decides what the feed should be subscribed to.

/// Market data types (asset classes, price updates, connection states).
pub mod streaming;

/// Consumer subscription tracking and the desired upstream set.
pub mod subscription;

/// Latest-value store keyed by symbol.
pub mod snapshot;
