//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`FeedConnector`]: opens a streaming link to a feed endpoint
//! - [`FeedLink`]: one open bidirectional link (text frames, ping, close)
//!
//! ## Driver Ports (Inbound)
//!
//! - [`MarketEventSink`]: receives routed updates, connection states and
//!   soft errors for delivery to consumers

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::streaming::{AssetClass, ConnectionState, PriceUpdate, StreamError};

/// Close code sent on a deliberate disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Handshake with the endpoint failed.
    #[error("connection to {endpoint} failed: {reason}")]
    Connect {
        /// Endpoint that refused the connection.
        endpoint: String,
        /// Adapter-specific failure description.
        reason: String,
    },

    /// Reading or writing on an open link failed.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The link is already closed.
    #[error("link closed")]
    Closed,
}

/// A message read from an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMessage {
    /// One text frame.
    Text(String),
    /// Liveness traffic (ping/pong) that carries no data.
    Heartbeat,
    /// The remote closed the link, with its close code when given.
    Closed(Option<u16>),
}

/// One open streaming connection.
#[async_trait]
pub trait FeedLink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next inbound message.
    ///
    /// `None` means the underlying stream ended without a close frame.
    async fn next_message(&mut self) -> Option<Result<LinkMessage, TransportError>>;

    /// Send a liveness ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the link with the given close code.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// Opens links to feed endpoints.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Perform the handshake with `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedLink>, TransportError>;
}

// =============================================================================
// Delivery
// =============================================================================

/// Receives everything the feed routers produce.
pub trait MarketEventSink: Send + Sync {
    /// Deliver a price update already written to the latest-value store.
    fn publish_update(&self, update: Arc<PriceUpdate>);

    /// Report the state of the session serving `asset_classes`.
    fn publish_state(&self, asset_classes: &[AssetClass], state: ConnectionState);

    /// Report a soft error.
    fn publish_error(&self, error: StreamError);
}
