//! Market Data Feed Adapters
//!
//! Everything between the wire and the latest-value store:
//!
//! - **messages / codec**: JSON control and data frames
//! - **reconnect**: exponential backoff with an attempt ceiling
//! - **registry**: desired subscriptions of one session, replayed on open
//! - **session**: the transport session task and its handle
//! - **router**: frame classification, store writes and delivery
//! - **websocket**: `tokio-tungstenite` implementation of the feed ports

pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod session;
pub mod websocket;

pub use codec::{CodecError, JsonCodec};
pub use messages::{
    AckFrame, ConnectedFrame, ControlAction, ControlFrame, ErrorFrame, FeedFrame, PriceFrame,
    WireTimestamp,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use registry::SubscriptionRegistry;
pub use router::{ControlSignal, MessageRouter, Routed};
pub use session::{
    SessionCommand, SessionConfig, SessionError, SessionEvent, SessionHandle, TransportSession,
};
pub use websocket::{WsConnector, WsLink};
