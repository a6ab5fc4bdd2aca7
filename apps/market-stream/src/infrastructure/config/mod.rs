//! Configuration Module
//!
//! Configuration loading for the market stream client.

mod settings;

pub use settings::{
    ChannelSettings, ConfigError, EndpointSettings, GENERIC_URL_VAR, SessionRoute, StreamConfig,
    WATCHLIST_VAR, WebSocketSettings, endpoint_var, parse_watchlist,
};
