//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the consumer-facing services and the port
//! interfaces that define how the feed plumbing talks to the outside world.

/// Port interfaces for external systems (feed transport, event delivery).
pub mod ports;

/// Application services: the market stream facade and consumer bindings.
pub mod services;
