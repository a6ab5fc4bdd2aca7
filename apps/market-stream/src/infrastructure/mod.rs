//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Market data feed adapters (wire format, sessions, routing, WebSocket).
pub mod feed;

/// Broadcast channel adapters for update, state and error delivery.
pub mod broadcast;

/// Configuration from the environment.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
