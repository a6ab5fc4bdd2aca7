//! Prometheus Metrics Module
//!
//! Records client-side feed metrics through the `metrics` facade.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by asset class and type, plus drops
//! - **Connections**: Per-endpoint connection state and reconnect attempts
//! - **Subscriptions**: Desired upstream symbol counts and control frames sent
//! - **Errors**: Soft errors surfaced to consumers
//!
//! # Integration
//!
//! Nothing is exported over the network. The embedding application owns the
//! [`PrometheusHandle`] returned by [`init_metrics`] and renders it where it
//! sees fit. Recording is a no-op until a recorder is installed.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{AssetClass, ConnectionState, StreamError};
use crate::infrastructure::feed::ControlAction;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was installed outside this function.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "market_stream_frames_received_total",
        "Total frames received from feed endpoints"
    );
    describe_counter!(
        "market_stream_frames_dropped_total",
        "Total inbound frames discarded as malformed or unroutable"
    );

    // Connection metrics
    describe_gauge!(
        "market_stream_connection_state",
        "Connection state per endpoint (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total automatic reconnection attempts scheduled"
    );

    // Subscription metrics
    describe_gauge!(
        "market_stream_desired_subscriptions",
        "Symbols the session wants streamed from its endpoint"
    );
    describe_counter!(
        "market_stream_control_frames_total",
        "Total subscribe/unsubscribe frames sent upstream"
    );

    // Error counters
    describe_counter!(
        "market_stream_errors_total",
        "Total soft errors surfaced to consumers by kind"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Price update.
    Price,
    /// Connected/subscribed/unsubscribed acknowledgement.
    Control,
    /// Error frame from the feed.
    Error,
}

impl FrameType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Control => "control",
            Self::Error => "error",
        }
    }
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
        ConnectionState::Failed => 4.0,
    }
}

const fn action_label(action: ControlAction) -> &'static str {
    match action {
        ControlAction::Subscribe => "subscribe",
        ControlAction::Unsubscribe => "unsubscribe",
    }
}

const fn error_kind(error: &StreamError) -> &'static str {
    match error {
        StreamError::Transport { .. } => "transport",
        StreamError::Application { .. } => "application",
        StreamError::ReconnectExhausted { .. } => "reconnect_exhausted",
    }
}

/// Record a frame received from a feed.
pub fn record_frame_received(asset_class: Option<AssetClass>, frame_type: FrameType) {
    counter!(
        "market_stream_frames_received_total",
        "asset_class" => asset_class.map_or("unknown", AssetClass::as_str),
        "frame_type" => frame_type.as_str()
    )
    .increment(1);
}

/// Record a frame that could not be decoded or routed.
pub fn record_frame_dropped() {
    counter!("market_stream_frames_dropped_total").increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect_attempt(endpoint: &str) {
    counter!(
        "market_stream_reconnects_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Update the connection state gauge for an endpoint.
pub fn record_connection_state(endpoint: &str, state: ConnectionState) {
    gauge!(
        "market_stream_connection_state",
        "endpoint" => endpoint.to_string()
    )
    .set(state_value(state));
}

/// Update the desired subscription count for an endpoint.
#[allow(clippy::cast_precision_loss)]
pub fn record_desired_subscriptions(endpoint: &str, count: usize) {
    gauge!(
        "market_stream_desired_subscriptions",
        "endpoint" => endpoint.to_string()
    )
    .set(count as f64);
}

/// Record a control frame sent upstream.
pub fn record_control_frame(action: ControlAction) {
    counter!(
        "market_stream_control_frames_total",
        "action" => action_label(action)
    )
    .increment(1);
}

/// Record a soft error delivered to consumers.
pub fn record_soft_error(error: &StreamError) {
    counter!(
        "market_stream_errors_total",
        "kind" => error_kind(error)
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_as_str() {
        assert_eq!(FrameType::Price.as_str(), "price");
        assert_eq!(FrameType::Control.as_str(), "control");
        assert_eq!(FrameType::Error.as_str(), "error");
    }

    #[test]
    fn state_values_are_distinct() {
        let values: Vec<f64> = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ]
        .into_iter()
        .map(state_value)
        .collect();

        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn error_kind_labels() {
        let transport = StreamError::Transport {
            endpoint: "wss://feed".to_string(),
            message: "reset".to_string(),
        };
        let application = StreamError::Application {
            code: Some(404),
            message: "unknown symbol".to_string(),
        };
        let exhausted = StreamError::ReconnectExhausted {
            endpoint: "wss://feed".to_string(),
            attempts: 5,
        };

        assert_eq!(error_kind(&transport), "transport");
        assert_eq!(error_kind(&application), "application");
        assert_eq!(error_kind(&exhausted), "reconnect_exhausted");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(None, FrameType::Control);
        record_frame_dropped();
        record_control_frame(ControlAction::Subscribe);
        record_desired_subscriptions("wss://feed", 3);
    }
}
