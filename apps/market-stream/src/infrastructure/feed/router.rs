//! Message Router
//!
//! Consumes the events of one transport session. Inbound text frames are
//! decoded and classified into price updates or control signals; updates
//! are written to the latest-value store and handed to the event sink,
//! control errors become soft errors, lifecycle events become connection
//! states.
//!
//! Nothing that arrives on the wire can stop the router. Undecodable frames
//! are logged, counted and dropped.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::application::ports::MarketEventSink;
use crate::domain::snapshot::LatestValueStore;
use crate::domain::streaming::{AssetClass, PriceUpdate, StreamError, Symbol, normalize_symbol};
use crate::infrastructure::metrics::{self, FrameType};

use super::codec::{CodecError, JsonCodec};
use super::messages::{FeedFrame, PriceFrame};
use super::session::SessionEvent;

// =============================================================================
// Routing Results
// =============================================================================

/// Non-data outcome of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// The feed acknowledged the connection.
    Connected,
    /// The feed confirmed a subscription.
    Subscribed {
        /// Asset class, when the feed names it.
        asset_class: Option<AssetClass>,
        /// Confirmed symbols.
        symbols: Vec<Symbol>,
    },
    /// The feed confirmed an unsubscription.
    Unsubscribed {
        /// Asset class, when the feed names it.
        asset_class: Option<AssetClass>,
        /// Confirmed symbols.
        symbols: Vec<Symbol>,
    },
    /// The feed reported an error; the connection stays open.
    Error(StreamError),
}

/// Outcome of routing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Normalized price update.
    Update(Arc<PriceUpdate>),
    /// Control signal.
    Control(ControlSignal),
    /// Frame dropped as a protocol error.
    Dropped(String),
}

// =============================================================================
// Router
// =============================================================================

/// Routes the frames of one session.
pub struct MessageRouter {
    endpoint: String,
    asset_classes: Vec<AssetClass>,
    codec: JsonCodec,
    store: Arc<LatestValueStore>,
    sink: Arc<dyn MarketEventSink>,
}

impl MessageRouter {
    /// Create a router for the session serving `asset_classes` at `endpoint`.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        asset_classes: Vec<AssetClass>,
        store: Arc<LatestValueStore>,
        sink: Arc<dyn MarketEventSink>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            asset_classes,
            codec: JsonCodec::new(),
            store,
            sink,
        }
    }

    /// Process session events until the session stops.
    pub async fn run(self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }

        tracing::debug!(endpoint = %self.endpoint, "Message router stopped");
    }

    /// Handle one session event.
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                self.sink.publish_state(&self.asset_classes, state);
            }
            SessionEvent::Opened => {
                tracing::debug!(endpoint = %self.endpoint, "Session opened");
            }
            SessionEvent::Message(text) => {
                for routed in self.route_text(&text) {
                    self.apply(routed);
                }
            }
            SessionEvent::Closed { code } => {
                let message = code.map_or_else(
                    || "connection closed".to_string(),
                    |code| format!("connection closed (code {code})"),
                );
                self.soft_error(StreamError::Transport {
                    endpoint: self.endpoint.clone(),
                    message,
                });
            }
            SessionEvent::TransportError(message) => {
                self.soft_error(StreamError::Transport {
                    endpoint: self.endpoint.clone(),
                    message,
                });
            }
            SessionEvent::RetryScheduled { attempt, delay } => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retry scheduled"
                );
            }
            SessionEvent::Exhausted { attempts } => {
                self.soft_error(StreamError::ReconnectExhausted {
                    endpoint: self.endpoint.clone(),
                    attempts,
                });
            }
        }
    }

    /// Decode and classify a text message without side effects.
    #[must_use]
    pub fn route_text(&self, text: &str) -> Vec<Routed> {
        self.codec
            .decode(text)
            .into_iter()
            .map(|frame| match frame {
                Ok(frame) => self.classify(frame),
                Err(e) => Self::dropped(&e),
            })
            .collect()
    }

    /// Write updates to the store and publish everything to the sink.
    fn apply(&self, routed: Routed) {
        match routed {
            Routed::Update(update) => {
                metrics::record_frame_received(Some(update.asset_class), FrameType::Price);
                self.store.put(Arc::clone(&update));
                self.sink.publish_update(update);
            }
            Routed::Control(ControlSignal::Connected) => {
                metrics::record_frame_received(None, FrameType::Control);
                tracing::debug!(endpoint = %self.endpoint, "Feed acknowledged connection");
            }
            Routed::Control(ControlSignal::Subscribed {
                asset_class,
                symbols,
            }) => {
                metrics::record_frame_received(asset_class, FrameType::Control);
                tracing::debug!(endpoint = %self.endpoint, ?asset_class, ?symbols, "Subscription confirmed");
            }
            Routed::Control(ControlSignal::Unsubscribed {
                asset_class,
                symbols,
            }) => {
                metrics::record_frame_received(asset_class, FrameType::Control);
                tracing::debug!(endpoint = %self.endpoint, ?asset_class, ?symbols, "Unsubscription confirmed");
            }
            Routed::Control(ControlSignal::Error(error)) => {
                metrics::record_frame_received(None, FrameType::Error);
                self.soft_error(error);
            }
            Routed::Dropped(reason) => {
                metrics::record_frame_dropped();
                tracing::warn!(endpoint = %self.endpoint, reason = %reason, "Dropping unparseable frame");
            }
        }
    }

    fn classify(&self, frame: FeedFrame) -> Routed {
        match frame {
            FeedFrame::Connected(_) => Routed::Control(ControlSignal::Connected),
            FeedFrame::Subscribed(ack) => Routed::Control(ControlSignal::Subscribed {
                asset_class: ack.asset_class,
                symbols: ack.symbols.iter().map(|s| normalize_symbol(s)).collect(),
            }),
            FeedFrame::Unsubscribed(ack) => Routed::Control(ControlSignal::Unsubscribed {
                asset_class: ack.asset_class,
                symbols: ack.symbols.iter().map(|s| normalize_symbol(s)).collect(),
            }),
            FeedFrame::Error(error) => Routed::Control(ControlSignal::Error(StreamError::Application {
                code: error.code,
                message: error.message,
            })),
            FeedFrame::Price(price) => self.normalize(price),
        }
    }

    /// Turn a wire price frame into a normalized update.
    fn normalize(&self, frame: PriceFrame) -> Routed {
        let symbol = normalize_symbol(&frame.symbol);
        if symbol.is_empty() {
            return Routed::Dropped("price frame without symbol".to_string());
        }

        let asset_class = match (frame.asset_class, self.asset_classes.as_slice()) {
            (Some(asset_class), _) => asset_class,
            (None, [only]) => *only,
            (None, _) => {
                return Routed::Dropped(format!("price frame for {symbol} without assetClass"));
            }
        };

        let timestamp = frame
            .timestamp
            .as_ref()
            .and_then(super::messages::WireTimestamp::to_utc)
            .unwrap_or_else(Utc::now);

        let display_symbol = frame
            .display_symbol
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| asset_class.display_symbol(&symbol));

        Routed::Update(Arc::new(PriceUpdate {
            symbol,
            display_symbol,
            asset_class,
            price: frame.price,
            volume: frame.volume,
            timestamp,
            change: frame.change,
            change_percent: frame.change_percent,
            company_name: frame.company_name,
            exchange: frame.exchange,
        }))
    }

    fn dropped(error: &CodecError) -> Routed {
        Routed::Dropped(error.to_string())
    }

    fn soft_error(&self, error: StreamError) {
        tracing::warn!(endpoint = %self.endpoint, error = %error, "Market stream error");
        metrics::record_soft_error(&error);
        self.sink.publish_error(error);
    }
}
