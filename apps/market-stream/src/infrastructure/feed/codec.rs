//! Feed Codec
//!
//! JSON encoding and decoding for the market data feed.
//!
//! A text message carries either one frame object or an array of frame
//! objects. Each frame is tagged by its `type` field. A bad element in an
//! array does not poison its neighbours: decoding yields one result per
//! element.

use super::messages::{
    AckFrame, ConnectedFrame, ControlFrame, ErrorFrame, FeedFrame, PriceFrame,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for feed frames.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text message into frames.
    ///
    /// Returns one entry per frame in the message. A message that is not JSON
    /// at all yields a single error.
    #[must_use]
    pub fn decode(&self, text: &str) -> Vec<Result<FeedFrame, CodecError>> {
        let trimmed = text.trim();

        if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
            let preview: String = trimmed.chars().take(50).collect();
            return vec![Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))];
        }

        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Array(values)) => {
                values.into_iter().map(|value| self.decode_value(value)).collect()
            }
            Ok(value) => vec![self.decode_value(value)],
            Err(e) => vec![Err(e.into())],
        }
    }

    /// Decode one frame object.
    fn decode_value(&self, value: serde_json::Value) -> Result<FeedFrame, CodecError> {
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected frame object, got: {value}"
            )));
        }

        let msg_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| CodecError::InvalidFormat("missing \"type\" field".to_string()))?;

        let frame = match msg_type.as_str() {
            "connected" | "connection_ack" => {
                let m: ConnectedFrame = serde_json::from_value(value)?;
                FeedFrame::Connected(m)
            }
            "price_update" | "price" | "update" => {
                let m: PriceFrame = serde_json::from_value(value)?;
                FeedFrame::Price(m)
            }
            "subscribed" | "subscription_ack" => {
                let m: AckFrame = serde_json::from_value(value)?;
                FeedFrame::Subscribed(m)
            }
            "unsubscribed" => {
                let m: AckFrame = serde_json::from_value(value)?;
                FeedFrame::Unsubscribed(m)
            }
            "error" => {
                let m: ErrorFrame = serde_json::from_value(value)?;
                FeedFrame::Error(m)
            }
            _ => return Err(CodecError::UnknownMessageType(msg_type)),
        };

        Ok(frame)
    }

    /// Encode a control frame to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, frame: &ControlFrame) -> Result<String, CodecError> {
        Ok(frame.to_json()?)
    }
}
