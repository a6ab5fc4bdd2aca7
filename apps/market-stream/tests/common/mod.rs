//! In-memory feed shared by the integration tests.
//!
//! `MockConnector` stands in for the WebSocket adapter. Each accepted
//! handshake hands the test a `MockRemote`: the server side of the link,
//! which sees every frame the client sent and can push frames, close the
//! link or drop it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use market_stream::{FeedConnector, FeedLink, LinkMessage, TransportError};

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(300);

// =============================================================================
// Connector
// =============================================================================

/// Scripted connector: refuses or accepts handshakes in order, then accepts.
pub struct MockConnector {
    script: Mutex<VecDeque<bool>>,
    attempts: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

impl MockConnector {
    /// Create a connector and the receiver of its accepted links.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                attempts: AtomicUsize::new(0),
                endpoints: Mutex::new(Vec::new()),
                remotes,
            }),
            rx,
        )
    }

    /// Refuse the next `count` handshakes.
    pub fn refuse_next(&self, count: usize) {
        self.script.lock().extend(std::iter::repeat_n(false, count));
    }

    /// Accept the next handshake (useful after `refuse_next`).
    pub fn accept_next(&self) {
        self.script.lock().push_back(true);
    }

    /// Number of handshakes attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Endpoints dialled, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }
}

#[async_trait]
impl FeedConnector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedLink>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(endpoint.to_string());

        let accept = self.script.lock().pop_front().unwrap_or(true);
        if !accept {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let close_code = Arc::new(Mutex::new(None));

        let remote = MockRemote {
            endpoint: endpoint.to_string(),
            sent: sent_rx,
            inbound: Some(inbound_tx),
            close_code: Arc::clone(&close_code),
        };
        let _ = self.remotes.send(remote);

        Ok(Box::new(MockLink {
            sent: sent_tx,
            inbound: inbound_rx,
            close_code,
        }))
    }
}

// =============================================================================
// Link
// =============================================================================

struct MockLink {
    sent: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<LinkMessage>,
    close_code: Arc<Mutex<Option<u16>>>,
}

#[async_trait]
impl FeedLink for MockLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.send(text).map_err(|_| TransportError::Closed)
    }

    async fn next_message(&mut self) -> Option<Result<LinkMessage, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        *self.close_code.lock() = Some(code);
        self.inbound.close();
        Ok(())
    }
}

// =============================================================================
// Remote
// =============================================================================

/// Server side of one accepted link.
pub struct MockRemote {
    pub endpoint: String,
    sent: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<LinkMessage>>,
    close_code: Arc<Mutex<Option<u16>>>,
}

impl MockRemote {
    /// Next frame the client sent, parsed as JSON.
    pub async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client link dropped");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Frames already sent and not yet read.
    pub fn pending_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Push a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(LinkMessage::Text(text.into()));
        }
    }

    /// Push a JSON value to the client.
    pub fn push_json(&self, value: &Value) {
        self.push(value.to_string());
    }

    /// Close the link from the server side with a close code.
    pub fn close(&self, code: u16) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(LinkMessage::Closed(Some(code)));
        }
    }

    /// Drop the link without a close frame.
    pub fn sever(&mut self) {
        self.inbound = None;
    }

    /// Close code the client sent, if it closed the link.
    pub fn client_close_code(&self) -> Option<u16> {
        *self.close_code.lock()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Wait for the next accepted link.
pub async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<MockRemote>) -> MockRemote {
    timeout(WAIT, remotes.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Symbols of a control frame, sorted.
pub fn frame_symbols(frame: &Value) -> Vec<String> {
    let mut symbols: Vec<String> = frame["symbols"]
        .as_array()
        .expect("frame without symbols")
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect();
    symbols.sort();
    symbols
}

/// A price frame as the feed sends it.
pub fn price_frame(asset_class: &str, symbol: &str, price: &str, timestamp_ms: i64) -> Value {
    serde_json::json!({
        "type": "price",
        "assetClass": asset_class,
        "symbol": symbol,
        "price": price,
        "volume": "1",
        "timestamp": timestamp_ms,
    })
}
