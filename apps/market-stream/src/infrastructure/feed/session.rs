//! Transport Session
//!
//! Owns exactly one streaming connection to a feed endpoint and drives its
//! lifecycle:
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─handshake ok─► Connected
//!      ▲                        ▲                          │
//!      │                        └─delay elapses─ Reconnecting ◄─unexpected close
//!      │                                              │
//!      └────────── disconnect() (from any state)      └─attempts exhausted─► Failed
//! ```
//!
//! The session runs as a tokio task. [`SessionHandle`] is the cloneable,
//! fire-and-forget front; lifecycle and inbound messages go out as
//! [`SessionEvent`]s on a bounded channel, and the current state is also
//! published on a `watch` channel.
//!
//! The session holds the subscription registry. Subscribe/unsubscribe
//! requests are applied to the registry immediately and put on the wire
//! only while connected; every successful open replays the whole desired
//! set, one frame per asset class.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedConnector, FeedLink, LinkMessage, NORMAL_CLOSURE};
use crate::domain::streaming::{AssetClass, ConnectionState, Symbol};
use crate::infrastructure::config::{ChannelSettings, WebSocketSettings};
use crate::infrastructure::metrics;

use super::codec::JsonCodec;
use super::messages::ControlFrame;
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::registry::SubscriptionRegistry;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by [`SessionHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session task has stopped.
    #[error("transport session for {0} has stopped")]
    Stopped(String),
}

// =============================================================================
// Commands and Events
// =============================================================================

/// Requests accepted by the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the connection (no-op when connecting or connected).
    Connect,
    /// Close the connection and stop reconnecting.
    Disconnect,
    /// Add symbols to the desired set.
    Subscribe {
        /// Asset class of the symbols.
        asset_class: AssetClass,
        /// Symbols to add.
        symbols: Vec<Symbol>,
    },
    /// Remove symbols from the desired set.
    Unsubscribe {
        /// Asset class of the symbols.
        asset_class: AssetClass,
        /// Symbols to remove.
        symbols: Vec<Symbol>,
    },
}

/// Events emitted by the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Lifecycle state changed.
    StateChanged(ConnectionState),
    /// Handshake succeeded; the desired set is being replayed.
    Opened,
    /// Raw inbound text frame.
    Message(String),
    /// The connection closed without being asked to.
    Closed {
        /// Close code sent by the remote, if any.
        code: Option<u16>,
    },
    /// Handshake or I/O failure.
    TransportError(String),
    /// A reconnection attempt is scheduled.
    RetryScheduled {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Automatic reconnection gave up.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one transport session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Feed endpoint URL.
    pub endpoint: String,
    /// Asset classes served by this endpoint.
    pub asset_classes: Vec<AssetClass>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Interval between pings; `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// Silence after which the connection is considered dropped.
    pub idle_timeout: Duration,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, asset_classes: Vec<AssetClass>) -> Self {
        Self {
            endpoint: endpoint.into(),
            asset_classes,
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Some(Duration::from_secs(20)),
            idle_timeout: Duration::from_secs(60),
            event_capacity: 1024,
        }
    }

    /// Create configuration from settings.
    #[must_use]
    pub fn from_settings(
        endpoint: impl Into<String>,
        asset_classes: Vec<AssetClass>,
        websocket: &WebSocketSettings,
        channels: &ChannelSettings,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            asset_classes,
            reconnect: ReconnectConfig::from_websocket_settings(websocket),
            heartbeat_interval: websocket.heartbeat_interval,
            idle_timeout: websocket.idle_timeout,
            event_capacity: channels.event_capacity,
        }
    }

    /// Override the reconnection configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Override the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// Cloneable front of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    endpoint: Arc<str>,
    asset_classes: Arc<[AssetClass]>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Endpoint this session connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Asset classes served by this session.
    #[must_use]
    pub fn asset_classes(&self) -> &[AssetClass] {
        &self.asset_classes
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Request a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session task has stopped.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect)
    }

    /// Request a normal closure; stops reconnection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session task has stopped.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect)
    }

    /// Add symbols to the desired set.
    ///
    /// # Errors
    ///
    /// Returns an error if the session task has stopped.
    pub fn subscribe(&self, asset_class: AssetClass, symbols: Vec<Symbol>) -> Result<(), SessionError> {
        self.send(SessionCommand::Subscribe {
            asset_class,
            symbols,
        })
    }

    /// Remove symbols from the desired set.
    ///
    /// # Errors
    ///
    /// Returns an error if the session task has stopped.
    pub fn unsubscribe(
        &self,
        asset_class: AssetClass,
        symbols: Vec<Symbol>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Unsubscribe {
            asset_class,
            symbols,
        })
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Stopped(self.endpoint.to_string()))
    }
}

// =============================================================================
// Session Task
// =============================================================================

/// What the session loop does next.
enum Step {
    Idle,
    Connect,
    Stream(Box<dyn FeedLink>),
    Retry(Duration),
    Stop,
}

/// Why an open or opening connection was lost.
enum Loss {
    Closed(Option<u16>),
    Error(String),
}

/// Transport session task.
pub struct TransportSession {
    config: SessionConfig,
    connector: Arc<dyn FeedConnector>,
    codec: JsonCodec,
    registry: SubscriptionRegistry,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl TransportSession {
    /// Spawn a session task.
    ///
    /// The session starts Disconnected; nothing is dialled until
    /// [`SessionHandle::connect`]. Cancelling `cancel` or dropping every
    /// handle stops the task.
    pub fn spawn(
        config: SessionConfig,
        connector: Arc<dyn FeedConnector>,
        cancel: CancellationToken,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let handle = SessionHandle {
            endpoint: Arc::from(config.endpoint.as_str()),
            asset_classes: Arc::from(config.asset_classes.as_slice()),
            commands: command_tx,
            state: state_rx,
        };

        let session = Self {
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            config,
            connector,
            codec: JsonCodec::new(),
            registry: SubscriptionRegistry::new(),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            cancel,
        };

        let task = tokio::spawn(session.run());
        (handle, event_rx, task)
    }

    /// Run the session loop until cancelled.
    async fn run(mut self) {
        tracing::debug!(endpoint = %self.config.endpoint, "Transport session started");

        let mut step = Step::Idle;
        loop {
            step = match step {
                Step::Idle => self.idle().await,
                Step::Connect => self.establish().await,
                Step::Stream(link) => self.stream(link).await,
                Step::Retry(delay) => self.wait_for_retry(delay).await,
                Step::Stop => break,
            };
        }

        self.transition(ConnectionState::Disconnected).await;
        tracing::debug!(endpoint = %self.config.endpoint, "Transport session stopped");
    }

    /// Disconnected or Failed: wait for a command.
    async fn idle(&mut self) -> Step {
        loop {
            let command = tokio::select! {
                () = self.cancel.cancelled() => return Step::Stop,
                command = self.commands.recv() => command,
            };

            match command {
                None => return Step::Stop,
                Some(SessionCommand::Connect) => {
                    if self.state() == ConnectionState::Failed {
                        self.policy.reset();
                    }
                    return Step::Connect;
                }
                Some(SessionCommand::Disconnect) => {
                    self.policy.reset();
                    self.transition(ConnectionState::Disconnected).await;
                }
                Some(command) => {
                    self.record(command);
                }
            }
        }
    }

    /// Connecting: perform the handshake.
    async fn establish(&mut self) -> Step {
        self.transition(ConnectionState::Connecting).await;
        tracing::info!(
            endpoint = %self.config.endpoint,
            attempt = self.policy.attempt_count(),
            "Connecting to market data feed"
        );

        let connector = Arc::clone(&self.connector);
        let endpoint = self.config.endpoint.clone();
        let handshake = async move { connector.connect(&endpoint).await };
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Step::Stop,
                result = &mut handshake => {
                    return match result {
                        Ok(link) => self.opened(link).await,
                        Err(e) => self.connection_lost(Loss::Error(e.to_string())).await,
                    };
                }
                command = self.commands.recv() => match command {
                    None => return Step::Stop,
                    Some(SessionCommand::Connect) => {}
                    Some(SessionCommand::Disconnect) => {
                        self.policy.reset();
                        self.transition(ConnectionState::Disconnected).await;
                        return Step::Idle;
                    }
                    Some(command) => {
                        self.record(command);
                    }
                },
            }
        }
    }

    /// Handshake succeeded: announce and replay the desired set.
    async fn opened(&mut self, mut link: Box<dyn FeedLink>) -> Step {
        self.policy.reset();
        self.transition(ConnectionState::Connected).await;
        let _ = self.events.send(SessionEvent::Opened).await;

        tracing::info!(
            endpoint = %self.config.endpoint,
            symbols = self.registry.len(),
            "Connected to market data feed"
        );

        for frame in self.registry.replay_frames() {
            if let Err(e) = self.send_frame(link.as_mut(), &frame).await {
                return self.connection_lost(Loss::Error(e)).await;
            }
        }

        Step::Stream(link)
    }

    /// Connected: pump inbound messages and outbound commands.
    async fn stream(&mut self, mut link: Box<dyn FeedLink>) -> Step {
        let mut heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = link.close(NORMAL_CLOSURE).await;
                    return Step::Stop;
                }
                command = self.commands.recv() => match command {
                    None => {
                        let _ = link.close(NORMAL_CLOSURE).await;
                        return Step::Stop;
                    }
                    Some(SessionCommand::Connect) => {}
                    Some(SessionCommand::Disconnect) => {
                        tracing::info!(endpoint = %self.config.endpoint, "Disconnecting from market data feed");
                        if let Err(e) = link.close(NORMAL_CLOSURE).await {
                            tracing::debug!(error = %e, "Close frame not delivered");
                        }
                        self.policy.reset();
                        self.transition(ConnectionState::Disconnected).await;
                        return Step::Idle;
                    }
                    Some(command) => {
                        if let Some(frame) = self.record(command)
                            && let Err(e) = self.send_frame(link.as_mut(), &frame).await
                        {
                            return self.connection_lost(Loss::Error(e)).await;
                        }
                    }
                },
                message = link.next_message() => match message {
                    Some(Ok(LinkMessage::Text(text))) => {
                        last_seen = Instant::now();
                        let _ = self.events.send(SessionEvent::Message(text)).await;
                    }
                    Some(Ok(LinkMessage::Heartbeat)) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(LinkMessage::Closed(code))) => {
                        tracing::info!(endpoint = %self.config.endpoint, ?code, "Server closed connection");
                        return self.connection_lost(Loss::Closed(code)).await;
                    }
                    Some(Err(e)) => {
                        return self.connection_lost(Loss::Error(e.to_string())).await;
                    }
                    None => {
                        tracing::info!(endpoint = %self.config.endpoint, "Feed stream ended");
                        return self.connection_lost(Loss::Closed(None)).await;
                    }
                },
                () = next_tick(heartbeat.as_mut()) => {
                    let silence = last_seen.elapsed();
                    if silence > self.config.idle_timeout {
                        tracing::warn!(
                            endpoint = %self.config.endpoint,
                            silent_secs = silence.as_secs(),
                            timeout_secs = self.config.idle_timeout.as_secs(),
                            "Heartbeat timeout detected"
                        );
                        let _ = link.close(NORMAL_CLOSURE).await;
                        return self.connection_lost(Loss::Error("heartbeat timeout".to_string())).await;
                    }
                    if let Err(e) = link.ping().await {
                        return self.connection_lost(Loss::Error(e.to_string())).await;
                    }
                }
            }
        }
    }

    /// Reconnecting: wait out the backoff delay.
    async fn wait_for_retry(&mut self, delay: Duration) -> Step {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(endpoint = %self.config.endpoint, "Session cancelled during reconnect delay");
                    return Step::Stop;
                }
                () = &mut sleep => return Step::Connect,
                command = self.commands.recv() => match command {
                    None => return Step::Stop,
                    Some(SessionCommand::Connect) => return Step::Connect,
                    Some(SessionCommand::Disconnect) => {
                        self.policy.reset();
                        self.transition(ConnectionState::Disconnected).await;
                        return Step::Idle;
                    }
                    Some(command) => {
                        self.record(command);
                    }
                },
            }
        }
    }

    /// Report the loss and decide between retrying and giving up.
    async fn connection_lost(&mut self, loss: Loss) -> Step {
        match loss {
            Loss::Closed(code) => {
                let _ = self.events.send(SessionEvent::Closed { code }).await;
            }
            Loss::Error(reason) => {
                tracing::warn!(endpoint = %self.config.endpoint, error = %reason, "Feed connection error");
                let _ = self.events.send(SessionEvent::TransportError(reason)).await;
            }
        }

        if let Some(delay) = self.policy.next_delay() {
            let attempt = self.policy.attempt_count();
            tracing::info!(
                endpoint = %self.config.endpoint,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to market data feed"
            );
            metrics::record_reconnect_attempt(&self.config.endpoint);

            self.transition(ConnectionState::Reconnecting).await;
            let _ = self
                .events
                .send(SessionEvent::RetryScheduled { attempt, delay })
                .await;
            Step::Retry(delay)
        } else {
            let attempts = self.policy.attempt_count();
            tracing::error!(
                endpoint = %self.config.endpoint,
                error = %ReconnectError::MaxAttemptsExceeded(attempts),
                "Giving up on market data feed"
            );

            self.transition(ConnectionState::Failed).await;
            let _ = self.events.send(SessionEvent::Exhausted { attempts }).await;
            Step::Idle
        }
    }

    /// Apply a subscription command to the registry.
    ///
    /// Returns the frame to send if the desired set changed.
    fn record(&mut self, command: SessionCommand) -> Option<ControlFrame> {
        let frame = match command {
            SessionCommand::Subscribe {
                asset_class,
                symbols,
            } => self.registry.subscribe(asset_class, &symbols),
            SessionCommand::Unsubscribe {
                asset_class,
                symbols,
            } => self.registry.unsubscribe(asset_class, &symbols),
            SessionCommand::Connect | SessionCommand::Disconnect => None,
        };

        metrics::record_desired_subscriptions(&self.config.endpoint, self.registry.len());
        frame
    }

    async fn send_frame(&self, link: &mut dyn FeedLink, frame: &ControlFrame) -> Result<(), String> {
        let json = self
            .codec
            .encode(frame)
            .map_err(|e| format!("failed to serialize control frame: {e}"))?;

        tracing::debug!(
            endpoint = %self.config.endpoint,
            action = ?frame.action,
            asset_class = %frame.asset_class,
            symbols = ?frame.symbols,
            "Sending control frame"
        );

        link.send_text(json)
            .await
            .map_err(|e| format!("failed to send control frame: {e}"))?;
        metrics::record_control_frame(frame.action);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }

        tracing::debug!(
            endpoint = %self.config.endpoint,
            from = %previous,
            to = %next,
            "Connection state changed"
        );
        metrics::record_connection_state(&self.config.endpoint, next);
        let _ = self.events.send(SessionEvent::StateChanged(next)).await;
    }
}

/// Wait for the next heartbeat tick, or forever when disabled.
async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new("wss://feed.example", vec![AssetClass::Crypto]);
        assert_eq!(config.heartbeat_interval, Some(Duration::from_secs(20)));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn config_from_settings() {
        let websocket = WebSocketSettings {
            heartbeat_interval: None,
            max_reconnect_attempts: 9,
            ..WebSocketSettings::default()
        };
        let channels = ChannelSettings {
            event_capacity: 16,
            ..ChannelSettings::default()
        };

        let config = SessionConfig::from_settings(
            "wss://feed.example",
            vec![AssetClass::Equity],
            &websocket,
            &channels,
        );

        assert!(config.heartbeat_interval.is_none());
        assert_eq!(config.reconnect.max_attempts, 9);
        assert_eq!(config.event_capacity, 16);
    }

    #[tokio::test]
    async fn handle_reports_stopped_session() {
        let (commands, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let (_state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let handle = SessionHandle {
            endpoint: Arc::from("wss://feed.example"),
            asset_classes: Arc::from(vec![AssetClass::Crypto]),
            commands,
            state,
        };

        assert_eq!(
            handle.connect(),
            Err(SessionError::Stopped("wss://feed.example".to_string()))
        );
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
