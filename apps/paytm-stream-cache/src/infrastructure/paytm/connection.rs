//! Broadcast Connection Manager
//!
//! Owns the single WebSocket connection to the Paytm Money broadcast and
//! drives it through its lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Subscribed → Streaming
//!                     ↑                                          │
//!                     └──────────── Reconnecting ←───────────────┘
//!                                        │
//!                                      Closed
//! ```
//!
//! Every binary frame received while streaming is decoded packet by packet
//! and handed to the snapshot queue without waiting on the cache. Decode
//! failures never tear the connection down. Transport failures reconnect
//! with backoff and the subscription is re-sent on every new connection.
//! A rejected access token, an unusable endpoint, or exhausted retries
//! close the manager for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{AccessToken, AuthError, authenticated_url};
use super::codec::decode_frame;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::subscription_message;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::services::SnapshotQueue;
use crate::domain::subscription::SubscriptionDescriptor;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on the close frame sent at shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the broadcast connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started.
    Disconnected,
    /// Opening the TCP transport.
    Connecting,
    /// Performing the token-carrying WebSocket upgrade.
    Authenticating,
    /// Subscription message sent.
    Subscribed,
    /// Receiving market data.
    Streaming,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Numeric value exported on the state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Authenticating => 2.0,
            Self::Subscribed => 3.0,
            Self::Streaming => 4.0,
            Self::Reconnecting => 5.0,
            Self::Closed => 6.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The configured URL cannot be connected to.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// TCP connect failed.
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        /// `host:port` that was dialed.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not finish in time.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// `host:port` that was dialed.
        endpoint: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// The upgrade or token check failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// WebSocket protocol or transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The subscription message could not be sent.
    #[error("failed to send subscription: {0}")]
    Subscribe(String),

    /// No inbound traffic after a ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The heartbeat task ended while the connection was open.
    #[error("heartbeat stopped")]
    HeartbeatStopped,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// Consecutive reconnection attempts exceeded the configured limit.
    #[error("reconnection attempts exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl ConnectionError {
    /// Whether the manager must stop instead of reconnecting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidEndpoint(_) | Self::RetriesExhausted { .. } => true,
            Self::Auth(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Short error class for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::Connect { .. } => "connect",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Auth(_) => "auth",
            Self::WebSocket(_) => "websocket",
            Self::Subscribe(_) => "subscribe",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::HeartbeatStopped => "heartbeat_stopped",
            Self::Closed => "closed",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Broadcast endpoint without the token.
    pub url: String,
    /// Access token sent with the upgrade.
    pub token: AccessToken,
    /// Instruments to subscribe on every connection.
    pub subscriptions: SubscriptionDescriptor,
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on the TLS and WebSocket upgrade.
    pub auth_timeout: Duration,
    /// Ping cadence and liveness timeout.
    pub heartbeat: HeartbeatConfig,
    /// Backoff between attempts.
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    /// Build the configuration from stream settings.
    #[must_use]
    pub fn from_settings(
        settings: &StreamSettings,
        token: AccessToken,
        subscriptions: SubscriptionDescriptor,
    ) -> Self {
        Self {
            url: settings.url.clone(),
            token,
            subscriptions,
            connect_timeout: settings.connect_timeout,
            auth_timeout: settings.auth_timeout,
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
            reconnect: ReconnectConfig::from_stream_settings(settings),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct ConnectionCounters {
    frames_received: AtomicU64,
    records_decoded: AtomicU64,
    decode_errors: AtomicU64,
    records_dropped: AtomicU64,
    reconnect_attempts: AtomicU64,
    connections: AtomicU64,
}

/// Point-in-time copy of the connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Binary frames received.
    pub frames_received: u64,
    /// Packets decoded successfully.
    pub records_decoded: u64,
    /// Packets that failed to decode.
    pub decode_errors: u64,
    /// Decoded records the snapshot queue did not accept.
    pub records_dropped: u64,
    /// Reconnection attempts since start.
    pub reconnect_attempts: u64,
    /// Connections that reached `Streaming`.
    pub connections: u64,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Single-connection client for the broadcast stream.
pub struct ConnectionManager {
    config: ConnectionConfig,
    queue: SnapshotQueue,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    counters: ConnectionCounters,
    last_error: RwLock<Option<String>>,
}

impl ConnectionManager {
    /// Create a manager that feeds decoded records into `queue`.
    #[must_use]
    pub fn new(config: ConnectionConfig, queue: SnapshotQueue, cancel: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            queue,
            cancel,
            state_tx,
            counters: ConnectionCounters::default(),
            last_error: RwLock::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.counters;
        ConnectionStats {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            records_decoded: c.records_decoded.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            records_dropped: c.records_dropped.load(Ordering::Relaxed),
            reconnect_attempts: c.reconnect_attempts.load(Ordering::Relaxed),
            connections: c.connections.load(Ordering::Relaxed),
        }
    }

    /// Most recent connection error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Subscriptions sent on every connection.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionDescriptor {
        &self.config.subscriptions
    }

    /// Stop the manager. Safe to call more than once.
    ///
    /// Cancels any backoff sleep or in-flight connect, and the receive loop
    /// sends a close frame before returning.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Shutting down broadcast connection");
            self.cancel.cancel();
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Run the connection loop until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that closed the manager: a rejected token,
    /// an unusable endpoint, or `RetriesExhausted`.
    pub async fn run(self: Arc<Self>) -> Result<(), ConnectionError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        tracing::info!(
            url = %self.config.url,
            subscriptions = %self.config.subscriptions,
            token_len = self.config.token.len(),
            "Starting broadcast connection"
        );

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ConnectionState::Closed);
                return Ok(());
            }

            let err = match self.connect_and_stream(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Broadcast connection closed");
                    self.set_state(ConnectionState::Closed);
                    return Ok(());
                }
                Err(err) => err,
            };

            *self.last_error.write() = Some(err.to_string());

            if err.is_fatal() {
                tracing::error!(error = %err, kind = err.kind(), "Broadcast connection failed permanently");
                self.set_state(ConnectionState::Closed);
                return Err(err);
            }

            tracing::warn!(error = %err, kind = err.kind(), "Broadcast connection lost");
            self.set_state(ConnectionState::Reconnecting);

            let Some(delay) = policy.next_delay() else {
                let err = ConnectionError::RetriesExhausted {
                    attempts: policy.attempt_count(),
                };
                tracing::error!(error = %err, "Giving up on broadcast connection");
                *self.last_error.write() = Some(err.to_string());
                self.set_state(ConnectionState::Closed);
                return Err(err);
            };

            self.counters
                .reconnect_attempts
                .fetch_add(1, Ordering::Relaxed);
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to broadcast"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Cancelled during reconnect delay");
                    self.set_state(ConnectionState::Closed);
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection from TCP connect to close.
    ///
    /// `Ok(())` means the loop was cancelled.
    async fn connect_and_stream(&self, policy: &mut ReconnectPolicy) -> Result<(), ConnectionError> {
        let Some(mut ws) = self
            .cancel
            .run_until_cancelled(self.establish())
            .await
            .transpose()?
        else {
            return Ok(());
        };

        self.subscribe(&mut ws).await?;
        policy.reset();
        self.counters.connections.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Streaming);

        self.stream(ws).await
    }

    /// Connect and authenticate.
    async fn establish(&self) -> Result<WsStream, ConnectionError> {
        self.set_state(ConnectionState::Connecting);
        let request = authenticated_url(&self.config.url, &self.config.token)
            .into_client_request()
            .map_err(AuthError::from_handshake)?;
        let tcp = self.connect(request.uri()).await?;

        self.set_state(ConnectionState::Authenticating);
        self.authenticate(request, tcp).await
    }

    /// Open the TCP transport to the endpoint.
    async fn connect(&self, uri: &tungstenite::http::Uri) -> Result<TcpStream, ConnectionError> {
        let host = uri
            .host()
            .ok_or_else(|| ConnectionError::InvalidEndpoint(format!("missing host in {}", self.config.url)))?;
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("wss" | "https") => 443,
            _ => 80,
        });
        let endpoint = format!("{host}:{port}");

        tracing::debug!(endpoint = %endpoint, "Opening TCP connection");
        let tcp = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout: self.config.connect_timeout,
            })?
            .map_err(|source| ConnectionError::Connect { endpoint, source })?;
        tcp.set_nodelay(true)
            .map_err(|source| ConnectionError::Connect {
                endpoint: format!("{host}:{port}"),
                source,
            })?;
        Ok(tcp)
    }

    /// TLS and WebSocket upgrade carrying the access token.
    async fn authenticate(
        &self,
        request: tungstenite::handshake::client::Request,
        tcp: TcpStream,
    ) -> Result<WsStream, ConnectionError> {
        let timeout = self.config.auth_timeout;
        let (ws, response) =
            tokio::time::timeout(timeout, tokio_tungstenite::client_async_tls(request, tcp))
                .await
                .map_err(|_| AuthError::Timeout(timeout))?
                .map_err(AuthError::from_handshake)?;

        tracing::info!(status = response.status().as_u16(), "Broadcast stream authenticated");
        Ok(ws)
    }

    /// Send the subscription preferences.
    async fn subscribe(&self, ws: &mut WsStream) -> Result<(), ConnectionError> {
        let descriptor = &self.config.subscriptions;
        if descriptor.is_empty() {
            tracing::warn!("No subscriptions configured, nothing will be streamed");
        } else {
            let json = subscription_message(descriptor)
                .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;
            ws.send(Message::Text(json.into()))
                .await
                .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;
            tracing::info!(count = descriptor.len(), subscriptions = %descriptor, "Subscription sent");
            for (security_id, packet_type) in descriptor.expected_records() {
                tracing::debug!(
                    security_id = %security_id,
                    packet_type = packet_type.as_str(),
                    "Expecting packets"
                );
            }
        }
        self.set_state(ConnectionState::Subscribed);
        Ok(())
    }

    /// Receive loop for an established connection.
    async fn stream(&self, ws: WsStream) -> Result<(), ConnectionError> {
        let (mut write, mut read) = ws.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    send_close(&mut write, CLOSE_TIMEOUT).await;
                    return Ok(());
                }
                event = heartbeat_rx.recv() => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            heartbeat_state.mark_ping_sent();
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => return Err(ConnectionError::HeartbeatTimeout),
                        None => return Err(ConnectionError::HeartbeatStopped),
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Err(ConnectionError::Closed);
                    };
                    let msg = msg?;
                    heartbeat_state.record_activity();
                    match msg {
                        Message::Binary(frame) => {
                            self.on_frame(&frame);
                        }
                        Message::Text(text) => {
                            tracing::warn!(text = %text.as_str(), "Ignoring text frame from venue");
                        }
                        Message::Ping(data) => write.send(Message::Pong(data)).await?,
                        Message::Close(frame) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(ConnectionError::Closed);
                        }
                        Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }

    /// Decode every packet of a binary frame and queue the records.
    ///
    /// Returns the number of records accepted by the queue. An undecodable
    /// packet is logged and counted; the rest of that frame is dropped.
    pub fn on_frame(&self, frame: &[u8]) -> usize {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame(frame.len());

        let mut queued = 0;
        let mut started = Instant::now();
        for outcome in decode_frame(frame) {
            let elapsed = started.elapsed();
            metrics::record_decode_duration(elapsed);
            let duration_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

            match outcome {
                Ok(record) => {
                    self.counters.records_decoded.fetch_add(1, Ordering::Relaxed);
                    metrics::record_packet_decoded(record.packet_type());
                    tracing::trace!(
                        operation = "decode",
                        security_id = record.security_id(),
                        packet_type = record.packet_type().as_str(),
                        outcome = "ok",
                        duration_us,
                        "Packet decoded"
                    );
                    if self.queue.submit(record) {
                        queued += 1;
                    } else {
                        self.counters.records_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::record_decode_error(e.kind());
                    tracing::warn!(
                        operation = "decode",
                        discriminant = e.discriminant(),
                        length = e.length(),
                        outcome = e.kind(),
                        duration_us,
                        error = %e,
                        "Dropping undecodable packet"
                    );
                }
            }
            started = Instant::now();
        }
        queued
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(state);
        }
    }
}

/// Best-effort close frame that gives up after `timeout`.
async fn send_close<S>(write: &mut S, timeout: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match tokio::time::timeout(timeout, write.send(Message::Close(None))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Close frame not sent"),
        Err(_) => tracing::debug!(timeout_ms = timeout.as_millis(), "Close frame timed out"),
    }
}
