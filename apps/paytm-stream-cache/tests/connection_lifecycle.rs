//! Broadcast Connection Integration Tests
//!
//! Runs the connection manager against a local WebSocket venue and checks
//! the subscribe, decode, cache, reconnect and shutdown paths end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;

use paytm_stream_cache::infrastructure::paytm::auth::AuthError;
use paytm_stream_cache::infrastructure::paytm::heartbeat::HeartbeatConfig;
use paytm_stream_cache::infrastructure::paytm::reconnect::ReconnectConfig;
use paytm_stream_cache::{
    AccessToken, CacheSettings, ConnectionConfig, ConnectionError, ConnectionManager,
    ConnectionState, InMemorySnapshotBackend, PacketType, SnapshotRepository, SnapshotStore,
    SubscriptionDescriptor, WriterConfig, snapshot_channel,
};

const WAIT: Duration = Duration::from_secs(5);
const NIFTY_SUBSCRIPTION: &str =
    r#"[{"actionType":"ADD","modeType":"FULL","scripType":"INDEX","exchangeType":"NSE","scripId":"13"}]"#;

// =============================================================================
// Local venue
// =============================================================================

struct VenueConnection {
    ws: WebSocketStream<TcpStream>,
    uri: String,
}

struct MockVenue {
    url: String,
    attempts: Arc<AtomicUsize>,
    connections: mpsc::Receiver<VenueConnection>,
}

impl MockVenue {
    /// Accepts every upgrade, or answers each one with `reject`.
    async fn start(reject: Option<StatusCode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let (tx, connections) = mpsc::channel(8);

        let accepted = Arc::clone(&attempts);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let uri = Arc::new(Mutex::new(String::new()));
                    let seen = Arc::clone(&uri);
                    let callback = move |request: &Request, response: Response| {
                        *seen.lock() = request.uri().to_string();
                        match reject {
                            Some(status) => {
                                let mut error = ErrorResponse::new(Some("rejected".to_string()));
                                *error.status_mut() = status;
                                Err(error)
                            }
                            None => Ok(response),
                        }
                    };
                    if let Ok(ws) = accept_hdr_async(tcp, callback).await {
                        let uri = uri.lock().clone();
                        let _ = tx.send(VenueConnection { ws, uri }).await;
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/"),
            attempts,
            connections,
        }
    }

    async fn accept(&mut self) -> VenueConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client should connect")
            .expect("venue stopped")
    }
}

impl VenueConnection {
    async fn expect_text(&mut self) -> String {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("client should send a message")
                .expect("client closed the connection")
                .unwrap();
            match msg {
                Message::Text(text) => return text.as_str().to_string(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    async fn send_frame(&mut self, frame: Vec<u8>) {
        self.ws.send(Message::Binary(frame.into())).await.unwrap();
    }
}

// =============================================================================
// Packet builders
// =============================================================================

fn index_ltp_packet(security_id: u32, value: f32, time: u32) -> Vec<u8> {
    let mut packet = vec![64];
    packet.extend_from_slice(&value.to_le_bytes());
    packet.extend_from_slice(&time.to_le_bytes());
    packet.extend_from_slice(&security_id.to_le_bytes());
    packet.extend_from_slice(&[0, 1]);
    packet.extend_from_slice(&12.5_f32.to_le_bytes());
    packet.extend_from_slice(&0.25_f32.to_le_bytes());
    packet
}

fn index_full_packet(security_id: u32, value: f32, time: u32) -> Vec<u8> {
    let mut packet = vec![66];
    packet.extend_from_slice(&value.to_le_bytes());
    packet.extend_from_slice(&security_id.to_le_bytes());
    packet.extend_from_slice(&[0, 3]);
    for v in [22100.0_f32, 22050.0, 22200.0, 22000.0, 0.45, 100.5] {
        packet.extend_from_slice(&v.to_le_bytes());
    }
    packet.extend_from_slice(&time.to_le_bytes());
    packet
}

// =============================================================================
// Setup
// =============================================================================

struct Harness {
    manager: Arc<ConnectionManager>,
    repository: Arc<SnapshotRepository>,
    run: JoinHandle<Result<(), ConnectionError>>,
    writer_cancel: CancellationToken,
}

fn connection_config(url: &str, max_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        url: url.to_string(),
        token: AccessToken::new("test-token").unwrap(),
        subscriptions: SubscriptionDescriptor::parse("FULL:INDEX:NSE:13").unwrap(),
        connect_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_secs(2),
        heartbeat: HeartbeatConfig::new(Duration::from_secs(20), Duration::from_secs(40)),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        },
    }
}

fn start(config: ConnectionConfig) -> Harness {
    let repository = Arc::new(SnapshotRepository::new(
        Arc::new(InMemorySnapshotBackend::new()),
        CacheSettings {
            uri: "memory://".to_string(),
            ..CacheSettings::default()
        },
    ));
    let writer_cancel = CancellationToken::new();
    let store: Arc<dyn SnapshotStore> = repository.clone();
    let (queue, writer) = snapshot_channel(store, WriterConfig::default(), writer_cancel.clone());
    tokio::spawn(writer.run());

    let manager = Arc::new(ConnectionManager::new(
        config,
        queue,
        CancellationToken::new(),
    ));
    let run = tokio::spawn(Arc::clone(&manager).run());

    Harness {
        manager,
        repository,
        run,
        writer_cancel,
    }
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.subscribe_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("state should be reached")
        .unwrap();
}

async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should hold");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_subscribes_with_token_then_caches_frames() {
    let mut venue = MockVenue::start(None).await;
    let harness = start(connection_config(&venue.url, 3));

    let mut conn = venue.accept().await;
    assert!(conn.uri.contains("x_jwt_token=test-token"));
    assert_eq!(conn.expect_text().await, NIFTY_SUBSCRIPTION);
    wait_for_state(&harness.manager, ConnectionState::Streaming).await;

    let mut frame = index_full_packet(13, 22150.5, 1_718_000_000);
    frame.extend(index_ltp_packet(13, 22151.25, 1_718_000_001));
    conn.send_frame(frame).await;

    let repository = Arc::clone(&harness.repository);
    timeout(WAIT, async {
        loop {
            let full = repository.get_latest("13", PacketType::IndexFull).await.unwrap();
            let ltp = repository.get_latest("13", PacketType::IndexLtp).await.unwrap();
            if full.is_some() && ltp.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both packets should be cached");

    let stats = harness.manager.stats();
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.records_decoded, 2);
    assert_eq!(stats.connections, 1);

    harness.manager.shutdown();
    assert!(harness.run.await.unwrap().is_ok());
    harness.writer_cancel.cancel();
}

#[tokio::test]
async fn test_malformed_packet_does_not_stop_stream() {
    let mut venue = MockVenue::start(None).await;
    let harness = start(connection_config(&venue.url, 3));

    let mut conn = venue.accept().await;
    conn.expect_text().await;
    wait_for_state(&harness.manager, ConnectionState::Streaming).await;

    conn.send_frame(vec![61, 0]).await;
    conn.send_frame(index_ltp_packet(13, 22150.5, 1_718_000_000))
        .await;

    let repository = Arc::clone(&harness.repository);
    timeout(WAIT, async {
        while repository
            .get_latest("13", PacketType::IndexLtp)
            .await
            .unwrap()
            .is_none()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("valid packet should be cached");

    let stats = harness.manager.stats();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.records_decoded, 1);
    assert_eq!(harness.manager.state(), ConnectionState::Streaming);

    harness.manager.shutdown();
    assert!(harness.run.await.unwrap().is_ok());
    harness.writer_cancel.cancel();
}

#[tokio::test]
async fn test_reconnects_and_resubscribes_after_server_close() {
    let mut venue = MockVenue::start(None).await;
    let mut config = connection_config(&venue.url, 3);
    config.reconnect.initial_delay = Duration::from_millis(200);
    config.reconnect.max_delay = Duration::from_millis(500);
    let harness = start(config);

    let mut first = venue.accept().await;
    assert_eq!(first.expect_text().await, NIFTY_SUBSCRIPTION);
    wait_for_state(&harness.manager, ConnectionState::Streaming).await;

    let mut states = harness.manager.subscribe_state();
    states.borrow_and_update();
    let transitions = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == ConnectionState::Streaming {
                break;
            }
        }
        seen
    });

    first.ws.close(None).await.unwrap();

    let mut second = venue.accept().await;
    assert_eq!(second.expect_text().await, NIFTY_SUBSCRIPTION);

    let seen = timeout(WAIT, transitions).await.unwrap().unwrap();
    let reconnecting = seen
        .iter()
        .position(|s| *s == ConnectionState::Reconnecting)
        .expect("manager should pass through reconnecting");
    assert!(reconnecting < seen.len() - 1);
    assert_eq!(seen.last(), Some(&ConnectionState::Streaming));

    let manager = Arc::clone(&harness.manager);
    wait_until(|| manager.stats().connections == 2).await;
    wait_for_state(&harness.manager, ConnectionState::Streaming).await;

    let stats = harness.manager.stats();
    assert!(stats.reconnect_attempts >= 1);
    assert!(harness.manager.last_error().is_some());

    second
        .send_frame(index_ltp_packet(13, 22160.0, 1_718_000_100))
        .await;
    let repository = Arc::clone(&harness.repository);
    timeout(WAIT, async {
        while repository
            .get_latest("13", PacketType::IndexLtp)
            .await
            .unwrap()
            .is_none()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("frames after reconnect should be cached");

    harness.manager.shutdown();
    assert!(harness.run.await.unwrap().is_ok());
    harness.writer_cancel.cancel();
}

#[tokio::test]
async fn test_rejected_token_is_fatal_without_retry() {
    let venue = MockVenue::start(Some(StatusCode::UNAUTHORIZED)).await;
    let harness = start(connection_config(&venue.url, 5));

    let result = timeout(WAIT, harness.run).await.unwrap().unwrap();
    let err = result.unwrap_err();
    assert!(
        matches!(err, ConnectionError::Auth(AuthError::Rejected { status: 401 })),
        "unexpected error: {err:?}"
    );
    assert!(err.is_fatal());

    assert_eq!(venue.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.manager.state(), ConnectionState::Closed);
    assert_eq!(harness.manager.stats().reconnect_attempts, 0);
    harness.writer_cancel.cancel();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let harness = start(connection_config(&format!("ws://{addr}/"), 2));

    let result = timeout(WAIT, harness.run).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConnectionError::RetriesExhausted { attempts: 2 })
    ));
    assert_eq!(harness.manager.stats().reconnect_attempts, 2);
    assert_eq!(harness.manager.state(), ConnectionState::Closed);
    harness.writer_cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_while_streaming_is_idempotent() {
    let mut venue = MockVenue::start(None).await;
    let harness = start(connection_config(&venue.url, 3));

    let mut conn = venue.accept().await;
    conn.expect_text().await;
    wait_for_state(&harness.manager, ConnectionState::Streaming).await;

    harness.manager.shutdown();
    harness.manager.shutdown();

    assert!(timeout(WAIT, harness.run).await.unwrap().unwrap().is_ok());
    assert_eq!(harness.manager.state(), ConnectionState::Closed);

    let closed = timeout(WAIT, conn.ws.next()).await.unwrap();
    assert!(matches!(closed, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    harness.writer_cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_cancels_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = connection_config(&format!("ws://{addr}/"), 0);
    config.reconnect.initial_delay = Duration::from_secs(60);
    config.reconnect.max_delay = Duration::from_secs(60);
    let harness = start(config);

    let manager = Arc::clone(&harness.manager);
    wait_until(|| manager.stats().reconnect_attempts == 1).await;
    assert_eq!(harness.manager.state(), ConnectionState::Reconnecting);

    harness.manager.shutdown();
    let result = timeout(Duration::from_secs(1), harness.run)
        .await
        .expect("backoff sleep should be cancelled")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(harness.manager.state(), ConnectionState::Closed);
    harness.writer_cancel.cancel();
}
