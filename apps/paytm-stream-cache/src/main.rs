//! Paytm Stream Cache Binary
//!
//! Starts the market data stream and the snapshot cache.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin paytm-stream-cache
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PUBLIC_ACCESS_TOKEN`: Paytm Money public access token
//!
//! ## Optional
//! - `PAYTM_SUBSCRIPTIONS`: `MODE:SCRIP_TYPE:EXCHANGE:SCRIP_ID,...` (default: FULL:INDEX:NSE:13)
//! - `PAYTM_WS_URL`: Broadcast endpoint
//! - `CACHE_URI`: `redis://...` or `memory://` (default: redis://127.0.0.1:6379/)
//! - `MARKET_DATA_TTL_SECONDS`: Snapshot key expiry (default: 300)
//! - `MARKET_DATA_MAX_SNAPSHOTS`: Snapshots kept per key (default: 25)
//! - `HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use paytm_stream_cache::application::ports::{SnapshotBackend, SnapshotStore};
use paytm_stream_cache::infrastructure::health::{HealthServer, HealthServerState};
use paytm_stream_cache::infrastructure::telemetry;
use paytm_stream_cache::{
    AppConfig, ConnectionConfig, ConnectionManager, InMemorySnapshotBackend, RedisSnapshotBackend,
    SnapshotRepository, init_metrics, snapshot_channel,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Paytm Stream Cache");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    match run().await {
        Ok(()) => {
            tracing::info!("Paytm Stream Cache stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = ?e, "Paytm Stream Cache failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Snapshot store
    let backend: Arc<dyn SnapshotBackend> = if config.cache.uses_memory_backend() {
        tracing::warn!("Using in-memory snapshot backend, snapshots are not shared");
        Arc::new(InMemorySnapshotBackend::new())
    } else {
        Arc::new(
            RedisSnapshotBackend::new(&config.cache.uri, config.cache.operation_timeout)
                .context("invalid snapshot store URI")?,
        )
    };
    let repository = Arc::new(SnapshotRepository::new(backend, config.cache.clone()));
    if let Err(e) = repository.ping().await {
        tracing::warn!(error = %e, "Snapshot store unreachable, streaming without cache until it recovers");
    }

    // Snapshot writer
    let store: Arc<dyn SnapshotStore> = repository.clone();
    let (queue, writer) = snapshot_channel(
        store,
        config.writer.clone(),
        shutdown_token.child_token(),
    );
    let writer_status = writer.status();
    let writer_task = tokio::spawn(writer.run());

    // Broadcast connection
    let connection_config = ConnectionConfig::from_settings(
        &config.stream,
        config.token.clone(),
        config.subscriptions.clone(),
    );
    let connection = Arc::new(ConnectionManager::new(
        connection_config,
        queue,
        shutdown_token.child_token(),
    ));

    // Health server
    let health_task = (config.server.health_port != 0).then(|| {
        let state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&connection),
            Arc::clone(&writer_status),
            Arc::clone(&repository),
        ));
        let server = HealthServer::new(config.server.health_port, state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        })
    });

    let mut stream_task = tokio::spawn(Arc::clone(&connection).run());

    tracing::info!("Stream cache ready");

    let finished = tokio::select! {
        () = await_shutdown() => None,
        joined = &mut stream_task => Some(joined),
    };

    connection.shutdown();
    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let stream_result = match finished {
        Some(joined) => joined,
        None => match tokio::time::timeout(SHUTDOWN_TIMEOUT, stream_task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("Stream task did not stop in time");
                Ok(Ok(()))
            }
        },
    };
    join_with_timeout("snapshot writer", writer_task).await;
    if let Some(task) = health_task {
        join_with_timeout("health server", task).await;
    }

    let stats = writer_status.stats();
    tracing::info!(
        saved = stats.saved,
        failed = stats.failed,
        skipped = stats.skipped,
        dropped = stats.dropped,
        "Snapshot writer totals"
    );

    stream_result
        .context("stream task panicked")?
        .context("market data stream stopped")
}

async fn join_with_timeout(name: &'static str, task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task panicked"),
        Err(_) => tracing::warn!(task = name, "Task did not stop in time"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        subscriptions = %config.subscriptions,
        cache_uri = %config.cache.uri,
        ttl_secs = config.cache.ttl.as_secs(),
        max_snapshots = config.cache.max_snapshots,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        url = %config.stream.url,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        queue_capacity = config.writer.queue_capacity,
        "Stream settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
