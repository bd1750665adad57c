//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: frames, decoded packets, decode errors, reconnects, state
//! - **Cache**: store operation latency by outcome, snapshot saves, queue
//!   drops, writer mode
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::services::CacheMode;
use crate::domain::market_data::PacketType;
use crate::infrastructure::paytm::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    // Stream
    describe_counter!(
        "paytm_stream_frames_received_total",
        "Binary frames received from the broadcast"
    );
    describe_counter!(
        "paytm_stream_frame_bytes_total",
        "Bytes of binary frames received from the broadcast"
    );
    describe_counter!(
        "paytm_stream_packets_decoded_total",
        "Packets decoded by packet type"
    );
    describe_counter!(
        "paytm_stream_decode_errors_total",
        "Packets dropped because they could not be decoded"
    );
    describe_histogram!(
        "paytm_stream_decode_seconds",
        "Time to decode one packet"
    );
    describe_counter!(
        "paytm_stream_reconnects_total",
        "Broadcast reconnection attempts"
    );
    describe_gauge!(
        "paytm_stream_connection_state",
        "Connection state (0 disconnected .. 4 streaming, 5 reconnecting, 6 closed)"
    );

    // Cache
    describe_histogram!(
        "paytm_cache_operation_seconds",
        "Snapshot store call latency by operation and outcome"
    );
    describe_counter!(
        "paytm_cache_snapshots_saved_total",
        "Snapshots written by packet type"
    );
    describe_counter!(
        "paytm_cache_writer_records_total",
        "Records handled by the snapshot writer by outcome"
    );
    describe_counter!(
        "paytm_cache_entries_skipped_total",
        "Stored entries that failed to deserialize on read"
    );
    describe_counter!(
        "paytm_cache_queue_dropped_total",
        "Records dropped because the snapshot queue was full"
    );
    describe_gauge!(
        "paytm_cache_degraded",
        "1 while the snapshot writer is degraded"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Outcome label for a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Call succeeded.
    Ok,
    /// Backend returned an error.
    Error,
    /// Call exceeded the operation timeout.
    Timeout,
}

impl StoreOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Outcome label for a record handled by the snapshot writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to the store.
    Saved,
    /// Store rejected or failed the write.
    Failed,
    /// Not attempted because the writer is degraded.
    Skipped,
}

impl SaveOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

// =============================================================================
// Stream Metrics
// =============================================================================

/// Record a binary frame.
pub fn record_frame(bytes: usize) {
    counter!("paytm_stream_frames_received_total").increment(1);
    counter!("paytm_stream_frame_bytes_total").increment(u64::try_from(bytes).unwrap_or(u64::MAX));
}

/// Record a decoded packet.
pub fn record_packet_decoded(packet_type: PacketType) {
    counter!(
        "paytm_stream_packets_decoded_total",
        "packet_type" => packet_type.as_str()
    )
    .increment(1);
}

/// Record an undecodable packet.
pub fn record_decode_error(kind: &'static str) {
    counter!("paytm_stream_decode_errors_total", "kind" => kind).increment(1);
}

/// Record the time spent decoding one packet.
pub fn record_decode_duration(duration: Duration) {
    histogram!("paytm_stream_decode_seconds").record(duration.as_secs_f64());
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("paytm_stream_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("paytm_stream_connection_state").set(state.gauge_value());
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record one snapshot store call.
pub fn record_store_operation(operation: &'static str, outcome: StoreOutcome, duration: Duration) {
    histogram!(
        "paytm_cache_operation_seconds",
        "operation" => operation,
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a snapshot written to the store.
pub fn record_snapshot_saved(packet_type: PacketType) {
    counter!(
        "paytm_cache_snapshots_saved_total",
        "packet_type" => packet_type.as_str()
    )
    .increment(1);
}

/// Record how the writer handled one record.
pub fn record_snapshot_save(outcome: SaveOutcome) {
    counter!(
        "paytm_cache_writer_records_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a stored entry skipped on read.
pub fn record_snapshot_skipped() {
    counter!("paytm_cache_entries_skipped_total").increment(1);
}

/// Record a record dropped at the full queue.
pub fn record_queue_dropped() {
    counter!("paytm_cache_queue_dropped_total").increment(1);
}

/// Update the writer mode gauge.
pub fn set_cache_mode(mode: CacheMode) {
    let value = match mode {
        CacheMode::Active => 0.0,
        CacheMode::Degraded => 1.0,
    };
    gauge!("paytm_cache_degraded").set(value);
}

// =============================================================================
// Tests
// =============================================================================
