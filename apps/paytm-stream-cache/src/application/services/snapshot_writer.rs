//! Snapshot Writer
//!
//! Decouples the frame loop from the snapshot store. The connection hands
//! decoded records to a bounded queue without waiting; a single writer task
//! drains the queue in arrival order, which keeps per-key write order equal
//! to wire order.
//!
//! # Store Failures
//!
//! A failed save is logged and the record dropped. After
//! `failure_threshold` consecutive failures the writer switches to
//! degraded mode: streaming continues, caching pauses, and one probe save
//! is attempted every `probe_interval`. The first successful probe puts
//! the writer back into active mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::SnapshotStore;
use crate::domain::market_data::MarketData;
use crate::infrastructure::metrics::{self, SaveOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Writer tuning.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Records buffered between the frame loop and the writer.
    pub queue_capacity: usize,
    /// Consecutive failures that switch the writer to degraded mode.
    pub failure_threshold: u32,
    /// Minimum spacing between probe saves while degraded.
    pub probe_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            failure_threshold: 5,
            probe_interval: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Whether snapshots are currently being cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Every record is saved.
    Active,
    /// Store is failing; only probe saves are attempted.
    Degraded,
}

impl CacheMode {
    /// Mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
        }
    }
}

/// Point-in-time writer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Current cache mode.
    pub mode: CacheMode,
    /// Records saved.
    pub saved: u64,
    /// Save attempts that failed.
    pub failed: u64,
    /// Records not saved because the writer was degraded.
    pub skipped: u64,
    /// Records dropped because the queue was full.
    pub dropped: u64,
    /// Failures since the last successful save.
    pub consecutive_failures: u32,
}

/// Writer state shared with the queue and the health endpoint.
#[derive(Debug, Default)]
pub struct WriterStatus {
    saved: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    consecutive_failures: AtomicU32,
    degraded: AtomicBool,
}

impl WriterStatus {
    /// Current cache mode.
    #[must_use]
    pub fn mode(&self) -> CacheMode {
        if self.degraded.load(Ordering::Acquire) {
            CacheMode::Degraded
        } else {
            CacheMode::Active
        }
    }

    /// Snapshot of all counters.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            mode: self.mode(),
            saved: self.saved.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    fn set_mode(&self, mode: CacheMode) {
        self.degraded
            .store(mode == CacheMode::Degraded, Ordering::Release);
        metrics::set_cache_mode(mode);
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Non-blocking handle used by the frame loop to submit records.
#[derive(Debug, Clone)]
pub struct SnapshotQueue {
    tx: mpsc::Sender<MarketData>,
    status: Arc<WriterStatus>,
}

impl SnapshotQueue {
    /// Queue a record for caching without waiting.
    ///
    /// Returns `false` if the record was dropped because the queue is full
    /// or the writer has stopped.
    pub fn submit(&self, record: MarketData) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                self.status.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_queue_dropped();
                tracing::warn!(
                    security_id = record.security_id(),
                    packet_type = record.packet_type().as_str(),
                    "Snapshot queue full, dropping record"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.status.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Snapshot writer stopped, dropping record");
                false
            }
        }
    }

    /// Shared writer status.
    #[must_use]
    pub fn status(&self) -> Arc<WriterStatus> {
        Arc::clone(&self.status)
    }
}

/// Create a connected queue and writer pair.
#[must_use]
pub fn snapshot_channel(
    store: Arc<dyn SnapshotStore>,
    config: WriterConfig,
    cancel: CancellationToken,
) -> (SnapshotQueue, SnapshotWriter) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let status = Arc::new(WriterStatus::default());
    let queue = SnapshotQueue {
        tx,
        status: Arc::clone(&status),
    };
    let writer = SnapshotWriter {
        rx,
        store,
        config,
        status,
        cancel,
        next_probe: None,
    };
    (queue, writer)
}

// =============================================================================
// Writer
// =============================================================================

/// Task that persists queued records.
pub struct SnapshotWriter {
    rx: mpsc::Receiver<MarketData>,
    store: Arc<dyn SnapshotStore>,
    config: WriterConfig,
    status: Arc<WriterStatus>,
    cancel: CancellationToken,
    next_probe: Option<Instant>,
}

impl SnapshotWriter {
    /// Shared writer status.
    #[must_use]
    pub fn status(&self) -> Arc<WriterStatus> {
        Arc::clone(&self.status)
    }

    /// Drain the queue until cancelled or every queue handle is dropped.
    ///
    /// An in-flight save is abandoned on cancellation.
    pub async fn run(mut self) {
        tracing::info!(
            capacity = self.config.queue_capacity,
            failure_threshold = self.config.failure_threshold,
            "Snapshot writer started"
        );

        loop {
            let record = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                record = self.rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };

            let cancel = self.cancel.clone();
            if cancel.run_until_cancelled(self.handle(record)).await.is_none() {
                break;
            }
        }

        let stats = self.status.stats();
        tracing::info!(
            saved = stats.saved,
            failed = stats.failed,
            skipped = stats.skipped,
            dropped = stats.dropped,
            "Snapshot writer stopped"
        );
    }

    /// Save one record, applying the degraded-mode policy.
    async fn handle(&mut self, record: MarketData) {
        let degraded = self.status.mode() == CacheMode::Degraded;
        if degraded {
            let now = Instant::now();
            if self.next_probe.is_some_and(|next| now < next) {
                self.status.skipped.fetch_add(1, Ordering::Relaxed);
                metrics::record_snapshot_save(SaveOutcome::Skipped);
                return;
            }
            self.next_probe = Some(now + self.config.probe_interval);
            tracing::debug!(
                security_id = record.security_id(),
                "Probing snapshot store"
            );
        }

        match self.store.save(&record).await {
            Ok(()) => {
                self.status.saved.fetch_add(1, Ordering::Relaxed);
                self.status.consecutive_failures.store(0, Ordering::Relaxed);
                metrics::record_snapshot_save(SaveOutcome::Saved);
                if degraded {
                    self.next_probe = None;
                    self.status.set_mode(CacheMode::Active);
                    tracing::info!("Snapshot store recovered, caching resumed");
                }
            }
            Err(e) => {
                self.status.failed.fetch_add(1, Ordering::Relaxed);
                let failures = self
                    .status
                    .consecutive_failures
                    .fetch_add(1, Ordering::Relaxed)
                    .saturating_add(1);
                metrics::record_snapshot_save(SaveOutcome::Failed);
                tracing::warn!(
                    security_id = record.security_id(),
                    packet_type = record.packet_type().as_str(),
                    consecutive_failures = failures,
                    error = %e,
                    "Failed to cache snapshot, record dropped"
                );

                if !degraded && failures >= self.config.failure_threshold {
                    self.next_probe = Some(Instant::now() + self.config.probe_interval);
                    self.status.set_mode(CacheMode::Degraded);
                    tracing::error!(
                        consecutive_failures = failures,
                        probe_interval_secs = self.config.probe_interval.as_secs(),
                        "Snapshot store failing, caching paused while streaming continues"
                    );
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
