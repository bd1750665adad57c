//! Snapshot Repository
//!
//! Owns key naming and every interaction with the snapshot backend.
//!
//! # Keys
//!
//! One list per instrument and packet type:
//!
//! ```text
//! {prefix}:{security_id}:{PACKET_TYPE}     e.g. market:13:INDEX_FULL
//! ```
//!
//! The newest snapshot sits at the head of the list. Each write trims the
//! list to `max_snapshots` and resets the key's TTL, so a key disappears
//! once nothing has been written to it for `ttl`.
//!
//! # Reads
//!
//! `query_wildcard` walks the key space with cursor scans (never `KEYS`),
//! reads every matched list and returns all snapshots in ascending
//! `last_trade_time` order. Ties are broken by key, then by write order.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use tracing::Instrument;

use crate::application::ports::{BackendError, SnapshotBackend, SnapshotStore, StoreError};
use crate::domain::market_data::{MarketData, PacketType};
use crate::infrastructure::metrics::{self, StoreOutcome};

// =============================================================================
// Settings
// =============================================================================

/// URI scheme that selects the in-process backend.
pub const MEMORY_URI_SCHEME: &str = "memory://";

/// List reads in flight at once during a wildcard query.
const MAX_CONCURRENT_READS: usize = 16;

/// Cache configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Backend URI (`redis://...` or `memory://`).
    pub uri: String,
    /// Expiry applied to a key on every write.
    pub ttl: Duration,
    /// Maximum snapshots kept per key.
    pub max_snapshots: usize,
    /// Keys requested per scan round trip.
    pub scan_batch_size: usize,
    /// Prefix for every key.
    pub key_prefix: String,
    /// Upper bound for a single backend call.
    pub operation_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            uri: "redis://127.0.0.1:6379/".to_string(),
            ttl: Duration::from_secs(300),
            max_snapshots: 25,
            scan_batch_size: 200,
            key_prefix: "market".to_string(),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

impl CacheSettings {
    /// Whether the URI selects the in-process backend.
    #[must_use]
    pub fn uses_memory_backend(&self) -> bool {
        self.uri.starts_with(MEMORY_URI_SCHEME)
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Bounded, expiring snapshot history per instrument.
pub struct SnapshotRepository {
    backend: Arc<dyn SnapshotBackend>,
    settings: CacheSettings,
}

impl SnapshotRepository {
    /// Create a repository over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn SnapshotBackend>, settings: CacheSettings) -> Self {
        Self { backend, settings }
    }

    /// Settings the repository was built with.
    #[must_use]
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Name of the underlying backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Cache key for an instrument and packet type.
    #[must_use]
    pub fn key_for(&self, security_id: &str, packet_type: PacketType) -> String {
        format!(
            "{}:{}:{}",
            self.settings.key_prefix,
            security_id,
            packet_type.as_str()
        )
    }

    /// Append a record to its snapshot list.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if the record cannot be encoded
    /// and `StoreError::Unavailable` if the backend fails or times out.
    pub async fn save(&self, record: &MarketData) -> Result<(), StoreError> {
        let key = self.key_for(record.security_id(), record.packet_type());

        self.timed("save", &key, async {
            let payload = serde_json::to_string(record)?;
            backend_call(
                "save",
                self.backend.push_bounded(
                    &key,
                    payload,
                    self.settings.max_snapshots,
                    self.settings.ttl,
                ),
            )
            .await
        })
        .await?;

        metrics::record_snapshot_saved(record.packet_type());
        Ok(())
    }

    /// Most recent snapshot for an instrument and packet type.
    ///
    /// Returns `None` when the key is absent or expired. Entries that no
    /// longer decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the backend fails or times out.
    pub async fn get_latest(
        &self,
        security_id: &str,
        packet_type: PacketType,
    ) -> Result<Option<MarketData>, StoreError> {
        let key = self.key_for(security_id, packet_type);
        let entries = self
            .timed(
                "get_latest",
                &key,
                backend_call(
                    "get_latest",
                    self.backend.range(&key, self.settings.max_snapshots),
                ),
            )
            .await?;

        Ok(entries
            .iter()
            .find_map(|raw| decode_entry(&key, raw)))
    }

    /// All cached snapshots whose key matches `{prefix}:{pattern}`.
    ///
    /// Snapshots are sorted ascending by `last_trade_time`, then key, then
    /// write order. An empty vector means nothing matched.
    ///
    /// # Errors
    ///
    /// Any backend failure fails the whole query; partial results are
    /// never returned.
    pub async fn query_wildcard(&self, pattern: &str) -> Result<Vec<MarketData>, StoreError> {
        let full_pattern = format!("{}:{}", self.settings.key_prefix, pattern);
        let span = tracing::info_span!("snapshot.query_wildcard", pattern = %full_pattern);

        async {
            let keys = self.scan_keys(&full_pattern).await?;
            let lists: Vec<Vec<String>> = stream::iter(keys.iter().map(|key| {
                self.timed(
                    "range",
                    key,
                    backend_call("range", self.backend.range(key, self.settings.max_snapshots)),
                )
            }))
            .buffered(MAX_CONCURRENT_READS)
            .try_collect()
            .await?;

            let mut ordered: Vec<(DateTime<Utc>, usize, usize, MarketData)> = Vec::new();
            for (key_index, (key, entries)) in keys.iter().zip(lists).enumerate() {
                let newest_first = entries.len();
                for (age, raw) in entries.iter().enumerate() {
                    if let Some(record) = decode_entry(key, raw) {
                        let write_order = newest_first - age;
                        ordered.push((record.last_trade_time(), key_index, write_order, record));
                    }
                }
            }
            ordered.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

            tracing::debug!(
                keys = keys.len(),
                snapshots = ordered.len(),
                "Wildcard query completed"
            );
            Ok::<_, StoreError>(ordered.into_iter().map(|(.., record)| record).collect())
        }
        .instrument(span)
        .await
    }

    /// Check that the backend answers within the operation timeout.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the backend fails or times out.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.timed("ping", "", backend_call("ping", self.backend.ping()))
            .await
    }

    /// Collect every key matching `pattern`, de-duplicated and sorted.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = self
                .timed(
                    "scan",
                    pattern,
                    backend_call(
                        "scan",
                        self.backend
                            .scan(cursor, pattern, self.settings.scan_batch_size),
                    ),
                )
                .await?;
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        let mut keys: Vec<String> = seen.into_iter().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    /// Run one repository call under the operation timeout and record it.
    ///
    /// Every outcome, including failures before the backend is reached,
    /// produces one metric sample and one log event.
    async fn timed<T, F>(&self, operation: &'static str, key: &str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();
        let timeout = self.settings.operation_timeout;

        let (outcome, result) = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => (StoreOutcome::Ok, Ok(value)),
            Ok(Err(e)) => (StoreOutcome::Error, Err(e)),
            Err(_) => (
                StoreOutcome::Timeout,
                Err(StoreError::Unavailable {
                    operation,
                    reason: format!("timed out after {}ms", timeout.as_millis()),
                }),
            ),
        };

        let elapsed = started.elapsed();
        metrics::record_store_operation(operation, outcome, elapsed);

        #[allow(clippy::cast_possible_truncation)]
        let duration_us = elapsed.as_micros() as u64;
        match &result {
            Ok(_) => tracing::debug!(
                operation,
                key,
                outcome = outcome.as_str(),
                duration_us,
                "Store operation completed"
            ),
            Err(e) => tracing::warn!(
                operation,
                key,
                outcome = outcome.as_str(),
                duration_us,
                error = %e,
                "Store operation failed"
            ),
        }
        result
    }
}

#[async_trait]
impl SnapshotStore for SnapshotRepository {
    async fn save(&self, record: &MarketData) -> Result<(), StoreError> {
        Self::save(self, record).await
    }
}

/// Map a backend failure into a store error for `operation`.
async fn backend_call<T, F>(operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    call.await.map_err(|e| match e {
        BackendError::InvalidPattern { pattern, reason } => {
            StoreError::InvalidPattern(format!("{pattern}: {reason}"))
        }
        BackendError::Transport(reason) => StoreError::Unavailable { operation, reason },
    })
}

/// Decode one cached entry, skipping (and counting) anything unreadable.
fn decode_entry(key: &str, raw: &str) -> Option<MarketData> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(key, error = %e, "Skipping undecodable snapshot");
            metrics::record_snapshot_skipped();
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
