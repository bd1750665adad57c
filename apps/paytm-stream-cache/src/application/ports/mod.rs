//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotBackend`: bounded list storage with expiry and key scans
//!   (Redis in production, in-memory for tests and local runs)
//!
//! ## Driver Ports (Inbound)
//!
//! - `SnapshotStore`: accepts decoded records for caching

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::market_data::MarketData;

// =============================================================================
// Errors
// =============================================================================

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or rejected the command.
    #[error("{0}")]
    Transport(String),

    /// The key pattern is not valid for this backend.
    #[error("invalid key pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern as passed to the backend.
        pattern: String,
        /// Why the pattern was rejected.
        reason: String,
    },
}

/// Errors surfaced by snapshot store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable, failing, or slower than the operation timeout.
    #[error("snapshot store unavailable during {operation}: {reason}")]
    Unavailable {
        /// Store operation that failed.
        operation: &'static str,
        /// Backend failure or timeout description.
        reason: String,
    },

    /// Record could not be serialized.
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Query pattern rejected by the backend.
    #[error("invalid query pattern: {0}")]
    InvalidPattern(String),
}

impl StoreError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Serialization(_) => "serialization",
            Self::InvalidPattern(_) => "invalid_pattern",
        }
    }
}

// =============================================================================
// Backend Port
// =============================================================================

/// One page of a cursor based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call. Zero when the scan is complete.
    pub cursor: u64,
    /// Keys matched in this page. May repeat keys from earlier pages.
    pub keys: Vec<String>,
}

/// Storage primitives the snapshot repository is built on.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Prepend `value` to the list at `key`, keep at most `max_len`
    /// entries and reset the key's expiry to `ttl`, as one atomic step.
    async fn push_bounded(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<(), BackendError>;

    /// Up to `max_len` entries of the list at `key`, newest first.
    /// A missing or expired key yields an empty list.
    async fn range(&self, key: &str, max_len: usize) -> Result<Vec<String>, BackendError>;

    /// Incrementally scan keys matching a glob-style `pattern`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> Result<ScanPage, BackendError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Backend name for health reporting.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Store Port
// =============================================================================

/// Sink for decoded records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist one record into its snapshot history.
    async fn save(&self, record: &MarketData) -> Result<(), StoreError>;
}
