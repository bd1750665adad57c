#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Paytm Stream Cache - Market Data Snapshot Cache
//!
//! Maintains a single connection to Paytm Money's live market data
//! broadcast, decodes its binary packets into typed records and keeps a
//! bounded, expiring history of recent snapshots per instrument.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core market data types
//!   - `market_data`: Packet types and decoded records
//!   - `subscription`: Instrument subscriptions and their wire names
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot backend and snapshot store contracts
//!   - `services`: Snapshot repository and the background snapshot writer
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `paytm`: Broadcast connection, packet codec, heartbeat, backoff
//!   - `redis_backend` / `memory`: Snapshot backends
//!   - `config`: Configuration from the environment
//!   - `health`: Health check and metrics HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Paytm WS ──► ConnectionManager ──► decode_frame ──► SnapshotQueue
//!                                                          │
//!                     SnapshotRepository ◄── SnapshotWriter┘
//!                            │
//!                            ▼
//!                  Redis (LPUSH/LTRIM/EXPIRE)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{MarketData, PacketType};
pub use domain::subscription::{Subscription, SubscriptionDescriptor, SubscriptionError};

// Application services
pub use application::ports::{BackendError, SnapshotBackend, SnapshotStore, StoreError};
pub use application::services::{
    CacheMode, CacheSettings, SnapshotQueue, SnapshotRepository, SnapshotWriter, WriterConfig,
    WriterStats, snapshot_channel,
};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ConfigError, ServerSettings, StreamSettings};

// Broadcast client
pub use infrastructure::paytm::{
    AccessToken, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
    ConnectionStats, decode_frame,
};

// Snapshot backends
pub use infrastructure::memory::InMemorySnapshotBackend;
pub use infrastructure::redis_backend::RedisSnapshotBackend;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
