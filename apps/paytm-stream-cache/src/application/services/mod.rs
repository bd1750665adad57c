//! Application Services
//!
//! - `SnapshotRepository`: key naming, bounded writes and ordered reads
//! - `SnapshotWriter`: drains decoded records into the repository and
//!   pauses caching while the store is failing

mod snapshot_repository;
mod snapshot_writer;

pub use snapshot_repository::{CacheSettings, SnapshotRepository};
pub use snapshot_writer::{
    CacheMode, SnapshotQueue, SnapshotWriter, WriterConfig, WriterStats, WriterStatus,
    snapshot_channel,
};
