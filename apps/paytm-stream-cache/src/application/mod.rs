//! Application Layer - Use cases and port definitions.
//!
//! This layer holds the snapshot cache use cases and the port
//! interfaces the infrastructure adapters implement.

/// Port interfaces for storage backends and record sinks.
pub mod ports;

/// Snapshot repository and the asynchronous snapshot writer.
pub mod services;
