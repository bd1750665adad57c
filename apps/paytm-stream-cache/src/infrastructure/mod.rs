//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Paytm Money broadcast client (connection, codec, heartbeat, reconnect).
pub mod paytm;

/// Redis snapshot backend.
pub mod redis_backend;

/// In-process snapshot backend.
pub mod memory;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
