//! Configuration Module
//!
//! Environment-driven configuration for the stream cache service.

mod settings;

pub use settings::{
    AppConfig, ConfigError, DEFAULT_STREAM_URL, DEFAULT_SUBSCRIPTIONS, ServerSettings,
    StreamSettings,
};
