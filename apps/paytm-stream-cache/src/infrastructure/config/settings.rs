//! Service Configuration Settings
//!
//! Configuration types for the stream cache, loaded once at startup from
//! environment variables.

use std::time::Duration;

use crate::application::services::{CacheSettings, WriterConfig};
use crate::domain::subscription::{SubscriptionDescriptor, SubscriptionError};
use crate::infrastructure::paytm::auth::{AccessToken, AuthError};

/// Production broadcast endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://developer-ws.paytmmoney.com/broadcast/user/v1/data";

/// Subscription used when `PAYTM_SUBSCRIPTIONS` is unset: NIFTY 50, full mode.
pub const DEFAULT_SUBSCRIPTIONS: &str = "FULL:INDEX:NSE:13";

/// Broadcast connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Broadcast endpoint, without the token.
    pub url: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// TLS and WebSocket upgrade timeout.
    pub auth_timeout: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(40),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broadcast access token.
    pub token: AccessToken,
    /// Instruments to stream.
    pub subscriptions: SubscriptionDescriptor,
    /// Snapshot store settings.
    pub cache: CacheSettings,
    /// Snapshot writer settings.
    pub writer: WriterConfig,
    /// Broadcast connection settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or a value is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let raw_token = env
            .get("PUBLIC_ACCESS_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("PUBLIC_ACCESS_TOKEN".to_string()))?;
        let token = AccessToken::new(raw_token).map_err(|e| match e {
            AuthError::EmptyToken => ConfigError::EmptyValue("PUBLIC_ACCESS_TOKEN".to_string()),
            other => ConfigError::InvalidValue {
                key: "PUBLIC_ACCESS_TOKEN",
                reason: other.to_string(),
            },
        })?;

        let subscriptions = SubscriptionDescriptor::parse(
            &env.get("PAYTM_SUBSCRIPTIONS")
                .unwrap_or_else(|| DEFAULT_SUBSCRIPTIONS.to_string()),
        )?;

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            uri: env.get("CACHE_URI").unwrap_or(cache_defaults.uri),
            ttl: Duration::from_secs(env.nonzero("MARKET_DATA_TTL_SECONDS", cache_defaults.ttl.as_secs())?),
            max_snapshots: env.nonzero("MARKET_DATA_MAX_SNAPSHOTS", cache_defaults.max_snapshots)?,
            scan_batch_size: env
                .nonzero("MARKET_DATA_SCAN_BATCH_SIZE", cache_defaults.scan_batch_size)?,
            key_prefix: env
                .get("MARKET_DATA_KEY_PREFIX")
                .unwrap_or(cache_defaults.key_prefix),
            operation_timeout: env.millis("CACHE_OPERATION_TIMEOUT_MS", cache_defaults.operation_timeout)?,
        };

        let writer_defaults = WriterConfig::default();
        let writer = WriterConfig {
            queue_capacity: env.nonzero("SNAPSHOT_QUEUE_CAPACITY", writer_defaults.queue_capacity)?,
            failure_threshold: env.nonzero("CACHE_FAILURE_THRESHOLD", writer_defaults.failure_threshold)?,
            probe_interval: env.secs("CACHE_PROBE_INTERVAL_SECS", writer_defaults.probe_interval)?,
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            url: env.get("PAYTM_WS_URL").unwrap_or(stream_defaults.url),
            connect_timeout: env.millis("STREAM_CONNECT_TIMEOUT_MS", stream_defaults.connect_timeout)?,
            auth_timeout: env.millis("STREAM_AUTH_TIMEOUT_MS", stream_defaults.auth_timeout)?,
            heartbeat_interval: env.nonzero_secs(
                "STREAM_HEARTBEAT_INTERVAL_SECS",
                stream_defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: env.nonzero_secs(
                "STREAM_HEARTBEAT_TIMEOUT_SECS",
                stream_defaults.heartbeat_timeout,
            )?,
            reconnect_delay_initial: env.millis(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.secs(
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse(
                "STREAM_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: env.parse(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            )?,
        };
        if !stream.reconnect_delay_multiplier.is_finite() || stream.reconnect_delay_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_RECONNECT_DELAY_MULTIPLIER",
                reason: "must be a finite number >= 1.0".to_string(),
            });
        }

        let server = ServerSettings {
            health_port: env.parse("HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        Ok(Self {
            token,
            subscriptions,
            cache,
            writer,
            stream,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed or is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// `PAYTM_SUBSCRIPTIONS` is malformed.
    #[error("invalid PAYTM_SUBSCRIPTIONS: {0}")]
    InvalidSubscriptions(#[from] SubscriptionError),
}

/// Typed access to a variable source. Blank values count as unset.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |v| {
            v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                reason: format!("'{v}': {e}"),
            })
        })
    }

    fn nonzero<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + Default + PartialEq,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::InvalidValue {
                key,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn nonzero_secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.nonzero(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_token() {
        let config = load(&[("PUBLIC_ACCESS_TOKEN", "jwt")]).unwrap();

        assert_eq!(config.token.expose(), "jwt");
        assert_eq!(config.subscriptions.to_string(), DEFAULT_SUBSCRIPTIONS);
        assert_eq!(config.cache.uri, "redis://127.0.0.1:6379/");
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_snapshots, 25);
        assert_eq!(config.cache.scan_batch_size, 200);
        assert_eq!(config.cache.key_prefix, "market");
        assert_eq!(config.cache.operation_timeout, Duration::from_secs(2));
        assert_eq!(config.writer.queue_capacity, 4096);
        assert_eq!(config.writer.failure_threshold, 5);
        assert_eq!(config.stream.url, DEFAULT_STREAM_URL);
        assert_eq!(config.stream.max_reconnect_attempts, 10);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn missing_token() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(k)) if k == "PUBLIC_ACCESS_TOKEN"));
        assert!(matches!(
            load(&[("PUBLIC_ACCESS_TOKEN", "  ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PUBLIC_ACCESS_TOKEN", "jwt"),
            ("PAYTM_SUBSCRIPTIONS", "LTP:EQUITY:NSE:11536, QUOTE:INDEX:BSE:51"),
            ("CACHE_URI", "memory://"),
            ("MARKET_DATA_TTL_SECONDS", "60"),
            ("MARKET_DATA_MAX_SNAPSHOTS", "5"),
            ("MARKET_DATA_KEY_PREFIX", "md"),
            ("STREAM_RECONNECT_DELAY_INITIAL_MS", "100"),
            ("STREAM_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("STREAM_MAX_RECONNECT_ATTEMPTS", "0"),
            ("HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.subscriptions.len(), 2);
        assert!(config.cache.uses_memory_backend());
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cache.max_snapshots, 5);
        assert_eq!(config.cache.key_prefix, "md");
        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_millis(100));
        assert!((config.stream.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.stream.max_reconnect_attempts, 0);
        assert_eq!(config.server.health_port, 0);
    }

    #[test]
    fn zero_cache_bounds_are_rejected() {
        for key in [
            "MARKET_DATA_TTL_SECONDS",
            "MARKET_DATA_MAX_SNAPSHOTS",
            "MARKET_DATA_SCAN_BATCH_SIZE",
        ] {
            let err = load(&[("PUBLIC_ACCESS_TOKEN", "jwt"), (key, "0")]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        for key in ["STREAM_HEARTBEAT_INTERVAL_SECS", "STREAM_HEARTBEAT_TIMEOUT_SECS"] {
            let err = load(&[("PUBLIC_ACCESS_TOKEN", "jwt"), (key, "0")]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = load(&[("PUBLIC_ACCESS_TOKEN", "jwt"), ("HEALTH_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("HEALTH_PORT"));

        let err = load(&[
            ("PUBLIC_ACCESS_TOKEN", "jwt"),
            ("STREAM_RECONNECT_DELAY_MULTIPLIER", "0.5"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn malformed_subscriptions_are_rejected() {
        let err = load(&[
            ("PUBLIC_ACCESS_TOKEN", "jwt"),
            ("PAYTM_SUBSCRIPTIONS", "FULL:INDEX:NSE"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubscriptions(_)));
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let config = load(&[("PUBLIC_ACCESS_TOKEN", "super-secret-jwt")]).unwrap();
        assert!(!format!("{config:?}").contains("super-secret-jwt"));
    }
}
