//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable toggling keepalive.
pub const ENV_KEEPALIVE: &str = "WSFEED_KEEPALIVE";

/// Environment variable holding the keepalive timeout in seconds.
pub const ENV_KEEPALIVE_TIMEOUT_SECS: &str = "WSFEED_KEEPALIVE_TIMEOUT_SECS";

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid endpoint: {0:?}")]
    InvalidEndpoint(String),
    #[error("Invalid timeout for {0}: must be greater than zero")]
    InvalidTimeout(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Heartbeat settings.
///
/// A single duration drives both the ping cadence and the staleness
/// threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Whether the heartbeat monitor runs.
    #[serde(default)]
    pub enabled: bool,

    /// Ping interval and pong timeout in milliseconds.
    #[serde(default = "default_keepalive_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_keepalive_timeout_ms() -> u64 {
    60_000
}

const fn default_handshake_timeout_ms() -> u64 {
    45_000
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_keepalive_timeout_ms(),
        }
    }
}

impl KeepaliveConfig {
    /// Keepalive enabled with the given timeout.
    #[must_use]
    pub fn enabled(timeout: Duration) -> Self {
        Self {
            enabled: true,
            timeout_ms: duration_ms(timeout),
        }
    }

    /// Returns the timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Read keepalive settings from the process environment.
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read keepalive settings through `lookup`, falling back to defaults
    /// for unset keys.
    ///
    /// # Errors
    /// Returns error if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_KEEPALIVE) {
            config.enabled = parse_bool(&raw).ok_or(ConfigError::InvalidValue {
                key: ENV_KEEPALIVE,
                value: raw,
            })?;
        }

        if let Some(raw) = lookup(ENV_KEEPALIVE_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_KEEPALIVE_TIMEOUT_SECS,
                value: raw.clone(),
            })?;
            config.timeout_ms = secs.saturating_mul(1000);
        }

        Ok(config)
    }
}

/// Configuration for a single streaming connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Endpoint URL, `ws://` or `wss://`.
    pub endpoint: String,

    /// Heartbeat settings.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Upper bound on the opening handshake in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl StreamConfig {
    /// Configuration for `endpoint` with keepalive disabled.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            keepalive: KeepaliveConfig::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    /// Enable keepalive with the given timeout.
    #[must_use]
    pub fn with_keepalive(mut self, timeout: Duration) -> Self {
        self.keepalive = KeepaliveConfig::enabled(timeout);
        self
    }

    /// Replace the keepalive settings.
    #[must_use]
    pub fn with_keepalive_config(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Disable keepalive.
    #[must_use]
    pub const fn without_keepalive(mut self) -> Self {
        self.keepalive.enabled = false;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = duration_ms(timeout);
        self
    }

    /// Returns the handshake timeout as a Duration.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Check the configuration before connecting.
    ///
    /// # Errors
    /// Returns error on a missing or non-WebSocket endpoint, or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        let scheme_ok = ["ws://", "wss://"].iter().any(|scheme| {
            endpoint.len() > scheme.len()
                && endpoint
                    .get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        });
        if !scheme_ok {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("handshake"));
        }
        if self.keepalive.enabled && self.keepalive.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("keepalive"));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StreamConfig::new("wss://stream.example.com/ws/btcusdt@trade");
        assert!(!config.keepalive.enabled);
        assert_eq!(config.keepalive.timeout(), Duration::from_secs(60));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(45));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StreamConfig::new("ws://127.0.0.1:9000")
            .with_keepalive(Duration::from_secs(5))
            .with_handshake_timeout(Duration::from_millis(1500));
        assert!(config.keepalive.enabled);
        assert_eq!(config.keepalive.timeout_ms, 5_000);
        assert_eq!(config.handshake_timeout_ms, 1_500);

        let config = config.without_keepalive();
        assert!(!config.keepalive.enabled);
        assert_eq!(config.keepalive.timeout_ms, 5_000);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StreamConfig =
            serde_json::from_str(r#"{"endpoint": "wss://example.com/ws"}"#).unwrap();
        assert_eq!(config, StreamConfig::new("wss://example.com/ws"));

        let config: StreamConfig = serde_json::from_str(
            r#"{"endpoint": "wss://example.com/ws", "keepalive": {"enabled": true}}"#,
        )
        .unwrap();
        assert!(config.keepalive.enabled);
        assert_eq!(config.keepalive.timeout_ms, 60_000);
    }

    #[test]
    fn test_validate_rejects_bad_endpoints() {
        for endpoint in ["", "   ", "http://example.com", "wss://", "example.com/ws"] {
            let err = StreamConfig::new(endpoint).validate().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEndpoint(_)), "{endpoint:?}");
        }
        assert!(StreamConfig::new("WSS://EXAMPLE.COM").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = StreamConfig::new("ws://localhost").with_handshake_timeout(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTimeout("handshake"))
        );

        let config = StreamConfig::new("ws://localhost").with_keepalive(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTimeout("keepalive"))
        );

        // A zero timeout is irrelevant while keepalive is off.
        let config = config.without_keepalive();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keepalive_from_lookup() {
        let config = KeepaliveConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, KeepaliveConfig::default());

        let config = KeepaliveConfig::from_lookup(lookup(&[
            (ENV_KEEPALIVE, "true"),
            (ENV_KEEPALIVE_TIMEOUT_SECS, "30"),
        ]))
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_keepalive_from_lookup_rejects_garbage() {
        let err = KeepaliveConfig::from_lookup(lookup(&[(ENV_KEEPALIVE, "maybe")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_KEEPALIVE,
                value: "maybe".to_string()
            }
        );

        let err = KeepaliveConfig::from_lookup(lookup(&[(ENV_KEEPALIVE_TIMEOUT_SECS, "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_KEEPALIVE_TIMEOUT_SECS));
    }
}
