//! Board Configuration Settings
//!
//! Configuration types for the ticker board, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults; only the
//! endpoint is validated.

use std::time::Duration;

/// Feed endpoint used when `TICKER_BOARD_ENDPOINT` is unset.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8999";

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering the channel dead.
    pub heartbeat_timeout: Duration,
    /// Delay before the first lifecycle re-evaluation after a session ends.
    pub retry_delay_initial: Duration,
    /// Maximum re-evaluation delay.
    pub retry_delay_max: Duration,
    /// Delay multiplier for exponential backoff.
    pub retry_delay_multiplier: f64,
    /// Consecutive failed sessions before giving up (0 = unlimited).
    pub max_retry_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(40),
            retry_delay_initial: Duration::from_millis(500),
            retry_delay_max: Duration::from_secs(30),
            retry_delay_multiplier: 2.0,
            max_retry_attempts: 0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete board configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    /// Feed endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Server port settings.
    pub server: ServerSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Capacity of the channel signal queue.
    pub signal_capacity: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            server: ServerSettings::default(),
            websocket: WebSocketSettings::default(),
            signal_capacity: 1024,
        }
    }
}

impl BoardConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty or not a WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty or not a WebSocket URL.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoint = match lookup("TICKER_BOARD_ENDPOINT") {
            Some(value) => validate_endpoint(value.trim())?,
            None => defaults.endpoint,
        };

        let server = ServerSettings {
            health_port: parse_or(
                &lookup,
                "TICKER_BOARD_HEALTH_PORT",
                defaults.server.health_port,
            ),
        };

        let ws = defaults.websocket;
        let websocket = WebSocketSettings {
            heartbeat_interval: duration_or(
                &lookup,
                "TICKER_BOARD_HEARTBEAT_INTERVAL_SECS",
                ws.heartbeat_interval,
                Duration::from_secs,
            ),
            heartbeat_timeout: duration_or(
                &lookup,
                "TICKER_BOARD_HEARTBEAT_TIMEOUT_SECS",
                ws.heartbeat_timeout,
                Duration::from_secs,
            ),
            retry_delay_initial: duration_or(
                &lookup,
                "TICKER_BOARD_RETRY_DELAY_INITIAL_MS",
                ws.retry_delay_initial,
                Duration::from_millis,
            ),
            retry_delay_max: duration_or(
                &lookup,
                "TICKER_BOARD_RETRY_DELAY_MAX_SECS",
                ws.retry_delay_max,
                Duration::from_secs,
            ),
            retry_delay_multiplier: multiplier_or(
                &lookup,
                "TICKER_BOARD_RETRY_DELAY_MULTIPLIER",
                ws.retry_delay_multiplier,
            ),
            max_retry_attempts: parse_or(
                &lookup,
                "TICKER_BOARD_MAX_RETRY_ATTEMPTS",
                ws.max_retry_attempts,
            ),
        };

        let signal_capacity = parse_or(
            &lookup,
            "TICKER_BOARD_SIGNAL_CAPACITY",
            defaults.signal_capacity,
        )
        .max(1);

        Ok(Self {
            endpoint,
            server,
            websocket,
            signal_capacity,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Endpoint is not a `ws://` or `wss://` URL.
    #[error("invalid endpoint {0:?}: expected a ws:// or wss:// URL")]
    InvalidEndpoint(String),
}

fn validate_endpoint(value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::EmptyValue("TICKER_BOARD_ENDPOINT".to_string()));
    }
    let has_host = |rest: &str| !rest.is_empty() && !rest.starts_with('/');
    match value
        .strip_prefix("ws://")
        .or_else(|| value.strip_prefix("wss://"))
    {
        Some(rest) if has_host(rest) => Ok(value.to_string()),
        _ => Err(ConfigError::InvalidEndpoint(value.to_string())),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Backoff growth must be finite and at least 1.0 so delays never shrink.
fn multiplier_or<F>(lookup: &F, key: &str, default: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|m| m.is_finite() && *m >= 1.0)
        .unwrap_or(default)
}

fn duration_or<F>(lookup: &F, key: &str, default: Duration, unit: fn(u64) -> Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, unit)
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
    fn defaults_when_environment_is_empty() {
        let config = BoardConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.endpoint, "ws://localhost:8999");
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.websocket.max_retry_attempts, 0);
    }

    #[test]
    fn overrides_are_applied() {
        let config = BoardConfig::from_lookup(lookup(&[
            ("TICKER_BOARD_ENDPOINT", "wss://feed.example.com/tickers"),
            ("TICKER_BOARD_HEALTH_PORT", "0"),
            ("TICKER_BOARD_HEARTBEAT_INTERVAL_SECS", "5"),
            ("TICKER_BOARD_RETRY_DELAY_INITIAL_MS", "250"),
            ("TICKER_BOARD_RETRY_DELAY_MULTIPLIER", "1.5"),
            ("TICKER_BOARD_MAX_RETRY_ATTEMPTS", "3"),
            ("TICKER_BOARD_SIGNAL_CAPACITY", "16"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "wss://feed.example.com/tickers");
        assert_eq!(config.server.health_port, 0);
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(
            config.websocket.retry_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.websocket.retry_delay_multiplier, 1.5);
        assert_eq!(config.websocket.max_retry_attempts, 3);
        assert_eq!(config.signal_capacity, 16);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = BoardConfig::from_lookup(lookup(&[
            ("TICKER_BOARD_HEALTH_PORT", "eighty"),
            ("TICKER_BOARD_HEARTBEAT_TIMEOUT_SECS", "-1"),
            ("TICKER_BOARD_SIGNAL_CAPACITY", "0"),
        ]))
        .unwrap();

        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.websocket.heartbeat_timeout, Duration::from_secs(40));
        assert_eq!(config.signal_capacity, 1);
    }

    #[test]
    fn retry_multiplier_below_one_falls_back() {
        for raw in ["0", "-2", "0.5", "NaN", "inf"] {
            let config = BoardConfig::from_lookup(lookup(&[(
                "TICKER_BOARD_RETRY_DELAY_MULTIPLIER",
                raw,
            )]))
            .unwrap();
            assert_eq!(config.websocket.retry_delay_multiplier, 2.0, "{raw}");
        }

        let config = BoardConfig::from_lookup(lookup(&[(
            "TICKER_BOARD_RETRY_DELAY_MULTIPLIER",
            "1",
        )]))
        .unwrap();
        assert_eq!(config.websocket.retry_delay_multiplier, 1.0);
    }

    #[test]
    fn endpoint_must_be_websocket() {
        let err = BoardConfig::from_lookup(lookup(&[(
            "TICKER_BOARD_ENDPOINT",
            "http://localhost:8999",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint(_)));

        let err = BoardConfig::from_lookup(lookup(&[("TICKER_BOARD_ENDPOINT", "ws://")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint(_)));

        let err =
            BoardConfig::from_lookup(lookup(&[("TICKER_BOARD_ENDPOINT", "  ")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyValue("TICKER_BOARD_ENDPOINT".to_string())
        );
    }
}
