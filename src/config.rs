//! Bridge configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Missing or unparseable values fall
//! back to the defaults documented on each field.

use std::net::SocketAddr;
use std::time::Duration;

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines (default).
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level bridge configuration.
///
/// Loaded once at startup via [`BridgeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Socket address to bind the HTTP server to (default `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Upgrade-request header carrying the client identifier
    /// (default `x-client-id`).
    pub client_id_header: String,

    /// Default unicast/broadcast timeout in seconds (default 30).
    pub call_timeout_secs: u64,

    /// Seconds between liveness probes (default 30).
    pub heartbeat_interval_secs: u64,

    /// Consecutive probe failures before a connection is dropped (default 3).
    pub heartbeat_failure_threshold: u32,

    /// Client-initiated requests allowed to run at once per connection
    /// (default 64).
    pub max_inbound_in_flight: usize,

    /// Log output format (default text).
    pub log_format: LogFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            client_id_header: "x-client-id".to_string(),
            call_timeout_secs: 30,
            heartbeat_interval_secs: 30,
            heartbeat_failure_threshold: 3,
            max_inbound_in_flight: 64,
            log_format: LogFormat::Text,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let client_id_header = std::env::var("CLIENT_ID_HEADER")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.client_id_header);

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            client_id_header,
            call_timeout_secs: parse_positive("CALL_TIMEOUT_SECS", defaults.call_timeout_secs),
            heartbeat_interval_secs: parse_positive(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            heartbeat_failure_threshold: parse_positive(
                "HEARTBEAT_FAILURE_THRESHOLD",
                defaults.heartbeat_failure_threshold,
            ),
            max_inbound_in_flight: parse_positive(
                "MAX_INBOUND_IN_FLIGHT",
                defaults.max_inbound_in_flight,
            ),
            log_format,
        })
    }

    /// Default exchange timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Interval between liveness probes.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing,
/// invalid, or zero values.
fn parse_positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|v: &T| *v != T::default())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let config = BridgeConfig::default();
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_failure_threshold, 3);
        assert_eq!(config.client_id_header, "x-client-id");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn parse_positive_falls_back_on_missing_key() {
        let value: u64 = parse_positive("FLEET_BRIDGE_TEST_UNSET_KEY", 17);
        assert_eq!(value, 17);
    }
}
