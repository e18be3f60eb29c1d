//! Session Controller configuration.
//!
//! Configuration is loaded from `SC_*` environment variables. Only the
//! signaling URL is required; everything else has a default.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use common::types::PeerId;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default snapshot poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default readiness gate poll interval in milliseconds.
pub const DEFAULT_READINESS_POLL_INTERVAL_MS: u64 = 100;

/// Default upper bound on waiting for the recv transport to connect.
pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 10_000;

/// Default per-request signaling timeout in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Default max bitrate of the low camera simulcast rung (scale 4).
pub const DEFAULT_CAM_LOW_MAX_BITRATE: u32 = 96_000;

/// Default max bitrate of the high camera simulcast rung (scale 1).
pub const DEFAULT_CAM_HIGH_MAX_BITRATE: u32 = 680_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Two-rung camera simulcast ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulcastLadder {
    pub low_max_bitrate: u32,
    pub high_max_bitrate: u32,
}

impl Default for SimulcastLadder {
    fn default() -> Self {
        Self {
            low_max_bitrate: DEFAULT_CAM_LOW_MAX_BITRATE,
            high_max_bitrate: DEFAULT_CAM_HIGH_MAX_BITRATE,
        }
    }
}

/// Settings the session actor needs; a subset of [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Identity of this participant, as sent in every signaling body.
    pub peer_id: PeerId,
    pub poll_interval: Duration,
    pub readiness_poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub simulcast: SimulcastLadder,
}

impl SessionSettings {
    /// Settings with default timings for the given peer.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            readiness_poll_interval: Duration::from_millis(DEFAULT_READINESS_POLL_INTERVAL_MS),
            readiness_timeout: Duration::from_millis(DEFAULT_READINESS_TIMEOUT_MS),
            simulcast: SimulcastLadder::default(),
        }
    }
}

/// Session Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the signaling server (endpoints live under `/signaling/`).
    pub signaling_url: String,

    /// Peer identity (default: random UUID).
    pub peer_id: PeerId,

    /// Snapshot poll interval (default: 1s).
    pub poll_interval: Duration,

    /// Readiness gate poll interval (default: 100ms).
    pub readiness_poll_interval: Duration,

    /// Readiness gate timeout (default: 10s).
    pub readiness_timeout: Duration,

    /// Per-request signaling timeout (default: 10s).
    pub http_timeout: Duration,

    /// Camera simulcast ladder.
    pub simulcast: SimulcastLadder,

    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_url = vars
            .get("SC_SIGNALING_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("SC_SIGNALING_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        if !(signaling_url.starts_with("http://") || signaling_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "SC_SIGNALING_URL must be an http(s) URL, got '{signaling_url}'"
            )));
        }

        let peer_id = match vars.get("SC_PEER_ID") {
            Some(id) if id.trim().is_empty() => {
                return Err(ConfigError::InvalidValue(
                    "SC_PEER_ID must not be empty".to_string(),
                ));
            }
            Some(id) => PeerId::from(id.as_str()),
            None => PeerId::generate(),
        };

        let poll_interval = parse_millis(vars, "SC_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let readiness_poll_interval = parse_millis(
            vars,
            "SC_READINESS_POLL_INTERVAL_MS",
            DEFAULT_READINESS_POLL_INTERVAL_MS,
        )?;
        let readiness_timeout =
            parse_millis(vars, "SC_READINESS_TIMEOUT_MS", DEFAULT_READINESS_TIMEOUT_MS)?;
        let http_timeout = parse_millis(vars, "SC_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?;

        let simulcast = SimulcastLadder {
            low_max_bitrate: parse_number(vars, "SC_CAM_LOW_MAX_BITRATE", DEFAULT_CAM_LOW_MAX_BITRATE)?,
            high_max_bitrate: parse_number(
                vars,
                "SC_CAM_HIGH_MAX_BITRATE",
                DEFAULT_CAM_HIGH_MAX_BITRATE,
            )?,
        };

        if simulcast.low_max_bitrate >= simulcast.high_max_bitrate {
            return Err(ConfigError::InvalidValue(format!(
                "SC_CAM_LOW_MAX_BITRATE ({}) must be below SC_CAM_HIGH_MAX_BITRATE ({})",
                simulcast.low_max_bitrate, simulcast.high_max_bitrate
            )));
        }

        let observability = ObservabilityConfig {
            log_level: vars
                .get("SC_LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json_logs: parse_bool(vars, "SC_JSON_LOGS", false)?,
            metrics_bind_address: vars.get("SC_METRICS_BIND_ADDRESS").cloned(),
        };

        Ok(Config {
            signaling_url,
            peer_id,
            poll_interval,
            readiness_poll_interval,
            readiness_timeout,
            http_timeout,
            simulcast,
            observability,
        })
    }

    /// Settings for a session actor driven by this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            peer_id: self.peer_id.clone(),
            poll_interval: self.poll_interval,
            readiness_poll_interval: self.readiness_poll_interval,
            readiness_timeout: self.readiness_timeout,
            simulcast: self.simulcast,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{key} must be a non-negative integer, got '{raw}'"))
        }),
        None => Ok(default),
    }
}

// Zero intervals would spin the poller and the readiness gate.
fn parse_millis(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let millis: u64 = parse_number(vars, key, default)?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(Duration::from_millis(millis))
}

fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{key} must be true/false, got '{v}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "SC_SIGNALING_URL".to_string(),
            "http://localhost:3000".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load");

        assert_eq!(config.signaling_url, "http://localhost:3000");
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.readiness_poll_interval, Duration::from_millis(100));
        assert_eq!(config.readiness_timeout, Duration::from_secs(10));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.simulcast, SimulcastLadder::default());
        assert_eq!(config.observability, ObservabilityConfig::default());
        assert!(!config.peer_id.as_str().is_empty());
    }

    #[test]
    fn test_missing_signaling_url() {
        let err = Config::from_vars(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "SC_SIGNALING_URL"));
    }

    #[test]
    fn test_signaling_url_trailing_slash_trimmed() {
        let mut vars = base_vars();
        vars.insert("SC_SIGNALING_URL".into(), "https://rooms.example/".into());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.signaling_url, "https://rooms.example");
    }

    #[test]
    fn test_signaling_url_must_be_http() {
        let mut vars = base_vars();
        vars.insert("SC_SIGNALING_URL".into(), "ws://rooms.example".into());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_custom_values() {
        let mut vars = base_vars();
        vars.insert("SC_PEER_ID".into(), "peer-a".into());
        vars.insert("SC_POLL_INTERVAL_MS".into(), "250".into());
        vars.insert("SC_READINESS_TIMEOUT_MS".into(), "2000".into());
        vars.insert("SC_CAM_LOW_MAX_BITRATE".into(), "50000".into());
        vars.insert("SC_CAM_HIGH_MAX_BITRATE".into(), "1200000".into());
        vars.insert("SC_JSON_LOGS".into(), "true".into());
        vars.insert("SC_METRICS_BIND_ADDRESS".into(), "127.0.0.1:9464".into());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.peer_id.as_str(), "peer-a");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.readiness_timeout, Duration::from_secs(2));
        assert_eq!(config.simulcast.low_max_bitrate, 50_000);
        assert_eq!(config.simulcast.high_max_bitrate, 1_200_000);
        assert!(config.observability.json_logs);
        assert_eq!(
            config.observability.metrics_bind_address.as_deref(),
            Some("127.0.0.1:9464")
        );

        let settings = config.session_settings();
        assert_eq!(settings.peer_id.as_str(), "peer-a");
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_POLL_INTERVAL_MS".into(), "fast".into());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        vars.insert("SC_POLL_INTERVAL_MS".into(), "0".into());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_inverted_ladder_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_CAM_LOW_MAX_BITRATE".into(), "700000".into());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_empty_peer_id_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_PEER_ID".into(), "  ".into());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_JSON_LOGS".into(), "yes".into());
        assert!(Config::from_vars(&vars).is_err());
    }
}
