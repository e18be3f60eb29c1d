//! Common configuration types for session controller components.

use serde::{Deserialize, Serialize};

/// Default log filter when neither `RUST_LOG` nor an explicit level is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full env-filter directive
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
    /// Bind address for the Prometheus scrape listener (disabled when `None`)
    pub metrics_bind_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            metrics_bind_address: None,
        }
    }
}
