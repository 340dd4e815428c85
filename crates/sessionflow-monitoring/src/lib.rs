//! Logging setup shared by sessionflow binaries.

use serde::{Deserialize, Serialize};

pub mod logging;
pub use logging::{init_logging, init_test_tracing, LogExt};

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter (e.g., "info,sessionflow_core=debug"), used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Emit JSON lines instead of pretty output
    pub json: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "sessionflow".to_string(),
            log_filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MonitoringConfig::default();
        assert_eq!(config.service_name, "sessionflow");
        assert_eq!(config.log_filter, "info");
        assert!(!config.json);
    }
}
