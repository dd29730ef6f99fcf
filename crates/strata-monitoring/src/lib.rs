//! Observability for the Strata engine: structured logging and metric recording.

use serde::{Deserialize, Serialize};

pub mod logging;
pub mod metrics;

pub use crate::logging::{init_logging, LogExt};
pub use crate::metrics::EngineMetrics;

/// Configuration for initializing logging and metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the first log line
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Log level filter (e.g., "info,strata_core=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit JSON lines instead of pretty output
    #[serde(default)]
    pub enable_json_logging: bool,
    /// Register metric descriptions at startup
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

fn default_service_name() -> String {
    "strata".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_enable_metrics() -> bool {
    true
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            enable_json_logging: false,
            enable_metrics: default_enable_metrics(),
        }
    }
}

impl MonitoringConfig {
    /// Same defaults with a different filter directive
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

/// Initialize logging and register metric descriptions
pub fn init(config: &MonitoringConfig) -> anyhow::Result<()> {
    init_logging(config)?;
    if config.enable_metrics {
        EngineMetrics::register();
    }
    tracing::info!(service_name = %config.service_name, "Monitoring initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = MonitoringConfig::default();
        assert_eq!(config.service_name, "strata");
        assert_eq!(config.log_filter, "info");
        assert!(!config.enable_json_logging);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_with_log_filter() {
        let config = MonitoringConfig::default().with_log_filter("debug,strata_core=trace");
        assert_eq!(config.log_filter, "debug,strata_core=trace");
    }
}
