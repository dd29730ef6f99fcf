//! Configuration for the Strata engine
//!
//! Values come from defaults, then `STRATA_*` environment variables, or from
//! a YAML document.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::CoreError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between polls of a nested backend job
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on a nested job after this many seconds; `None` waits forever
    #[serde(default)]
    pub nested_job_timeout_secs: Option<u64>,

    /// Skip adding a topology edge when an identical one exists
    #[serde(default)]
    pub deduplicate_links: bool,

    /// Base URL of the package mirror; per-site repository URLs hang off it
    #[serde(default = "default_package_mirror_url")]
    pub package_mirror_url: String,

    /// Admin account name used when the caller supplies none
    #[serde(default = "default_admin_user")]
    pub default_admin_user: String,

    /// Length of auto-generated passwords
    #[serde(default = "default_generated_password_length")]
    pub generated_password_length: usize,

    /// Log filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_package_mirror_url() -> String {
    "http://mirror.local/repo".to_string()
}

fn default_admin_user() -> String {
    "strata_admin".to_string()
}

fn default_generated_password_length() -> usize {
    24
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            nested_job_timeout_secs: None,
            deduplicate_links: false,
            package_mirror_url: default_package_mirror_url(),
            default_admin_user: default_admin_user(),
            generated_password_length: default_generated_password_length(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(interval) = lookup("STRATA_POLL_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(value) if value > 0 => config.poll_interval_ms = value,
                _ => warn!("Invalid STRATA_POLL_INTERVAL_MS value: {}", interval),
            }
        }

        if let Some(timeout) = lookup("STRATA_NESTED_JOB_TIMEOUT_SECS") {
            if timeout.is_empty() || timeout == "none" {
                config.nested_job_timeout_secs = None;
            } else if let Ok(secs) = timeout.parse::<u64>() {
                config.nested_job_timeout_secs = Some(secs);
            } else {
                warn!("Invalid STRATA_NESTED_JOB_TIMEOUT_SECS value: {}", timeout);
            }
        }

        if let Some(dedup) = lookup("STRATA_DEDUPLICATE_LINKS") {
            config.deduplicate_links = dedup.to_lowercase() == "true" || dedup == "1";
        }

        if let Some(url) = lookup("STRATA_PACKAGE_MIRROR_URL") {
            config.package_mirror_url = url.trim_end_matches('/').to_string();
        }

        if let Some(user) = lookup("STRATA_DEFAULT_ADMIN_USER") {
            config.default_admin_user = user;
        }

        if let Some(length) = lookup("STRATA_GENERATED_PASSWORD_LENGTH") {
            match length.parse::<usize>() {
                Ok(value) if value >= 8 => config.generated_password_length = value,
                _ => warn!("Invalid STRATA_GENERATED_PASSWORD_LENGTH value: {}", length),
            }
        }

        if let Some(filter) = lookup("STRATA_LOG_FILTER") {
            config.log_filter = filter;
        }

        config
    }

    /// Parse configuration from YAML; missing keys take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.poll_interval_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.generated_password_length < 8 {
            return Err(CoreError::ConfigurationError(
                "generated_password_length must be at least 8".to_string(),
            ));
        }
        Ok(())
    }

    /// Nested job poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Nested job timeout, if any
    pub fn nested_job_timeout(&self) -> Option<Duration> {
        self.nested_job_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.nested_job_timeout_secs, None);
        assert!(!config.deduplicate_links);
        assert_eq!(config.default_admin_user, "strata_admin");
        assert_eq!(config.generated_password_length, 24);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("STRATA_POLL_INTERVAL_MS", "25"),
            ("STRATA_NESTED_JOB_TIMEOUT_SECS", "600"),
            ("STRATA_DEDUPLICATE_LINKS", "true"),
            ("STRATA_PACKAGE_MIRROR_URL", "https://pkgs.example/"),
        ]));
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.nested_job_timeout(), Some(Duration::from_secs(600)));
        assert!(config.deduplicate_links);
        assert_eq!(config.package_mirror_url, "https://pkgs.example");
    }

    #[test]
    fn test_from_lookup_ignores_invalid_values() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("STRATA_POLL_INTERVAL_MS", "soon"),
            ("STRATA_GENERATED_PASSWORD_LENGTH", "3"),
        ]));
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.generated_password_length, 24);
    }

    #[test]
    fn test_from_yaml_str() {
        let config = EngineConfig::from_yaml_str(
            "poll_interval_ms: 10\nnested_job_timeout_secs: 30\ndeduplicate_links: true\n",
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.nested_job_timeout_secs, Some(30));
        assert!(config.deduplicate_links);
        assert_eq!(config.default_admin_user, "strata_admin");
    }

    #[test]
    fn test_from_yaml_str_rejects_zero_interval() {
        let err = EngineConfig::from_yaml_str("poll_interval_ms: 0").unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }
}
