//! Aggregator Configuration
//!
//! Loaded from YAML. Holds the link denylists, URL translation tables,
//! registry store location, supported plugin types, plugin contact tuning
//! and the progress budget assigned to each add-compute phase.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// URL Translation
// =============================================================================

/// Southbound/northbound path rewrite tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UrlTranslationConfig {
    /// Northbound fragment -> southbound fragment, applied to outgoing paths
    pub south_bound_url: BTreeMap<String, String>,
    /// Southbound fragment -> northbound fragment, applied to response bodies
    pub north_bound_url: BTreeMap<String, String>,
}

// =============================================================================
// Plugin Contact
// =============================================================================

/// Plugin contact tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginContactConfig {
    /// Timeout bounding every plugin call
    pub request_timeout_secs: u64,
    /// Accept self-signed plugin certificates
    pub accept_invalid_certs: bool,
    /// PEM file with the CA that signed plugin certificates
    pub root_ca_path: Option<PathBuf>,
    /// Status probe attempts before declaring a plugin down
    pub status_retry_attempts: u32,
    /// Initial delay between status probe attempts
    pub status_retry_interval_ms: u64,
}

impl Default for PluginContactConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            accept_invalid_certs: false,
            root_ca_path: None,
            status_retry_attempts: 3,
            status_retry_interval_ms: 500,
        }
    }
}

impl PluginContactConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn status_retry_interval(&self) -> Duration {
        Duration::from_millis(self.status_retry_interval_ms)
    }
}

// =============================================================================
// Progress Budgets
// =============================================================================

/// Percent points assigned to each add-compute phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressBudgets {
    pub status_check: u32,
    pub systems: u32,
    pub chassis: u32,
    pub managers: u32,
    pub registries: u32,
    pub telemetry: u32,
}

impl Default for ProgressBudgets {
    fn default() -> Self {
        Self {
            status_check: 10,
            systems: 50,
            chassis: 10,
            managers: 10,
            registries: 10,
            telemetry: 9,
        }
    }
}

impl ProgressBudgets {
    pub fn total(&self) -> u32 {
        self.status_check + self.systems + self.chassis + self.managers + self.registries + self.telemetry
    }
}

// =============================================================================
// Aggregator Configuration
// =============================================================================

/// Top-level configuration for the discovery engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatorConfig {
    /// Links containing any of these names are not followed from a System
    pub skip_resource_list_under_system: Vec<String>,
    /// Resources whose path contains any of these names are not expanded
    pub skip_resource_list_under_others: Vec<String>,
    pub url_translation: UrlTranslationConfig,
    /// Directory holding the standard registry files shipped with the service
    pub registry_store_path: PathBuf,
    pub supported_plugin_types: Vec<String>,
    pub plugin: PluginContactConfig,
    /// Interval between polls of a plugin-side task monitor
    pub monitor_poll_interval_secs: u64,
    /// Upper bound on concurrent child fetches per resource
    pub max_concurrent_fetches: usize,
    pub progress: ProgressBudgets,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            skip_resource_list_under_system: vec![
                "Chassis".to_string(),
                "Managers".to_string(),
                "LogServices".to_string(),
                "WorkloadPerformanceAdvisor".to_string(),
            ],
            skip_resource_list_under_others: vec![
                "Power".to_string(),
                "Thermal".to_string(),
                "SmartStorage".to_string(),
                "LogServices".to_string(),
            ],
            url_translation: UrlTranslationConfig::default(),
            registry_store_path: PathBuf::from("/etc/odimra_config/registrystore"),
            supported_plugin_types: vec![
                "Compute".to_string(),
                "Fabric".to_string(),
                "Storage".to_string(),
            ],
            plugin: PluginContactConfig::default(),
            monitor_poll_interval_secs: 5,
            max_concurrent_fetches: 8,
            progress: ProgressBudgets::default(),
        }
    }
}

impl AggregatorConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.plugin.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "plugin.requestTimeoutSecs must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(Error::Configuration(
                "maxConcurrentFetches must be greater than zero".into(),
            ));
        }
        if self.progress.total() > 100 {
            return Err(Error::Configuration(format!(
                "progress budgets sum to {}, must not exceed 100",
                self.progress.total()
            )));
        }
        Ok(())
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_interval_secs)
    }

    /// Whether a plugin type may be added
    pub fn is_plugin_type_supported(&self, plugin_type: &str) -> bool {
        self.supported_plugin_types.iter().any(|t| t == plugin_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.progress.total() <= 100);
        assert!(config.is_plugin_type_supported("Compute"));
        assert!(!config.is_plugin_type_supported("compute"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
skipResourceListUnderSystem: ["Chassis", "Managers"]
urlTranslation:
  northBoundUrl:
    ODIM: redfish
  southBoundUrl:
    redfish: ODIM
plugin:
  requestTimeoutSecs: 5
"#;
        let config = AggregatorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.skip_resource_list_under_system, vec!["Chassis", "Managers"]);
        assert_eq!(config.url_translation.north_bound_url["ODIM"], "redfish");
        assert_eq!(config.plugin.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.plugin.status_retry_attempts, 3);
        assert_eq!(config.max_concurrent_fetches, 8);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = AggregatorConfig::from_yaml_str("maxConcurrentFetches: 0").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = AggregatorConfig::from_yaml_str("progress:\n  systems: 95\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "monitorPollIntervalSecs: 2").unwrap();
        writeln!(file, "supportedPluginTypes: [Compute]").unwrap();

        let config = AggregatorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.monitor_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.supported_plugin_types, vec!["Compute"]);

        let missing = AggregatorConfig::from_yaml_file("/nonexistent/aggregator.yaml");
        assert!(matches!(missing, Err(Error::Configuration(_))));
    }
}
