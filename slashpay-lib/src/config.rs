//! Runtime configuration for a Slashpay node.

use crate::discovery::DISCOVERY_PATH;
use crate::{Result, SlashpayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Node configuration.
///
/// # Example
///
/// ```
/// use slashpay_lib::SlashpayConfig;
///
/// let config = SlashpayConfig::from_json_str(r#"{
///     "sendingPriority": ["p2tr", "p2sh"],
///     "plugins": { "p2sh": { "network": "regtest" } }
/// }"#).unwrap();
///
/// assert_eq!(config.recurring_window, 100);
/// assert_eq!(config.sending_priority, ["p2tr", "p2sh"]);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashpayConfig {
    /// Default rail order for new orders.
    #[serde(default)]
    pub sending_priority: Vec<String>,

    /// Plugin name -> opaque configuration passed to the module's `init`.
    #[serde(default)]
    pub plugins: BTreeMap<String, Value>,

    /// Payments generated per window for recurring orders.
    #[serde(default = "default_recurring_window")]
    pub recurring_window: usize,

    /// Deadline for a single plugin event handler, in milliseconds.
    #[serde(default = "default_plugin_timeout_ms")]
    pub plugin_timeout_ms: u64,

    /// Path the discovery document is published at.
    #[serde(default = "default_discovery_path")]
    pub discovery_path: String,
}

fn default_recurring_window() -> usize {
    100
}

fn default_plugin_timeout_ms() -> u64 {
    30_000
}

fn default_discovery_path() -> String {
    DISCOVERY_PATH.to_string()
}

impl Default for SlashpayConfig {
    fn default() -> Self {
        Self {
            sending_priority: Vec::new(),
            plugins: BTreeMap::new(),
            recurring_window: default_recurring_window(),
            plugin_timeout_ms: default_plugin_timeout_ms(),
            discovery_path: default_discovery_path(),
        }
    }
}

impl SlashpayConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SlashpayError::validation("config", format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Set the default rail order.
    pub fn with_sending_priority<I, S>(mut self, priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sending_priority = priority.into_iter().map(Into::into).collect();
        self
    }

    /// Add a plugin and its configuration.
    pub fn with_plugin(mut self, name: impl Into<String>, config: Value) -> Self {
        self.plugins.insert(name.into(), config);
        self
    }

    /// Set the recurring window size.
    pub fn with_recurring_window(mut self, window: usize) -> Self {
        self.recurring_window = window;
        self
    }

    /// Set the plugin event handler deadline.
    pub fn with_plugin_timeout(mut self, timeout_ms: u64) -> Self {
        self.plugin_timeout_ms = timeout_ms;
        self
    }

    /// Plugin event handler deadline.
    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.recurring_window == 0 {
            return Err(SlashpayError::validation(
                "recurringWindow",
                "must be greater than zero",
            ));
        }
        if self.plugin_timeout_ms == 0 {
            return Err(SlashpayError::validation(
                "pluginTimeoutMs",
                "must be greater than zero",
            ));
        }
        if !self.discovery_path.starts_with('/') {
            return Err(SlashpayError::validation(
                "discoveryPath",
                "must be an absolute path",
            ));
        }
        let mut seen = HashSet::new();
        for rail in &self.sending_priority {
            if !seen.insert(rail.as_str()) {
                return Err(SlashpayError::validation(
                    "sendingPriority",
                    format!("duplicate entry: {rail}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: SlashpayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SlashpayConfig::default());
        assert_eq!(config.discovery_path, "/public/slashpay.json");
        assert_eq!(config.plugin_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SlashpayConfig::new().with_recurring_window(0).validate().is_err());
        assert!(SlashpayConfig::new().with_plugin_timeout(0).validate().is_err());
        assert!(SlashpayConfig::new()
            .with_sending_priority(["p2sh", "p2sh"])
            .validate()
            .is_err());
        assert!(SlashpayConfig::from_json_str(r#"{"discoveryPath": "public"}"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sendingPriority": ["lightning"], "plugins": {{"lightning": {{}}}}, "recurringWindow": 10}}"#
        )
        .unwrap();

        let config = SlashpayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.recurring_window, 10);
        assert!(config.plugins.contains_key("lightning"));

        assert!(SlashpayConfig::from_file("/nonexistent/slashpay.json").is_err());
    }
}
