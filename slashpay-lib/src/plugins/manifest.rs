//! Plugin manifest and its validation rules.

use super::traits::Plugin;
use crate::{Result, SlashpayError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Manifest type of plugins that can move value.
pub const PAYMENT_PLUGIN_TYPE: &str = "payment";

/// RPC method every payment plugin must expose.
pub const PAY_METHOD: &str = "pay";

/// Well-known event names.
pub mod events {
    /// Generic subscription every event-listening plugin must declare.
    pub const WATCH: &str = "watch";
    /// Dispatched when the node starts accepting payments.
    pub const RECEIVE_PAYMENT: &str = "receivePayment";
}

/// Declaration a plugin module makes about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin name, also the rail name advertised in discovery documents.
    pub name: String,
    /// Plugin type (`"payment"` for rails).
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Exposed RPC method names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc: Option<Vec<String>>,
    /// Subscribed event names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PluginManifest {
    /// Manifest with no RPC methods and no events.
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type: plugin_type.into(),
            rpc: None,
            events: None,
            description: None,
        }
    }

    /// Manifest of a payment rail exposing `pay` and listening for
    /// `watch`/`receivePayment`.
    pub fn payment(name: impl Into<String>) -> Self {
        Self::new(name, PAYMENT_PLUGIN_TYPE)
            .with_rpc([PAY_METHOD])
            .with_events([events::WATCH, events::RECEIVE_PAYMENT])
    }

    /// Set RPC method names.
    pub fn with_rpc<I, S>(mut self, rpc: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rpc = Some(rpc.into_iter().map(Into::into).collect());
        self
    }

    /// Set event names.
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    /// Whether this plugin is a payment rail.
    pub fn is_payment(&self) -> bool {
        self.plugin_type == PAYMENT_PLUGIN_TYPE
    }

    /// Whether the plugin subscribed to `event`.
    pub fn listens_to(&self, event: &str) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.iter().any(|e| e == event))
    }

    /// Exposed RPC method names (empty when none were declared).
    pub fn rpc_methods(&self) -> &[String] {
        self.rpc.as_deref().unwrap_or_default()
    }

    /// Check the manifest against the plugin instance it describes.
    ///
    /// - the name is a non-empty string
    /// - declared RPC names are unique (case-insensitive) and implemented by
    ///   the instance; payment plugins must declare `pay`
    /// - declaring events requires an event listener and the `watch` event
    pub fn validate(&self, instance: &dyn Plugin) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(SlashpayError::manifest("<unnamed>", "name must be a non-empty string"));
        }

        if let Some(rpc) = &self.rpc {
            let implemented = instance.rpc_methods();
            let mut seen = HashSet::new();
            for method in rpc {
                if !seen.insert(method.to_lowercase()) {
                    return Err(SlashpayError::manifest(
                        name,
                        format!("duplicate rpc method: {method}"),
                    ));
                }
                if !implemented.iter().any(|m| m == method) {
                    return Err(SlashpayError::manifest(
                        name,
                        format!("rpc method not implemented: {method}"),
                    ));
                }
            }
            if self.is_payment() && !rpc.iter().any(|m| m == PAY_METHOD) {
                return Err(SlashpayError::manifest(name, "payment plugin must expose pay"));
            }
        }

        if let Some(events) = &self.events {
            if !instance.listens_to_events() {
                return Err(SlashpayError::manifest(name, "plugin has no event listener"));
            }
            if !events.iter().any(|e| e == events::WATCH) {
                return Err(SlashpayError::manifest(name, "events must include watch"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Stub {
        rpc: Vec<String>,
        listener: bool,
    }

    #[async_trait]
    impl Plugin for Stub {
        fn rpc_methods(&self) -> Vec<String> {
            self.rpc.clone()
        }

        fn listens_to_events(&self) -> bool {
            self.listener
        }
    }

    fn stub(rpc: &[&str], listener: bool) -> Stub {
        Stub {
            rpc: rpc.iter().map(|s| s.to_string()).collect(),
            listener,
        }
    }

    #[test]
    fn test_payment_manifest_is_valid() {
        let manifest = PluginManifest::payment("p2sh");
        assert!(manifest.is_payment());
        assert!(manifest.listens_to(events::RECEIVE_PAYMENT));
        manifest.validate(&stub(&["pay"], true)).unwrap();
    }

    #[test]
    fn test_empty_name_rejected() {
        let manifest = PluginManifest::new("  ", "other");
        assert!(manifest.validate(&stub(&[], false)).is_err());
    }

    #[test]
    fn test_duplicate_rpc_is_case_insensitive() {
        let manifest = PluginManifest::new("x", "other").with_rpc(["status", "Status"]);
        let err = manifest.validate(&stub(&["status", "Status"], false)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unimplemented_rpc_rejected() {
        let manifest = PluginManifest::new("x", "other").with_rpc(["status"]);
        let err = manifest.validate(&stub(&[], false)).unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_payment_plugin_requires_pay() {
        let manifest = PluginManifest::new("x", PAYMENT_PLUGIN_TYPE).with_rpc(["status"]);
        let err = manifest.validate(&stub(&["status"], false)).unwrap_err();
        assert!(err.to_string().contains("pay"));
    }

    #[test]
    fn test_events_require_listener_and_watch() {
        let manifest = PluginManifest::new("x", "other").with_events(["watch"]);
        assert!(manifest.validate(&stub(&[], false)).is_err());

        let manifest = PluginManifest::new("x", "other").with_events(["receivePayment"]);
        assert!(manifest.validate(&stub(&[], true)).is_err());

        let manifest = PluginManifest::new("x", "other").with_events(["watch"]);
        manifest.validate(&stub(&[], true)).unwrap();
    }

    #[test]
    fn test_manifest_json_shape() {
        let manifest: PluginManifest = serde_json::from_value(serde_json::json!({
            "name": "lightning",
            "type": "payment",
            "rpc": ["pay"],
            "events": ["watch"]
        }))
        .unwrap();
        assert_eq!(manifest.rpc_methods(), ["pay".to_string()]);
        assert!(manifest.listens_to("watch"));
    }
}
