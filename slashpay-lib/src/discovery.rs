//! Discovery document published by a receiving node.
//!
//! A receiver advertises the rails it accepts by publishing a JSON index at
//! [`DISCOVERY_PATH`] on its drive:
//!
//! ```json
//! { "paymentEndpoints": { "lightning": "/public/slashpay/lightning/slashpay.json" } }
//! ```
//!
//! Senders fetch it from the counterparty URL and intersect the advertised rail
//! names with their own sending priority.

use crate::{Result, SlashpayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known path of the discovery document.
pub const DISCOVERY_PATH: &str = "/public/slashpay.json";

/// Path of the rail-specific endpoint file a plugin publishes.
///
/// # Example
///
/// ```
/// use slashpay_lib::discovery::endpoint_path;
///
/// assert_eq!(endpoint_path("lightning"), "/public/slashpay/lightning/slashpay.json");
/// ```
pub fn endpoint_path(plugin_name: &str) -> String {
    format!("/public/slashpay/{plugin_name}/slashpay.json")
}

/// Index mapping rail name to endpoint location (path or URL).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryDocument {
    /// Rail name -> endpoint path or URL.
    pub payment_endpoints: BTreeMap<String, String>,
}

impl DiscoveryDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document advertising the default endpoint path of each rail.
    pub fn for_plugins<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let payment_endpoints = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                (name.to_string(), endpoint_path(name))
            })
            .collect();
        Self { payment_endpoints }
    }

    /// Add or replace an endpoint.
    pub fn with_endpoint(mut self, plugin_name: impl Into<String>, location: impl Into<String>) -> Self {
        self.payment_endpoints
            .insert(plugin_name.into(), location.into());
        self
    }

    /// Names of the advertised rails.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.payment_endpoints.keys().map(String::as_str).collect()
    }

    /// Whether the document advertises the given rail.
    pub fn supports(&self, plugin_name: &str) -> bool {
        self.payment_endpoints.contains_key(plugin_name)
    }

    /// Endpoint location of a rail.
    pub fn endpoint(&self, plugin_name: &str) -> Option<&str> {
        self.payment_endpoints.get(plugin_name).map(String::as_str)
    }

    /// Intersect `priority` with the advertised rails, preserving the order of `priority`.
    pub fn matching_plugins(&self, priority: &[String]) -> Vec<String> {
        priority
            .iter()
            .filter(|name| self.supports(name))
            .cloned()
            .collect()
    }

    /// Parse a document from an opaque JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            SlashpayError::validation("discovery document", e.to_string())
        })
    }

    /// Convert into a JSON value for publishing.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
