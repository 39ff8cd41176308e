//! Plugin Traits
//!
//! A rail is linked into the host as a [`PluginModule`]: a factory that
//! declares a [`PluginManifest`](super::PluginManifest) and builds a
//! [`Plugin`] instance from its configuration. The manifest's RPC and event
//! names are checked at load time against what the instance reports.

use super::manifest::PluginManifest;
use crate::{Result, SlashpayError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// State reported by a plugin for a payment it was asked to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginUpdateState {
    /// Intermediate progress (broadcast, awaiting confirmation, ...).
    Pending,
    /// The rail gave up on this payment.
    Failed,
    /// The rail delivered the payment.
    Success,
}

/// Asynchronous update a plugin reports through its [`StateUpdateCallback`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStateUpdate {
    /// Payment the update refers to.
    pub payment_id: String,
    /// Reporting plugin.
    pub plugin_name: String,
    /// Reported state.
    #[serde(rename = "pluginState")]
    pub state: PluginUpdateState,
    /// Rail-specific details (txid, preimage, error message, ...).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl PluginStateUpdate {
    /// Create an update without rail-specific details.
    pub fn new(
        payment_id: impl Into<String>,
        plugin_name: impl Into<String>,
        state: PluginUpdateState,
    ) -> Self {
        Self {
            payment_id: payment_id.into(),
            plugin_name: plugin_name.into(),
            state,
            data: Value::Null,
        }
    }

    /// Attach rail-specific details.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Callback handed to [`Plugin::pay`] for reporting payment progress.
pub type StateUpdateCallback = Arc<dyn Fn(PluginStateUpdate) -> BoxFuture<'static, ()> + Send + Sync>;

/// A loaded rail instance.
///
/// Every method has a default so plugins only implement the capabilities they
/// declare in their manifest.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Names of the RPC methods [`call`](Plugin::call) understands.
    fn rpc_methods(&self) -> Vec<String> {
        Vec::new()
    }

    /// Invoke an RPC method by name.
    async fn call(&self, method: &str, _args: Value) -> Result<Value> {
        Err(SlashpayError::not_found("rpc method", method))
    }

    /// Whether this plugin implements [`on_event`](Plugin::on_event).
    fn listens_to_events(&self) -> bool {
        false
    }

    /// Handle an event the plugin subscribed to.
    async fn on_event(&self, _event: &str, _data: Value) -> Result<()> {
        Err(SlashpayError::Unimplemented("on_event"))
    }

    /// Send a serialized payment over this rail.
    ///
    /// The plugin reports the outcome later through `callback`; returning
    /// `Ok(())` only means the payment was accepted for processing.
    async fn pay(&self, _payment: Value, _callback: StateUpdateCallback) -> Result<()> {
        Err(SlashpayError::Unimplemented("pay"))
    }

    /// Optional lifecycle hook run when the plugin is (re)activated.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Optional lifecycle hook run when the plugin is deactivated.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for a plugin, linked into the host at compile time.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Build a plugin instance from its configuration.
    async fn init(&self, config: Value) -> Result<Arc<dyn Plugin>>;

    /// Describe the plugin.
    fn manifest(&self) -> Result<PluginManifest>;
}
