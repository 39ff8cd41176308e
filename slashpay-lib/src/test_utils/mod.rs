//! Test utilities for Slashpay.
//!
//! Scriptable rail plugins for exercising the plugin manager and the payment
//! state machine without a real Lightning or on-chain backend.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use slashpay_lib::test_utils::{catalog_of, MockPlugin, PayBehavior};
//!
//! let p2sh = MockPlugin::payment("p2sh");
//! p2sh.set_pay_behavior(PayBehavior::Fail);
//! let p2tr = MockPlugin::payment("p2tr");
//!
//! let manager = PluginManager::with_catalog(catalog_of(&[p2sh.clone(), p2tr.clone()]));
//! manager.load_plugin("p2sh".into(), serde_json::json!({})).await?;
//! ```

mod mock_plugin;

pub use mock_plugin::{MockPlugin, MockPluginModule, PayBehavior};

use crate::plugins::{PluginCatalog, PluginModule, PluginStateUpdate, StateUpdateCallback};
use futures::FutureExt;
use std::sync::{Arc, Mutex};

/// Build a catalog with one [`MockPluginModule`] per plugin, keyed by name.
pub fn catalog_of(plugins: &[Arc<MockPlugin>]) -> PluginCatalog {
    plugins
        .iter()
        .map(|plugin| {
            let module: Arc<dyn PluginModule> = Arc::new(MockPluginModule::new(plugin.clone()));
            (plugin.name().to_string(), module)
        })
        .collect()
}

/// Callback that drops every update.
pub fn noop_callback() -> StateUpdateCallback {
    Arc::new(|_: PluginStateUpdate| async {}.boxed())
}

/// Callback that appends every update to the returned log.
pub fn recording_callback() -> (StateUpdateCallback, Arc<Mutex<Vec<PluginStateUpdate>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: StateUpdateCallback = Arc::new(move |update: PluginStateUpdate| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(update);
        async {}.boxed()
    });
    (callback, log)
}
