//! Rail Plugin System
//!
//! A rail (Lightning, on-chain, ...) is linked into the host as a
//! [`PluginModule`] and driven through the [`PluginManager`].
//!
//! # Architecture
//!
//! - **Manifest**: what a plugin declares about itself (`PluginManifest`)
//! - **Traits**: the capability set of a loaded plugin (`Plugin`, `PluginModule`)
//! - **Manager**: load/validate/activate/dispatch/unload (`PluginManager`)
//!
//! # Example
//!
//! ```ignore
//! use slashpay_lib::plugins::{PluginManager, PluginSource};
//!
//! let manager = PluginManager::new();
//! manager
//!     .load_plugin(PluginSource::Module(my_module), serde_json::json!({}))
//!     .await?;
//!
//! let report = manager.dispatch_event("receivePayment", serde_json::json!({})).await;
//! for failure in &report.failed {
//!     eprintln!("{failure}");
//! }
//! ```

mod manager;
mod manifest;
mod traits;

pub use manager::{
    DispatchReport, PluginCatalog, PluginManager, PluginRegistration, PluginSource, RpcHandle,
    DEFAULT_EVENT_TIMEOUT,
};
pub use manifest::{events, PluginManifest, PAYMENT_PLUGIN_TYPE, PAY_METHOD};
pub use traits::{Plugin, PluginModule, PluginStateUpdate, PluginUpdateState, StateUpdateCallback};
