//! Slashpay core library.
//!
//! Rail-independent building blocks shared by senders and receivers. The crate
//! holds no payment state; persistence and networking are injected through
//! traits.
//!
//! # Features
//!
//! - **Plugin Runtime**: Load, validate and drive rail plugins behind a manifest contract
//! - **Discovery Document**: The `slashpay.json` index advertising receivable rails
//! - **Transport Abstraction**: Trait-based access to a node's public drive
//! - **Configuration**: Serde-backed node configuration
//!
//! # Example
//!
//! ```ignore
//! use slashpay_lib::plugins::{PluginManager, PluginSource};
//! use slashpay_lib::{DiscoveryDocument, MemoryNetwork, Transport};
//!
//! let manager = PluginManager::with_catalog(catalog);
//! manager.load_plugin("lightning".into(), serde_json::json!({})).await?;
//!
//! let names: Vec<String> = manager
//!     .active_payment_plugins()
//!     .into_iter()
//!     .map(|m| m.name)
//!     .collect();
//! let doc = DiscoveryDocument::for_plugins(&names);
//! ```

pub mod config;
pub mod discovery;
pub mod errors;
pub mod plugins;
pub mod prelude;
mod transport;

/// Test utilities for plugin testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::SlashpayConfig;
pub use discovery::{DiscoveryDocument, DISCOVERY_PATH};
pub use errors::{SlashpayError, SlashpayErrorCode};
pub use transport::{CreateOptions, MemoryNetwork, MemoryTransport, Transport};

/// Common result alias for Slashpay operations.
pub type Result<T> = std::result::Result<T, SlashpayError>;
