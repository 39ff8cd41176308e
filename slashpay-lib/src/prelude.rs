//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use slashpay_lib::prelude::*;
//! ```

// Error handling
pub use crate::errors::{SlashpayError, SlashpayErrorCode};
pub use crate::Result;

// Configuration
pub use crate::config::SlashpayConfig;

// Discovery and transport
pub use crate::discovery::{endpoint_path, DiscoveryDocument, DISCOVERY_PATH};
pub use crate::transport::{CreateOptions, MemoryNetwork, MemoryTransport, Transport};

// Plugins
pub use crate::plugins::{
    Plugin, PluginCatalog, PluginManager, PluginManifest, PluginModule, PluginSource,
    PluginStateUpdate, PluginUpdateState, StateUpdateCallback,
};
