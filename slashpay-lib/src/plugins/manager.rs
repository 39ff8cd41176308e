//! Plugin Manager
//!
//! Loads, validates, activates and dispatches events and RPCs to rail plugins.
//!
//! # Thread Safety
//!
//! The registry sits behind a `RwLock` that is never held across an `.await`:
//! plugin instances are cloned out before any plugin code runs. Loading,
//! stopping and removing the *same* plugin name concurrently is not
//! coordinated beyond that; callers serialize lifecycle changes per plugin.

use super::manifest::PluginManifest;
use super::traits::{Plugin, PluginModule};
use crate::{Result, SlashpayError};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Compile-time plugin catalog: plugin name -> module.
pub type PluginCatalog = HashMap<String, Arc<dyn PluginModule>>;

/// Default deadline for a single plugin event handler.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to obtain a plugin module from.
#[derive(Clone)]
pub enum PluginSource {
    /// Resolve by name against the manager's catalog.
    Named(String),
    /// Use a pre-built module (static linking, tests).
    Module(Arc<dyn PluginModule>),
}

impl PluginSource {
    fn label(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::Module(_) => "<module>".to_string(),
        }
    }
}

impl From<&str> for PluginSource {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

/// A loaded plugin.
#[derive(Clone)]
pub struct PluginRegistration {
    /// Validated manifest.
    pub manifest: PluginManifest,
    /// Plugin instance.
    pub instance: Arc<dyn Plugin>,
    /// Whether the plugin receives events and RPCs.
    pub active: bool,
}

/// Outcome of an event dispatch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Plugins whose handler completed.
    pub delivered: Vec<String>,
    /// Plugins whose handler failed or timed out.
    pub failed: Vec<SlashpayError>,
}

impl DispatchReport {
    /// Total number of plugins the event was sent to.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Whether every targeted plugin handled the event.
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Callable RPC method of a loaded plugin.
#[derive(Clone)]
pub struct RpcHandle {
    plugin: String,
    method: String,
    instance: Arc<dyn Plugin>,
}

impl RpcHandle {
    /// Plugin exposing the method.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Invoke the method.
    pub async fn call(&self, args: Value) -> Result<Value> {
        self.instance
            .call(&self.method, args)
            .await
            .map_err(|e| SlashpayError::plugin_runtime(&self.plugin, e))
    }
}

/// Registry of loaded plugins keyed by manifest name.
pub struct PluginManager {
    catalog: PluginCatalog,
    plugins: RwLock<HashMap<String, PluginRegistration>>,
    event_timeout: Duration,
}

impl PluginManager {
    /// Creates a manager with an empty catalog.
    pub fn new() -> Self {
        Self::with_catalog(PluginCatalog::new())
    }

    /// Creates a manager resolving [`PluginSource::Named`] against `catalog`.
    pub fn with_catalog(catalog: PluginCatalog) -> Self {
        Self {
            catalog,
            plugins: RwLock::new(HashMap::new()),
            event_timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }

    /// Set the deadline for a single plugin event handler.
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Load, validate and activate a plugin.
    ///
    /// Calls the module's `init` with `config`, then reads and validates its
    /// manifest. Fails with a conflict if a plugin of the same name is
    /// already registered.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, source, config), fields(source = %source.label())))]
    pub async fn load_plugin(&self, source: PluginSource, config: Value) -> Result<PluginManifest> {
        let label = source.label();
        let module = match source {
            PluginSource::Named(name) => self
                .catalog
                .get(&name)
                .cloned()
                .ok_or_else(|| SlashpayError::not_found("plugin", &name))?,
            PluginSource::Module(module) => module,
        };

        let instance = module
            .init(config)
            .await
            .map_err(|e| SlashpayError::PluginInit {
                plugin: label.clone(),
                reason: e.to_string(),
            })?;

        let manifest = module.manifest().map_err(|e| SlashpayError::PluginManifest {
            plugin: label.clone(),
            reason: e.to_string(),
        })?;
        manifest.validate(instance.as_ref())?;

        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        if plugins.contains_key(&manifest.name) {
            return Err(SlashpayError::conflict("plugin", &manifest.name));
        }
        plugins.insert(
            manifest.name.clone(),
            PluginRegistration {
                manifest: manifest.clone(),
                instance,
                active: true,
            },
        );

        #[cfg(feature = "tracing")]
        tracing::info!(plugin = %manifest.name, "plugin loaded");

        Ok(manifest)
    }

    /// Run the plugin's `start` hook and mark it active.
    pub async fn start_plugin(&self, name: &str) -> Result<()> {
        let instance = self.registration(name)?.instance;
        instance
            .start()
            .await
            .map_err(|e| SlashpayError::plugin_runtime(name, e))?;
        self.set_active(name, true);
        Ok(())
    }

    /// Run the plugin's `stop` hook and mark it inactive.
    pub async fn stop_plugin(&self, name: &str) -> Result<()> {
        let instance = self.registration(name)?.instance;
        instance.stop().await.map_err(|e| SlashpayError::PluginStop {
            plugin: name.to_string(),
            reason: e.to_string(),
        })?;
        self.set_active(name, false);
        Ok(())
    }

    /// Unregister an inactive plugin.
    ///
    /// Returns `false`, leaving the registry untouched, if the plugin is
    /// unknown or still active.
    pub fn remove_plugin(&self, name: &str) -> bool {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        match plugins.get(name) {
            Some(registration) if !registration.active => {
                plugins.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Send `event` to every active plugin subscribed to it.
    ///
    /// Handlers run concurrently. A failing or hung handler is recorded in the
    /// report and logged; it never prevents delivery to the other plugins.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, data)))]
    pub async fn dispatch_event(&self, event: &str, data: Value) -> DispatchReport {
        let targets: Vec<(String, Arc<dyn Plugin>)> = {
            let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
            plugins
                .values()
                .filter(|r| r.active && r.manifest.listens_to(event))
                .map(|r| (r.manifest.name.clone(), r.instance.clone()))
                .collect()
        };

        let timeout = self.event_timeout;
        let deliveries = targets.into_iter().map(|(name, instance)| {
            let data = data.clone();
            async move {
                let outcome = match tokio::time::timeout(timeout, instance.on_event(event, data)).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                };
                (name, outcome)
            }
        });

        let mut report = DispatchReport::default();
        for (name, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => report.delivered.push(name),
                Err(reason) => {
                    let err = SlashpayError::EventDispatch {
                        plugin: name,
                        reason,
                    };
                    #[cfg(feature = "tracing")]
                    tracing::warn!(event, "{err}");
                    report.failed.push(err);
                }
            }
        }
        report
    }

    /// Flatten every active plugin's RPC methods as `{plugin}/{method}`.
    pub fn get_rpc_registry(&self) -> HashMap<String, RpcHandle> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins
            .values()
            .filter(|r| r.active)
            .flat_map(|r| {
                r.manifest.rpc_methods().iter().map(move |method| {
                    (
                        format!("{}/{}", r.manifest.name, method),
                        RpcHandle {
                            plugin: r.manifest.name.clone(),
                            method: method.clone(),
                            instance: r.instance.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Stop every loaded plugin (best-effort), then hand `error` back.
    ///
    /// Used when a fatal configuration error shows up after some plugins
    /// are already running: `return Err(manager.graceful_abort(err).await)`.
    pub async fn graceful_abort<E>(&self, error: E) -> E {
        self.stop_all().await;
        error
    }

    /// Stop every active plugin, collecting stop failures.
    pub async fn stop_all(&self) -> Vec<SlashpayError> {
        let mut failures = Vec::new();
        for name in self.plugin_names() {
            if let Err(err) = self.stop_plugin(&name).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(plugin = %name, "{err}");
                failures.push(err);
            }
        }
        failures
    }

    /// Instance of an active plugin.
    pub fn get_plugin(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        let registration = self.registration(name)?;
        if !registration.active {
            return Err(SlashpayError::InvalidState(format!("plugin {name} is not active")));
        }
        Ok(registration.instance)
    }

    /// Registration (manifest, instance, activity) of a loaded plugin.
    pub fn registration(&self, name: &str) -> Result<PluginRegistration> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins
            .get(name)
            .cloned()
            .ok_or_else(|| SlashpayError::not_found("plugin", name))
    }

    /// Manifests of active plugins of type `"payment"`, sorted by name.
    pub fn active_payment_plugins(&self) -> Vec<PluginManifest> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        let mut manifests: Vec<PluginManifest> = plugins
            .values()
            .filter(|r| r.active && r.manifest.is_payment())
            .map(|r| r.manifest.clone())
            .collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    /// Names of all loaded plugins.
    pub fn plugin_names(&self) -> Vec<String> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.keys().cloned().collect()
    }

    /// Whether a plugin is loaded and active.
    pub fn is_active(&self, name: &str) -> bool {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.get(name).is_some_and(|r| r.active)
    }

    /// Returns the number of loaded plugins.
    pub fn len(&self) -> usize {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.len()
    }

    /// Returns true if no plugins are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_active(&self, name: &str, active: bool) {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        if let Some(registration) = plugins.get_mut(name) {
            registration.active = active;
        }
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}
