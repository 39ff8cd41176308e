//! Scriptable rail plugin.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::plugins::{
    Plugin, PluginManifest, PluginModule, PluginStateUpdate, PluginUpdateState,
    StateUpdateCallback, PAY_METHOD,
};
use crate::{Result, SlashpayError};

/// What [`MockPlugin::pay`] does with a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PayBehavior {
    /// Report `success` through the callback.
    #[default]
    Succeed,
    /// Report `failed` through the callback.
    Fail,
    /// Report `pending` and keep the callback for [`MockPlugin::resolve`].
    Pending,
    /// Return an error from `pay` without calling back.
    Error,
}

/// Rail plugin whose outcomes are scripted by the test.
pub struct MockPlugin {
    name: String,
    pay_behavior: RwLock<PayBehavior>,
    fail_events: AtomicBool,
    hang_events: AtomicBool,
    fail_stop: AtomicBool,
    pay_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    start_calls: AtomicUsize,
    payments: RwLock<Vec<Value>>,
    events: RwLock<Vec<(String, Value)>>,
    pending: RwLock<Option<(String, StateUpdateCallback)>>,
}

impl MockPlugin {
    /// Create a payment plugin that succeeds on every `pay`.
    pub fn payment(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            pay_behavior: RwLock::new(PayBehavior::default()),
            fail_events: AtomicBool::new(false),
            hang_events: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            pay_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            payments: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            pending: RwLock::new(None),
        })
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script the outcome of subsequent `pay` calls.
    pub fn set_pay_behavior(&self, behavior: PayBehavior) {
        *self.pay_behavior.write().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Make event handlers return an error.
    pub fn set_fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    /// Make event handlers never complete.
    pub fn set_hang_events(&self, hang: bool) {
        self.hang_events.store(hang, Ordering::SeqCst);
    }

    /// Make `stop` return an error.
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Number of `pay` invocations.
    pub fn pay_calls(&self) -> usize {
        self.pay_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` invocations.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Number of `start` invocations.
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Serialized payments received by `pay`, oldest first.
    pub fn payments(&self) -> Vec<Value> {
        self.payments.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events received, oldest first.
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of times `event` was received.
    pub fn event_count(&self, event: &str) -> usize {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    /// Report the final state of the last `Pending` payment.
    ///
    /// Returns `false` if no payment is pending.
    pub async fn resolve(&self, state: PluginUpdateState, data: Value) -> bool {
        let pending = self
            .pending
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match pending {
            Some((payment_id, callback)) => {
                callback(PluginStateUpdate::new(payment_id, &self.name, state).with_data(data)).await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn rpc_methods(&self) -> Vec<String> {
        vec![PAY_METHOD.to_string()]
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        if method != PAY_METHOD {
            return Err(SlashpayError::not_found("rpc method", method));
        }
        Ok(json!({ "plugin": self.name, "method": method, "args": args }))
    }

    fn listens_to_events(&self) -> bool {
        true
    }

    async fn on_event(&self, event: &str, data: Value) -> Result<()> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((event.to_string(), data));

        if self.hang_events.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(SlashpayError::plugin_runtime(&self.name, format!("{event} handler failed")));
        }
        Ok(())
    }

    async fn pay(&self, payment: Value, callback: StateUpdateCallback) -> Result<()> {
        self.pay_calls.fetch_add(1, Ordering::SeqCst);
        let payment_id = payment
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.payments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(payment);

        let behavior = *self.pay_behavior.read().unwrap_or_else(|e| e.into_inner());
        let state = match behavior {
            PayBehavior::Error => {
                return Err(SlashpayError::plugin_runtime(&self.name, "rail unavailable"));
            }
            PayBehavior::Succeed => PluginUpdateState::Success,
            PayBehavior::Fail => PluginUpdateState::Failed,
            PayBehavior::Pending => {
                *self.pending.write().unwrap_or_else(|e| e.into_inner()) =
                    Some((payment_id.clone(), callback.clone()));
                PluginUpdateState::Pending
            }
        };

        callback(PluginStateUpdate::new(payment_id, &self.name, state)).await;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(SlashpayError::plugin_runtime(&self.name, "stop failed"));
        }
        Ok(())
    }
}

/// Module wrapping a shared [`MockPlugin`].
///
/// `init` hands out the same instance every time so tests keep observing it.
pub struct MockPluginModule {
    plugin: Arc<MockPlugin>,
    manifest: PluginManifest,
    fail_init: bool,
    fail_manifest: bool,
    init_configs: RwLock<Vec<Value>>,
}

impl MockPluginModule {
    /// Module declaring a payment manifest named after the plugin.
    pub fn new(plugin: Arc<MockPlugin>) -> Self {
        let manifest = PluginManifest::payment(plugin.name());
        Self {
            plugin,
            manifest,
            fail_init: false,
            fail_manifest: false,
            init_configs: RwLock::new(Vec::new()),
        }
    }

    /// Replace the declared manifest.
    pub fn with_manifest(mut self, manifest: PluginManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Make `init` fail.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make `manifest` fail.
    pub fn failing_manifest(mut self) -> Self {
        self.fail_manifest = true;
        self
    }

    /// Configurations passed to `init`, oldest first.
    pub fn init_configs(&self) -> Vec<Value> {
        self.init_configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PluginModule for MockPluginModule {
    async fn init(&self, config: Value) -> Result<Arc<dyn Plugin>> {
        self.init_configs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(config);
        if self.fail_init {
            return Err(SlashpayError::plugin_runtime(self.plugin.name(), "init failed"));
        }
        Ok(self.plugin.clone())
    }

    fn manifest(&self) -> Result<PluginManifest> {
        if self.fail_manifest {
            return Err(SlashpayError::plugin_runtime(self.plugin.name(), "no manifest"));
        }
        Ok(self.manifest.clone())
    }
}
