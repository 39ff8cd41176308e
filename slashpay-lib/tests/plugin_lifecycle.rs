//! Plugin runtime through the public API only.

use async_trait::async_trait;
use serde_json::{json, Value};
use slashpay_lib::plugins::{
    events, Plugin, PluginCatalog, PluginManager, PluginManifest, PluginModule, PluginSource,
};
use slashpay_lib::{Result, SlashpayError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rail that counts `receivePayment` events and answers a `quote` RPC.
#[derive(Default)]
struct Onchain {
    received: AtomicUsize,
}

#[async_trait]
impl Plugin for Onchain {
    fn rpc_methods(&self) -> Vec<String> {
        vec!["pay".to_string(), "quote".to_string()]
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "quote" => Ok(json!({ "fee": args["vbytes"].as_u64().unwrap_or(0) * 2 })),
            other => Err(SlashpayError::not_found("rpc method", other)),
        }
    }

    fn listens_to_events(&self) -> bool {
        true
    }

    async fn on_event(&self, _event: &str, _data: Value) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct OnchainModule(Arc<Onchain>);

#[async_trait]
impl PluginModule for OnchainModule {
    async fn init(&self, _config: Value) -> Result<Arc<dyn Plugin>> {
        Ok(self.0.clone())
    }

    fn manifest(&self) -> Result<PluginManifest> {
        Ok(PluginManifest::payment("onchain").with_rpc(["pay", "quote"]))
    }
}

#[tokio::test]
async fn test_named_plugin_lifecycle() {
    let rail = Arc::new(Onchain::default());
    let mut catalog = PluginCatalog::new();
    catalog.insert(
        "onchain".to_string(),
        Arc::new(OnchainModule(rail.clone())) as Arc<dyn PluginModule>,
    );
    let manager = PluginManager::with_catalog(catalog);

    let manifest = manager
        .load_plugin(PluginSource::from("onchain"), json!({}))
        .await
        .unwrap();
    assert_eq!(manifest.name, "onchain");
    assert!(manager.is_active("onchain"));

    let registry = manager.get_rpc_registry();
    let quote = registry.get("onchain/quote").unwrap();
    assert_eq!(quote.call(json!({"vbytes": 140})).await.unwrap(), json!({"fee": 280}));

    let report = manager.dispatch_event(events::RECEIVE_PAYMENT, json!({})).await;
    assert!(report.all_delivered());
    assert_eq!(rail.received.load(Ordering::SeqCst), 1);

    // Still active, so it cannot be removed yet
    assert!(!manager.remove_plugin("onchain"));
    manager.stop_plugin("onchain").await.unwrap();

    let report = manager.dispatch_event(events::RECEIVE_PAYMENT, json!({})).await;
    assert_eq!(report.attempted(), 0);
    assert!(manager.get_plugin("onchain").is_err());

    manager.start_plugin("onchain").await.unwrap();
    assert!(manager.is_active("onchain"));
    manager.stop_plugin("onchain").await.unwrap();
    assert!(manager.remove_plugin("onchain"));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_unknown_name_is_not_found() {
    let manager = PluginManager::new();
    let err = manager
        .load_plugin(PluginSource::from("lightning"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SlashpayError::NotFound { .. }));
}
