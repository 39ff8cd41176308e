//! Common test utilities for slashpay-payments integration tests

use serde_json::json;
use slashpay_lib::test_utils::{catalog_of, MockPlugin};
use slashpay_lib::{
    CreateOptions, DiscoveryDocument, MemoryNetwork, MemoryTransport, SlashpayConfig, Transport,
    DISCOVERY_PATH,
};
use slashpay_payments::{
    NotificationCallback, PaymentManager, PaymentNotification, PaymentStorage,
};
use std::sync::{Arc, Mutex};

/// A counterparty advertising `rails` on `network`.
#[allow(dead_code)]
pub async fn counterparty(network: &MemoryNetwork, rails: &[&str]) -> MemoryTransport {
    let node = network.transport();
    node.create(
        DISCOVERY_PATH,
        &DiscoveryDocument::for_plugins(rails).to_value().unwrap(),
        CreateOptions::default(),
    )
    .await
    .unwrap();
    node
}

/// Notification callback that keeps everything it receives.
#[allow(dead_code)]
pub fn recorder() -> (NotificationCallback, Arc<Mutex<Vec<PaymentNotification>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let notify: NotificationCallback = Arc::new(move |n: PaymentNotification| {
        log.lock().unwrap().push(n);
    });
    (notify, seen)
}

/// A node on `network` with `rails` loaded in the given priority order.
#[allow(dead_code)]
pub struct TestNode {
    pub manager: PaymentManager,
    pub transport: Arc<dyn Transport>,
    pub notifications: Arc<Mutex<Vec<PaymentNotification>>>,
}

#[allow(dead_code)]
impl TestNode {
    pub async fn new(
        network: &MemoryNetwork,
        storage: Arc<dyn PaymentStorage>,
        rails: &[Arc<MockPlugin>],
    ) -> Self {
        let names: Vec<String> = rails.iter().map(|r| r.name().to_string()).collect();
        let mut config = SlashpayConfig::new().with_sending_priority(names.clone());
        for name in names {
            config = config.with_plugin(name, json!({}));
        }
        let transport: Arc<dyn Transport> = Arc::new(network.transport());
        let (notify, notifications) = recorder();
        let manager = PaymentManager::new(config, storage, transport.clone(), notify).unwrap();
        manager.init(&catalog_of(rails)).await.unwrap();
        Self {
            manager,
            transport,
            notifications,
        }
    }

    pub fn url(&self) -> String {
        self.transport.get_url()
    }

    pub fn count(&self, pred: impl Fn(&PaymentNotification) -> bool) -> usize {
        self.notifications.lock().unwrap().iter().filter(|n| pred(n)).count()
    }
}
