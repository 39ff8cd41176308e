//! Node facade.
//!
//! [`PaymentManager`] wires configuration, storage, transport and the plugin
//! runtime together and is the single entry point for both the host and the
//! rails it loaded.

use crate::notification::NotificationCallback;
use crate::order::{OrderParams, OrderProgress, PaymentOrder};
use crate::payment::Payment;
use crate::receiver::{NewPaymentPayload, PaymentReceiver, ReceiverPayload};
use crate::sender::PaymentSender;
use crate::storage::PaymentStorage;
use crate::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use slashpay_lib::plugins::{PluginCatalog, PluginManager, PluginSource, PluginStateUpdate};
use slashpay_lib::{SlashpayConfig, SlashpayError, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Message a rail sends back to the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum PluginMessage {
    /// Publish the rail's endpoint file.
    ReadyToReceive(ReceiverPayload),
    /// The rail received a payment.
    PaymentNew(NewPaymentPayload),
    /// Progress on an outgoing payment.
    PaymentUpdate(PluginStateUpdate),
}

pub struct PaymentManager {
    config: SlashpayConfig,
    storage: Arc<dyn PaymentStorage>,
    transport: Arc<dyn Transport>,
    plugins: Arc<PluginManager>,
    receiver: PaymentReceiver,
    senders: Mutex<HashMap<String, Arc<PaymentSender>>>,
    notify: NotificationCallback,
}

impl PaymentManager {
    /// Build a node. Plugins are loaded by [`init`](Self::init).
    pub fn new(
        config: SlashpayConfig,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
        notify: NotificationCallback,
    ) -> Result<Self> {
        config.validate()?;
        let plugins =
            Arc::new(PluginManager::new().with_event_timeout(config.plugin_timeout()));
        let receiver = PaymentReceiver::new(
            plugins.clone(),
            storage.clone(),
            transport.clone(),
            notify.clone(),
        )
        .with_discovery_path(config.discovery_path.clone());
        Ok(Self {
            config,
            storage,
            transport,
            plugins,
            receiver,
            senders: Mutex::new(HashMap::new()),
            notify,
        })
    }

    pub fn config(&self) -> &SlashpayConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn receiver(&self) -> &PaymentReceiver {
        &self.receiver
    }

    /// Load every configured plugin from `catalog`.
    ///
    /// Any failure stops the plugins loaded so far before it is returned.
    pub async fn init(&self, catalog: &PluginCatalog) -> Result<()> {
        for (name, plugin_config) in &self.config.plugins {
            let Some(module) = catalog.get(name) else {
                let err = SlashpayError::not_found("plugin module", name);
                return Err(self.plugins.graceful_abort(PaymentError::from(err)).await);
            };
            let manifest = match self
                .plugins
                .load_plugin(PluginSource::Module(module.clone()), plugin_config.clone())
                .await
            {
                Ok(manifest) => manifest,
                Err(err) => return Err(self.plugins.graceful_abort(PaymentError::from(err)).await),
            };
            if manifest.name != *name {
                let err = SlashpayError::manifest(
                    name,
                    format!("configured as {name} but declares {}", manifest.name),
                );
                return Err(self.plugins.graceful_abort(PaymentError::from(err)).await);
            }
        }
        info!(plugins = self.plugins.len(), "plugins loaded");
        Ok(())
    }

    /// Create and initialize an order.
    ///
    /// An empty sending priority falls back to the configured one.
    pub async fn create_payment_order(&self, mut params: OrderParams) -> Result<PaymentOrder> {
        if params.sending_priority.is_empty() {
            params.sending_priority = self.config.sending_priority.clone();
        }
        let mut order = PaymentOrder::new(params, self.storage.clone(), self.transport.clone())?
            .with_window(self.config.recurring_window);
        order.init().await?;
        Ok(order)
    }

    /// Cancel an order and its payments that have not started.
    pub async fn cancel_order(&self, order_id: &str) -> Result<PaymentOrder> {
        let mut order = self.find_order(order_id).await?;
        order.cancel().await?;
        Ok(order)
    }

    /// Advance an order and submit its due payment.
    ///
    /// Running out of rails is reported through the notification callback,
    /// not as an error.
    pub async fn send_payment(&self, order_id: &str) -> Result<OrderProgress> {
        let mut order = self.find_order(order_id).await?;
        let progress = order.process().await?;
        if let OrderProgress::Dispatched(payment) = &progress {
            let sender = self.sender_for(payment.clone());
            match sender.clone().submit().await {
                Ok(()) | Err(PaymentError::NoPluginsAvailable) => {}
                Err(err) => return Err(err),
            }
            self.retire_if_final(&sender).await;
        }
        Ok(progress)
    }

    /// Publish this node's discovery document and return its URL.
    pub async fn receive_payments(&self) -> Result<String> {
        self.receiver.init().await
    }

    /// Route a rail message.
    ///
    /// Returns `{"url": ...}` for published endpoints, the stored payment for
    /// new incoming payments, and `null` for updates.
    pub async fn entry_point_for_plugin(&self, message: PluginMessage) -> Result<Value> {
        match message {
            PluginMessage::ReadyToReceive(payload) => {
                let url = self.receiver.create_payment_file(payload).await?;
                Ok(json!({ "url": url }))
            }
            PluginMessage::PaymentNew(payload) => {
                let record = self.receiver.handle_new_payment(payload, true).await?;
                Ok(serde_json::to_value(record)?)
            }
            PluginMessage::PaymentUpdate(update) => {
                let sender = match self.live_sender(&update.payment_id) {
                    Some(sender) => sender,
                    None => {
                        debug!(payment_id = %update.payment_id, "rebuilding sender from storage");
                        let payment = Payment::find(
                            &update.payment_id,
                            self.storage.clone(),
                            self.transport.clone(),
                        )
                        .await?;
                        self.sender_for(payment)
                    }
                };
                sender.clone().handle_state_update(update).await?;
                self.retire_if_final(&sender).await;
                Ok(Value::Null)
            }
        }
    }

    /// Stop every plugin. Returns the failures of plugins that did not stop
    /// cleanly.
    pub async fn shutdown(&self) -> Vec<SlashpayError> {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.plugins.stop_all().await
    }

    async fn find_order(&self, order_id: &str) -> Result<PaymentOrder> {
        Ok(
            PaymentOrder::find(order_id, self.storage.clone(), self.transport.clone())
                .await?
                .with_window(self.config.recurring_window),
        )
    }

    fn live_sender(&self, payment_id: &str) -> Option<Arc<PaymentSender>> {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(payment_id)
            .cloned()
    }

    /// Sender already driving `payment`, or a new registered one.
    fn sender_for(&self, payment: Payment) -> Arc<PaymentSender> {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders
            .entry(payment.id().to_string())
            .or_insert_with(|| {
                PaymentSender::new(payment, self.plugins.clone(), self.notify.clone())
            })
            .clone()
    }

    async fn retire_if_final(&self, sender: &Arc<PaymentSender>) {
        if sender.is_final().await {
            self.senders
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(sender.payment_id());
        }
    }
}
