//! Receiving side: advertise rails and record what they deliver.

use crate::amount::AmountParams;
use crate::notification::{NotificationCallback, PaymentNotification};
use crate::payment::{Payment, PaymentParams, PaymentRecord};
use crate::state::PluginAttempt;
use crate::storage::PaymentStorage;
use crate::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use slashpay_lib::discovery::endpoint_path;
use slashpay_lib::plugins::{events, PluginManager, PluginStateUpdate, PluginUpdateState};
use slashpay_lib::{CreateOptions, DiscoveryDocument, SlashpayError, Transport, DISCOVERY_PATH};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A rail asking to publish its endpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverPayload {
    pub plugin_name: String,
    /// Rail-specific endpoint content (address, invoice, ...).
    pub data: Value,
    /// Set for endpoints bound to one amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<AmountParams>,
}

/// A rail reporting a payment it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPaymentPayload {
    pub plugin_name: String,
    pub amount: AmountParams,
    #[serde(default)]
    pub memo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Defaults to the time the report is handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl NewPaymentPayload {
    pub fn new(plugin_name: impl Into<String>, amount: AmountParams) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            amount,
            memo: String::new(),
            client_order_id: None,
            data: Value::Null,
            received_at: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }
}

pub struct PaymentReceiver {
    plugins: Arc<PluginManager>,
    storage: Arc<dyn PaymentStorage>,
    transport: Arc<dyn Transport>,
    notify: NotificationCallback,
    discovery_path: String,
    ready: AtomicBool,
}

impl PaymentReceiver {
    pub fn new(
        plugins: Arc<PluginManager>,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
        notify: NotificationCallback,
    ) -> Self {
        Self {
            plugins,
            storage,
            transport,
            notify,
            discovery_path: DISCOVERY_PATH.to_string(),
            ready: AtomicBool::new(false),
        }
    }

    /// Publish the discovery document somewhere other than [`DISCOVERY_PATH`].
    pub fn with_discovery_path(mut self, path: impl Into<String>) -> Self {
        self.discovery_path = path.into();
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Publish the discovery document for every active receiving rail, then
    /// ask the rails to publish their own endpoints.
    ///
    /// Returns the URL of the discovery document. Rails whose
    /// `receivePayment` handler fails are logged and skipped.
    pub async fn init(&self) -> Result<String> {
        let rails: Vec<String> = self
            .plugins
            .active_payment_plugins()
            .into_iter()
            .filter(|m| m.listens_to(events::RECEIVE_PAYMENT) || m.listens_to(events::WATCH))
            .map(|m| m.name)
            .collect();
        let document = DiscoveryDocument::for_plugins(&rails);
        let url = self.publish(&self.discovery_path, &document.to_value()?).await?;
        info!(%url, ?rails, "discovery document published");

        let report = self
            .plugins
            .dispatch_event(events::RECEIVE_PAYMENT, json!({ "discoveryUrl": url }))
            .await;
        for err in &report.failed {
            warn!("rail did not publish its endpoint: {err}");
        }

        self.ready.store(true, Ordering::SeqCst);
        Ok(url)
    }

    /// Write a rail's endpoint file at its public path.
    ///
    /// Endpoints bound to an amount are refused until they can be stored
    /// encrypted.
    pub async fn create_payment_file(&self, payload: ReceiverPayload) -> Result<String> {
        if payload.amount.is_some() {
            return Err(SlashpayError::Unimplemented("amount-bound payment endpoints").into());
        }
        if payload.plugin_name.trim().is_empty() {
            return Err(PaymentError::validation("pluginName", "is required"));
        }
        let path = endpoint_path(&payload.plugin_name);
        let url = self.publish(&path, &payload.data).await?;
        info!(plugin = %payload.plugin_name, %url, "endpoint published");
        Ok(url)
    }

    /// Record a payment a rail received and tell the host.
    ///
    /// With `regenerate` the discovery document is published again, which
    /// lets rails rotate single-use endpoints. Once the payment is saved the
    /// host is always notified; later failures are only logged.
    pub async fn handle_new_payment(
        &self,
        payload: NewPaymentPayload,
        regenerate: bool,
    ) -> Result<PaymentRecord> {
        let received_at = payload.received_at.unwrap_or_else(Utc::now);
        let attempt = PluginAttempt::Success {
            name: payload.plugin_name.clone(),
            start_at: received_at,
            end_at: received_at,
        };
        let order_id = uuid::Uuid::new_v4().to_string();
        let client_order_id = payload
            .client_order_id
            .clone()
            .unwrap_or_else(|| order_id.clone());
        let params = PaymentParams::incoming(order_id, client_order_id, payload.amount, attempt)
            .with_memo(payload.memo)
            .with_execute_at(received_at);

        let mut payment = Payment::new(params, self.storage.clone(), self.transport.clone())?;
        payment.save().await?;
        let update =
            PluginStateUpdate::new(payment.id(), payload.plugin_name, PluginUpdateState::Success)
                .with_data(payload.data);
        if let Err(err) = payment.record_plugin_update(update).await {
            warn!(parent: payment.span(), "cannot store rail data: {err}");
        }
        info!(parent: payment.span(), "incoming payment recorded");

        if regenerate {
            if let Err(err) = self.init().await {
                warn!(parent: payment.span(), "discovery not regenerated: {err}");
            }
        }

        let record = payment.record().clone();
        (self.notify)(PaymentNotification::PaymentReceived(record.clone()));
        Ok(record)
    }

    async fn publish(&self, path: &str, value: &Value) -> Result<String> {
        if self.transport.read_local(path).await?.is_some() {
            self.transport.update(path, value).await?;
            return Ok(format!("{}{}", self.transport.get_url(), path));
        }
        Ok(self
            .transport
            .create(path, value, CreateOptions::awaiting_relay())
            .await?)
    }
}
