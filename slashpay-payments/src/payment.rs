//! A single payment and its persistence.

use crate::amount::{AmountParams, PaymentAmount};
use crate::state::{PaymentState, PaymentStatus, PluginAttempt, ProcessOutcome};
use crate::storage::PaymentStorage;
use crate::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slashpay_lib::plugins::PluginStateUpdate;
use slashpay_lib::{DiscoveryDocument, Transport, DISCOVERY_PATH};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentDirection {
    In,
    Out,
}

impl fmt::Display for PaymentDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("IN"),
            Self::Out => f.write_str("OUT"),
        }
    }
}

/// Stored form of a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub order_id: String,
    pub client_order_id: String,
    pub direction: PaymentDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_url: Option<String>,
    #[serde(default)]
    pub memo: String,
    pub amount: PaymentAmount,
    #[serde(default)]
    pub sending_priority: Vec<String>,
    pub internal_state: PaymentState,
    /// Most recent report of the rail handling this payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_update: Option<PluginStateUpdate>,
    pub created_at: DateTime<Utc>,
    pub execute_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Check the direction-specific fields of a record.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PaymentError::validation("id", "is required"));
        }
        if self.order_id.trim().is_empty() {
            return Err(PaymentError::validation("orderId", "is required"));
        }
        if self.client_order_id.trim().is_empty() {
            return Err(PaymentError::validation("clientOrderId", "is required"));
        }
        match self.direction {
            PaymentDirection::Out => {
                if self.counterparty_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(PaymentError::validation("counterpartyUrl", "is required"));
                }
            }
            PaymentDirection::In => {
                let attempt = self
                    .internal_state
                    .completed_by_plugin()
                    .ok_or_else(|| PaymentError::validation("completedByPlugin", "is required"))?;
                if attempt.name().trim().is_empty() {
                    return Err(PaymentError::validation(
                        "completedByPlugin",
                        "name is required",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Input for a new payment.
#[derive(Debug, Clone)]
pub struct PaymentParams {
    /// Generated when absent.
    pub id: Option<String>,
    pub order_id: String,
    pub client_order_id: String,
    pub direction: PaymentDirection,
    pub counterparty_url: Option<String>,
    pub memo: String,
    pub amount: AmountParams,
    pub sending_priority: Vec<String>,
    /// Defaults to creation time.
    pub execute_at: Option<DateTime<Utc>>,
    /// Required for incoming payments.
    pub completed_by_plugin: Option<PluginAttempt>,
}

impl PaymentParams {
    /// Outgoing payment to `counterparty_url`.
    pub fn outgoing(
        order_id: impl Into<String>,
        client_order_id: impl Into<String>,
        counterparty_url: impl Into<String>,
        amount: AmountParams,
    ) -> Self {
        Self {
            id: None,
            order_id: order_id.into(),
            client_order_id: client_order_id.into(),
            direction: PaymentDirection::Out,
            counterparty_url: Some(counterparty_url.into()),
            memo: String::new(),
            amount,
            sending_priority: Vec::new(),
            execute_at: None,
            completed_by_plugin: None,
        }
    }

    /// Incoming payment already delivered by `attempt`.
    pub fn incoming(
        order_id: impl Into<String>,
        client_order_id: impl Into<String>,
        amount: AmountParams,
        attempt: PluginAttempt,
    ) -> Self {
        Self {
            id: None,
            order_id: order_id.into(),
            client_order_id: client_order_id.into(),
            direction: PaymentDirection::In,
            counterparty_url: None,
            memo: String::new(),
            amount,
            sending_priority: Vec::new(),
            execute_at: None,
            completed_by_plugin: Some(attempt),
        }
    }

    pub fn with_sending_priority(mut self, priority: Vec<String>) -> Self {
        self.sending_priority = priority;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn with_execute_at(mut self, execute_at: DateTime<Utc>) -> Self {
        self.execute_at = Some(execute_at);
        self
    }
}

/// A payment bound to its storage and transport.
///
/// All state-changing calls persist through [`PaymentStorage::update_payment`]
/// before the in-memory record changes.
#[derive(Clone)]
pub struct Payment {
    record: PaymentRecord,
    storage: Arc<dyn PaymentStorage>,
    transport: Arc<dyn Transport>,
    span: Span,
}

impl fmt::Debug for Payment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payment").field("record", &self.record).finish()
    }
}

impl Payment {
    /// Validate `params` and build an unsaved payment.
    ///
    /// Checks run in order: order id, client order id, amount, then the
    /// direction-specific fields.
    pub fn new(
        params: PaymentParams,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if params.order_id.trim().is_empty() {
            return Err(PaymentError::validation("orderId", "is required"));
        }
        if params.client_order_id.trim().is_empty() {
            return Err(PaymentError::validation("clientOrderId", "is required"));
        }
        let amount = PaymentAmount::new(params.amount)?;

        let internal_state = match (params.direction, params.completed_by_plugin) {
            (PaymentDirection::In, Some(attempt)) => PaymentState::completed_by(attempt),
            _ => PaymentState::new(),
        };
        let now = Utc::now();
        let record = PaymentRecord {
            id: params
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            order_id: params.order_id,
            client_order_id: params.client_order_id,
            direction: params.direction,
            counterparty_url: params.counterparty_url,
            memo: params.memo,
            amount,
            sending_priority: params.sending_priority,
            internal_state,
            plugin_update: None,
            created_at: now,
            execute_at: params.execute_at.unwrap_or(now),
        };
        record.validate()?;
        Ok(Self::from_record(record, storage, transport))
    }

    /// Wrap a stored record.
    pub fn from_record(
        record: PaymentRecord,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let span = tracing::info_span!("payment", id = %record.id, order_id = %record.order_id);
        Self {
            record,
            storage,
            transport,
            span,
        }
    }

    /// Load a payment by id.
    pub async fn find(
        id: &str,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let record = storage
            .get_payment(id, false)
            .await?
            .ok_or_else(|| PaymentError::not_found("payment", id))?;
        Ok(Self::from_record(record, storage, transport))
    }

    /// Log under `span` instead of the span derived at construction.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn order_id(&self) -> &str {
        &self.record.order_id
    }

    pub fn direction(&self) -> PaymentDirection {
        self.record.direction
    }

    pub fn record(&self) -> &PaymentRecord {
        &self.record
    }

    pub fn state(&self) -> &PaymentState {
        &self.record.internal_state
    }

    pub fn status(&self) -> PaymentStatus {
        self.record.internal_state.status()
    }

    pub fn execute_at(&self) -> DateTime<Utc> {
        self.record.execute_at
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn current_plugin(&self) -> Option<&PluginAttempt> {
        self.record.internal_state.current_plugin()
    }

    pub fn is_in_progress(&self) -> bool {
        self.record.internal_state.is_in_progress()
    }

    pub fn is_final(&self) -> bool {
        self.record.internal_state.is_final()
    }

    pub fn is_failed(&self) -> bool {
        self.record.internal_state.is_failed()
    }

    /// JSON form handed to rail plugins.
    pub fn serialize(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.record)?)
    }

    /// Fetch the counterparty's discovery document and queue the rails both
    /// sides support.
    pub async fn init(&mut self) -> Result<()> {
        let url = self
            .record
            .counterparty_url
            .clone()
            .ok_or_else(|| PaymentError::validation("counterpartyUrl", "is required"))?;
        let document = fetch_discovery(self.transport.as_ref(), &url).await?;
        self.apply_discovery(&document)
    }

    /// Queue the rails of `document` that appear in the sending priority,
    /// keeping the priority order.
    pub fn apply_discovery(&mut self, document: &DiscoveryDocument) -> Result<()> {
        let matching = document.matching_plugins(&self.record.sending_priority);
        if matching.is_empty() {
            return Err(PaymentError::NoMatchingPlugins);
        }
        debug!(parent: &self.span, rails = ?matching, "rails queued");
        self.record.internal_state.assign_pending_plugins(matching)
    }

    /// Persist a new payment.
    pub async fn save(&self) -> Result<()> {
        if !self.storage.is_ready() {
            return Err(PaymentError::NotReady);
        }
        if self.storage.get_payment(&self.record.id, true).await?.is_some() {
            return Err(PaymentError::AlreadyExists(self.record.id.clone()));
        }
        self.record.validate()?;
        self.storage.save_payment(&self.record).await?;
        info!(parent: &self.span, direction = %self.record.direction, "payment saved");
        Ok(())
    }

    /// Persist the current record.
    pub async fn update(&self) -> Result<()> {
        if !self.storage.is_ready() {
            return Err(PaymentError::NotReady);
        }
        self.storage.update_payment(&self.record).await
    }

    /// Soft-delete the payment. `force` (physical removal) is always refused.
    pub async fn delete(&self, force: bool) -> Result<()> {
        if force {
            return Err(PaymentError::HardDeleteForbidden);
        }
        if !self.storage.is_ready() {
            return Err(PaymentError::NotReady);
        }
        self.storage.delete_payment(&self.record.id).await
    }

    pub async fn process(&mut self) -> Result<ProcessOutcome> {
        let outcome = self
            .transition(|record, now| record.internal_state.process(now))
            .await?;
        debug!(parent: &self.span, ?outcome, "payment processed");
        Ok(outcome)
    }

    pub async fn try_next(&mut self) -> Result<bool> {
        self.transition(|record, now| record.internal_state.try_next(now))
            .await
    }

    pub async fn fail_current_plugin(&mut self) -> Result<()> {
        self.transition(|record, now| record.internal_state.fail_current_plugin(now))
            .await?;
        debug!(parent: &self.span, "current rail failed");
        Ok(())
    }

    pub async fn fail(&mut self) -> Result<()> {
        self.transition(|record, now| record.internal_state.fail(now))
            .await?;
        info!(parent: &self.span, "payment failed");
        Ok(())
    }

    pub async fn complete(&mut self) -> Result<()> {
        self.transition(|record, now| record.internal_state.complete(now))
            .await?;
        info!(parent: &self.span, "payment completed");
        Ok(())
    }

    pub async fn cancel(&mut self) -> Result<()> {
        self.transition(|record, _| record.internal_state.cancel())
            .await?;
        info!(parent: &self.span, "payment cancelled");
        Ok(())
    }

    /// Store the latest rail report on the payment.
    pub async fn record_plugin_update(&mut self, update: PluginStateUpdate) -> Result<()> {
        self.transition(move |record, _| {
            record.plugin_update = Some(update);
            Ok(())
        })
        .await
    }

    async fn transition<T, F>(&mut self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut PaymentRecord, DateTime<Utc>) -> Result<T>,
    {
        if !self.storage.is_ready() {
            return Err(PaymentError::NotReady);
        }
        let mut next = self.record.clone();
        let out = apply(&mut next, Utc::now())?;
        self.storage.update_payment(&next).await?;
        self.record = next;
        Ok(out)
    }
}

/// Read and parse the discovery document published at `url`.
pub(crate) async fn fetch_discovery(transport: &dyn Transport, url: &str) -> Result<DiscoveryDocument> {
    let value = transport
        .read_remote(url, DISCOVERY_PATH)
        .await?
        .ok_or_else(|| PaymentError::PaymentFileNotFound(url.to_string()))?;
    Ok(DiscoveryDocument::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPaymentStorage;
    use slashpay_lib::{CreateOptions, MemoryNetwork, MemoryTransport};

    async fn counterparty(network: &MemoryNetwork, rails: &[&str]) -> String {
        let node = network.transport();
        let doc = DiscoveryDocument::for_plugins(rails);
        node.create(DISCOVERY_PATH, &doc.to_value().unwrap(), CreateOptions::default())
            .await
            .unwrap();
        node.get_url()
    }

    fn outgoing(url: &str, priority: &[&str]) -> PaymentParams {
        PaymentParams::outgoing("order-1", "client-1", url, AmountParams::new("1000"))
            .with_sending_priority(priority.iter().map(|s| s.to_string()).collect())
    }

    fn setup() -> (MemoryNetwork, Arc<MemoryPaymentStorage>, Arc<MemoryTransport>) {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.transport());
        (network, Arc::new(MemoryPaymentStorage::new()), transport)
    }

    #[tokio::test]
    async fn test_validation_order() {
        let (_, storage, transport) = setup();
        let mut params = outgoing("slash:bob", &["p2sh"]);
        params.order_id = String::new();
        params.amount = AmountParams::new("0");
        let err = Payment::new(params, storage.clone(), transport.clone()).unwrap_err();
        assert!(matches!(err, PaymentError::Validation { ref field, .. } if field == "orderId"));

        let mut params = outgoing("slash:bob", &["p2sh"]);
        params.counterparty_url = None;
        params.amount = AmountParams::new("0");
        let err = Payment::new(params, storage.clone(), transport.clone()).unwrap_err();
        assert!(matches!(err, PaymentError::Validation { ref field, .. } if field == "amount"));

        let mut params = outgoing("slash:bob", &["p2sh"]);
        params.counterparty_url = None;
        let err = Payment::new(params, storage.clone(), transport.clone()).unwrap_err();
        assert!(matches!(err, PaymentError::Validation { ref field, .. } if field == "counterpartyUrl"));

        let mut params = outgoing("slash:bob", &["p2sh"]);
        params.direction = PaymentDirection::In;
        let err = Payment::new(params, storage, transport).unwrap_err();
        assert!(matches!(err, PaymentError::Validation { ref field, .. } if field == "completedByPlugin"));
    }

    #[tokio::test]
    async fn test_init_intersects_in_priority_order() {
        let (network, storage, transport) = setup();
        let url = counterparty(&network, &["p2tr", "lightning", "p2sh"]).await;

        let mut payment =
            Payment::new(outgoing(&url, &["p2sh", "onchain", "p2tr"]), storage, transport).unwrap();
        payment.init().await.unwrap();
        assert_eq!(
            payment.state().pending_plugins(),
            &["p2sh".to_string(), "p2tr".to_string()]
        );
    }

    #[tokio::test]
    async fn test_init_errors() {
        let (network, storage, transport) = setup();

        let mut payment = Payment::new(
            outgoing("slash:nobody", &["p2sh"]),
            storage.clone(),
            transport.clone(),
        )
        .unwrap();
        assert!(matches!(
            payment.init().await,
            Err(PaymentError::PaymentFileNotFound(_))
        ));

        let url = counterparty(&network, &["lightning"]).await;
        let mut payment = Payment::new(outgoing(&url, &["p2sh"]), storage, transport).unwrap();
        assert!(matches!(
            payment.init().await,
            Err(PaymentError::NoMatchingPlugins)
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_existing_id_even_when_removed() {
        let (_, storage, transport) = setup();
        let payment = Payment::new(outgoing("slash:bob", &["p2sh"]), storage.clone(), transport.clone())
            .unwrap();
        payment.save().await.unwrap();
        assert!(matches!(payment.save().await, Err(PaymentError::AlreadyExists(_))));

        payment.delete(false).await.unwrap();
        assert!(matches!(payment.save().await, Err(PaymentError::AlreadyExists(_))));
        assert!(matches!(payment.delete(true).await, Err(PaymentError::HardDeleteForbidden)));

        assert!(storage.get_payment(payment.id(), false).await.unwrap().is_none());
        assert!(storage.get_payment(payment.id(), true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transitions_persist() {
        let (network, storage, transport) = setup();
        let url = counterparty(&network, &["p2sh", "p2tr"]).await;
        let mut payment =
            Payment::new(outgoing(&url, &["p2sh", "p2tr"]), storage.clone(), transport.clone())
                .unwrap();
        payment.init().await.unwrap();
        payment.save().await.unwrap();

        payment.process().await.unwrap();
        let stored = Payment::find(payment.id(), storage.clone(), transport.clone())
            .await
            .unwrap();
        assert_eq!(stored.current_plugin().unwrap().name(), "p2sh");
        assert!(stored.is_in_progress());
    }

    #[tokio::test]
    async fn test_not_ready_storage_blocks_transitions() {
        let (network, storage, transport) = setup();
        let url = counterparty(&network, &["p2sh"]).await;
        let mut payment =
            Payment::new(outgoing(&url, &["p2sh"]), storage.clone(), transport).unwrap();
        payment.init().await.unwrap();
        payment.save().await.unwrap();

        storage.set_ready(false);
        assert!(matches!(payment.process().await, Err(PaymentError::NotReady)));
        assert!(payment.state().is_initial());
    }

    #[tokio::test]
    async fn test_failed_write_does_not_advance_state() {
        let (network, storage, transport) = setup();
        let url = counterparty(&network, &["p2sh"]).await;
        let mut payment = Payment::new(outgoing(&url, &["p2sh"]), storage, transport).unwrap();
        payment.init().await.unwrap();

        // Never saved, so the update has nothing to replace
        assert!(matches!(
            payment.process().await,
            Err(PaymentError::NotFound { .. })
        ));
        assert!(payment.state().is_initial());
    }
}
