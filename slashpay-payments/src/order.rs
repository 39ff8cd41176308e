//! Payment orders
//!
//! An order is the client-visible unit of intent. A one-time order owns a
//! single payment; a recurring order owns one payment per tick, spaced by
//! `frequency` milliseconds, from `first_payment_at` (or creation) to
//! `last_payment_at`. Recurring orders keep a window of generated payments
//! and generate the next window once every payment in the current one is
//! final. Bounded orders stop extending at `last_payment_at`.
//!
//! At most one payment of an order is in progress at a time.

use crate::amount::{AmountParams, PaymentAmount};
use crate::payment::{fetch_discovery, Payment, PaymentParams, PaymentRecord};
use crate::storage::{PaymentFilter, PaymentStorage};
use crate::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use slashpay_lib::{DiscoveryDocument, Transport};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

/// Payments generated per window for recurring orders.
pub const DEFAULT_RECURRING_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    OneTime,
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    #[default]
    Created,
    Initialized,
    Processing,
    Completed,
    Cancelled,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "CREATED",
            Self::Initialized => "INITIALIZED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// Stored form of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub client_order_id: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub state: OrderState,
    /// Milliseconds between recurring payments.
    pub frequency: u64,
    pub counterparty_url: String,
    #[serde(default)]
    pub memo: String,
    pub amount: PaymentAmount,
    pub sending_priority: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_payment_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_payment_at: Option<DateTime<Utc>>,
}

/// Input for a new order.
#[derive(Debug, Clone)]
pub struct OrderParams {
    pub client_order_id: String,
    pub order_type: OrderType,
    pub frequency: u64,
    pub counterparty_url: String,
    pub memo: String,
    pub amount: AmountParams,
    /// Empty means "use the node's configured priority".
    pub sending_priority: Vec<String>,
    pub first_payment_at: Option<DateTime<Utc>>,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl OrderParams {
    pub fn one_time(
        client_order_id: impl Into<String>,
        counterparty_url: impl Into<String>,
        amount: AmountParams,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            order_type: OrderType::OneTime,
            frequency: 0,
            counterparty_url: counterparty_url.into(),
            memo: String::new(),
            amount,
            sending_priority: Vec::new(),
            first_payment_at: None,
            last_payment_at: None,
        }
    }

    /// Recurring order paying every `frequency_ms` milliseconds.
    pub fn recurring(
        client_order_id: impl Into<String>,
        counterparty_url: impl Into<String>,
        amount: AmountParams,
        frequency_ms: u64,
    ) -> Self {
        Self {
            order_type: OrderType::Recurring,
            frequency: frequency_ms,
            ..Self::one_time(client_order_id, counterparty_url, amount)
        }
    }

    pub fn with_sending_priority<I, S>(mut self, priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sending_priority = priority.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn with_schedule(
        mut self,
        first_payment_at: Option<DateTime<Utc>>,
        last_payment_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.first_payment_at = first_payment_at;
        self.last_payment_at = last_payment_at;
        self
    }
}

/// Result of [`PaymentOrder::process`].
#[derive(Debug)]
pub enum OrderProgress {
    /// This payment is due; hand it to a [`PaymentSender`](crate::PaymentSender).
    Dispatched(Payment),
    /// Nothing is due before the given time.
    Waiting(DateTime<Utc>),
    /// Every payment is final and the order is completed.
    Completed,
}

/// Order bound to its storage and transport.
pub struct PaymentOrder {
    record: OrderRecord,
    payments: Vec<Payment>,
    storage: Arc<dyn PaymentStorage>,
    transport: Arc<dyn Transport>,
    window: usize,
    span: Span,
}

impl PaymentOrder {
    /// Validate `params` and build an unsaved order.
    pub fn new(
        params: OrderParams,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if params.client_order_id.trim().is_empty() {
            return Err(PaymentError::validation("clientOrderId", "is required"));
        }
        if params.counterparty_url.trim().is_empty() {
            return Err(PaymentError::validation("counterpartyUrl", "is required"));
        }
        let amount = PaymentAmount::new(params.amount)?;
        let now = Utc::now();

        if params.order_type == OrderType::Recurring {
            if params.frequency == 0 {
                return Err(PaymentError::validation(
                    "frequency",
                    "recurring orders need a positive frequency",
                ));
            }
            let start = params.first_payment_at.unwrap_or(now);
            if params.last_payment_at.is_some_and(|last| last < start) {
                return Err(PaymentError::validation(
                    "lastPaymentAt",
                    "must not precede the first payment",
                ));
            }
        }
        i64::try_from(params.frequency)
            .map_err(|_| PaymentError::validation("frequency", "out of range"))?;

        let record = OrderRecord {
            id: uuid::Uuid::new_v4().to_string(),
            client_order_id: params.client_order_id,
            order_type: params.order_type,
            state: OrderState::Created,
            frequency: params.frequency,
            counterparty_url: params.counterparty_url,
            memo: params.memo,
            amount,
            sending_priority: params.sending_priority,
            created_at: now,
            first_payment_at: params.first_payment_at,
            last_payment_at: params.last_payment_at,
        };
        Ok(Self::from_record(record, Vec::new(), storage, transport))
    }

    fn from_record(
        record: OrderRecord,
        payments: Vec<Payment>,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let span = tracing::info_span!(
            "order",
            id = %record.id,
            client_order_id = %record.client_order_id
        );
        Self {
            record,
            payments,
            storage,
            transport,
            window: DEFAULT_RECURRING_WINDOW,
            span,
        }
    }

    /// Load an order and its payments.
    pub async fn find(
        id: &str,
        storage: Arc<dyn PaymentStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let record = storage
            .get_order(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("order", id))?;
        let mut order = Self::from_record(record, Vec::new(), storage, transport);
        order.reload_payments().await?;
        Ok(order)
    }

    /// Number of payments generated at a time for recurring orders.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Log under `span` instead of the span derived at construction.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    pub fn state(&self) -> OrderState {
        self.record.state
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn can_process(&self) -> bool {
        matches!(
            self.record.state,
            OrderState::Initialized | OrderState::Processing
        )
    }

    /// Generate the order's payments and persist everything as one unit.
    pub async fn init(&mut self) -> Result<()> {
        if self.record.state != OrderState::Created {
            return Err(PaymentError::InvalidState(self.record.state.to_string()));
        }
        if !self.storage.is_ready() {
            return Err(PaymentError::NotReady);
        }
        let document = fetch_discovery(self.transport.as_ref(), &self.record.counterparty_url).await?;

        let start = self.record.first_payment_at.unwrap_or(self.record.created_at);
        let payments = self.generate(&document, start)?;

        let mut next = self.record.clone();
        next.state = OrderState::Initialized;
        let records: Vec<PaymentRecord> = payments.iter().map(|p| p.record().clone()).collect();
        self.storage.save_order(&next, &records).await?;

        self.record = next;
        self.payments = payments;
        info!(parent: &self.span, payments = self.payments.len(), "order initialized");
        Ok(())
    }

    /// Pick the payment to work on next.
    ///
    /// Payments are reloaded from storage first, so progress made through a
    /// [`PaymentSender`](crate::PaymentSender) is always seen.
    pub async fn process(&mut self) -> Result<OrderProgress> {
        if !self.can_process() {
            return Err(PaymentError::InvalidState(self.record.state.to_string()));
        }
        self.reload_payments().await?;

        if let Some(payment) = self.payments.iter().find(|p| p.is_in_progress()).cloned() {
            return self.process_payment(payment).await;
        }

        if !self.payments.iter().any(|p| !p.is_final())
            && self.record.order_type == OrderType::Recurring
        {
            self.extend_window().await?;
        }

        let next = self.payments.iter().find(|p| !p.is_final()).cloned();
        match next {
            Some(payment) if payment.execute_at() <= Utc::now() => self.process_payment(payment).await,
            Some(payment) => Ok(OrderProgress::Waiting(payment.execute_at())),
            None => {
                self.complete().await?;
                Ok(OrderProgress::Completed)
            }
        }
    }

    async fn process_payment(&mut self, payment: Payment) -> Result<OrderProgress> {
        if self.record.state == OrderState::Initialized {
            self.set_state(OrderState::Processing).await?;
        }
        debug!(parent: &self.span, payment_id = %payment.id(), "payment dispatched");
        Ok(OrderProgress::Dispatched(payment))
    }

    /// Mark the order completed once every payment is final.
    pub async fn complete(&mut self) -> Result<()> {
        match self.record.state {
            OrderState::Cancelled => return Err(PaymentError::OrderCancelled),
            OrderState::Completed => return Err(PaymentError::OrderCompleted),
            OrderState::Created => {
                return Err(PaymentError::InvalidState(self.record.state.to_string()))
            }
            OrderState::Initialized | OrderState::Processing => {}
        }
        self.reload_payments().await?;
        if self.payments.iter().any(|p| !p.is_final()) {
            return Err(PaymentError::OutstandingPayments);
        }
        self.set_state(OrderState::Completed).await?;
        info!(parent: &self.span, "order completed");
        Ok(())
    }

    /// Cancel every payment not yet started, then the order.
    ///
    /// Payments that cannot be cancelled (already in progress) are logged and
    /// skipped. An order that was never initialized has nothing stored and is
    /// cancelled in place.
    pub async fn cancel(&mut self) -> Result<()> {
        match self.record.state {
            OrderState::Created => {
                self.record.state = OrderState::Cancelled;
                info!(parent: &self.span, "order cancelled before init");
                return Ok(());
            }
            OrderState::Initialized | OrderState::Processing => {}
            OrderState::Completed | OrderState::Cancelled => {
                return Err(PaymentError::InvalidState(self.record.state.to_string()))
            }
        }
        self.reload_payments().await?;
        let span = self.span.clone();
        for payment in self.payments.iter_mut().filter(|p| !p.is_final()) {
            if let Err(err) = payment.cancel().await {
                warn!(parent: &span, payment_id = %payment.id(), "cannot cancel payment: {err}");
            }
        }
        self.set_state(OrderState::Cancelled).await?;
        info!(parent: &self.span, "order cancelled");
        Ok(())
    }

    async fn set_state(&mut self, state: OrderState) -> Result<()> {
        if !self.storage.is_ready() {
            return Err(PaymentError::NotReady);
        }
        let mut next = self.record.clone();
        next.state = state;
        self.storage.update_order(&next).await?;
        self.record = next;
        Ok(())
    }

    async fn reload_payments(&mut self) -> Result<()> {
        let records = self
            .storage
            .get_payments(PaymentFilter::for_order(&self.record.id))
            .await?;
        self.payments = records
            .into_iter()
            .map(|record| Payment::from_record(record, self.storage.clone(), self.transport.clone()))
            .collect();
        Ok(())
    }

    async fn extend_window(&mut self) -> Result<()> {
        let start = match self.payments.last() {
            Some(last) => last
                .execute_at()
                .checked_add_signed(self.interval())
                .ok_or_else(|| PaymentError::validation("frequency", "schedule overflows"))?,
            None => self.record.first_payment_at.unwrap_or(self.record.created_at),
        };
        if self.record.last_payment_at.is_some_and(|last| start > last) {
            return Ok(());
        }
        let document = fetch_discovery(self.transport.as_ref(), &self.record.counterparty_url).await?;
        let generated = self.generate(&document, start)?;
        let records: Vec<PaymentRecord> = generated.iter().map(|p| p.record().clone()).collect();
        self.storage.save_payments(&records).await?;
        info!(parent: &self.span, payments = records.len(), "recurring window extended");
        self.payments.extend(generated);
        Ok(())
    }

    fn interval(&self) -> Duration {
        // Bounded to i64 at construction
        Duration::milliseconds(i64::try_from(self.record.frequency).unwrap_or(i64::MAX))
    }

    fn schedule(&self, start: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        match self.record.order_type {
            OrderType::OneTime => vec![start],
            OrderType::Recurring => {
                let interval = self.interval();
                let mut ticks = Vec::new();
                let mut at = start;
                loop {
                    if ticks.len() >= self.window
                        || self.record.last_payment_at.is_some_and(|last| at > last)
                    {
                        break;
                    }
                    ticks.push(at);
                    match at.checked_add_signed(interval) {
                        Some(next) => at = next,
                        None => break,
                    }
                }
                ticks
            }
        }
    }

    fn generate(&self, document: &DiscoveryDocument, start: DateTime<Utc>) -> Result<Vec<Payment>> {
        self.schedule(start)
            .into_iter()
            .map(|execute_at| {
                let params = PaymentParams::outgoing(
                    &self.record.id,
                    &self.record.client_order_id,
                    &self.record.counterparty_url,
                    self.record.amount.serialize(),
                )
                .with_memo(&self.record.memo)
                .with_sending_priority(self.record.sending_priority.clone())
                .with_execute_at(execute_at);
                let mut payment = Payment::new(params, self.storage.clone(), self.transport.clone())?;
                payment.apply_discovery(document)?;
                Ok(payment)
            })
            .collect()
    }
}
