//! Host notifications
//!
//! The host learns about asynchronous outcomes only through its
//! [`NotificationCallback`]; there is no polling API.

use crate::payment::PaymentRecord;
use slashpay_lib::plugins::PluginStateUpdate;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PaymentNotification {
    /// A rail reported progress on an outgoing payment.
    PluginUpdate(PluginStateUpdate),
    /// An outgoing payment was delivered.
    PaymentCompleted(PaymentRecord),
    /// Every rail failed for an outgoing payment.
    PaymentFailed(PaymentRecord),
    /// A rail reported an incoming payment.
    PaymentReceived(PaymentRecord),
    /// An asynchronous step failed with no caller to return the error to.
    Error {
        payment_id: Option<String>,
        message: String,
    },
}

impl PaymentNotification {
    pub fn payment_id(&self) -> Option<&str> {
        match self {
            Self::PluginUpdate(update) => Some(&update.payment_id),
            Self::PaymentCompleted(p) | Self::PaymentFailed(p) | Self::PaymentReceived(p) => {
                Some(&p.id)
            }
            Self::Error { payment_id, .. } => payment_id.as_deref(),
        }
    }
}

pub type NotificationCallback = Arc<dyn Fn(PaymentNotification) + Send + Sync>;

/// Callback that drops every notification.
pub fn ignore_notifications() -> NotificationCallback {
    Arc::new(|_: PaymentNotification| {})
}
