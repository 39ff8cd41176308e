//! # Slashpay Payments
//!
//! Payment and order state machine on top of the rail plugins of
//! `slashpay-lib`.
//!
//! - [`PaymentAmount`]: validated `{amount, currency, denomination}` triple
//! - [`PaymentState`]: attempt bookkeeping and rail fallback ordering
//! - [`Payment`]: one transfer, persisted on every transition
//! - [`PaymentOrder`]: one-time or recurring group of payments
//! - [`PaymentSender`] / [`PaymentReceiver`]: drive rails for outgoing payments
//!   and turn plugin reports into incoming ones
//! - [`PaymentManager`]: facade wiring configuration, storage, transport and
//!   plugins together
//!
//! Every state transition is computed on a copy of the record, persisted, and
//! only then committed to the in-memory object, so a failed write never leaves
//! a payment ahead of its stored state.

pub mod amount;
pub mod manager;
pub mod notification;
pub mod order;
pub mod payment;
pub mod receiver;
pub mod sender;
pub mod state;
pub mod storage;

pub use amount::{AmountParams, Currency, Denomination, PaymentAmount};
pub use manager::{PaymentManager, PluginMessage};
pub use notification::{ignore_notifications, NotificationCallback, PaymentNotification};
pub use order::{OrderParams, OrderProgress, OrderRecord, OrderState, OrderType, PaymentOrder};
pub use payment::{Payment, PaymentDirection, PaymentParams, PaymentRecord};
pub use receiver::{NewPaymentPayload, PaymentReceiver, ReceiverPayload};
pub use sender::PaymentSender;
pub use state::{PaymentState, PaymentStatus, PluginAttempt, ProcessOutcome};
pub use storage::{FilePaymentStorage, MemoryPaymentStorage, PaymentFilter, PaymentStorage};

use slashpay_lib::SlashpayError;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(thiserror::Error, Debug)]
pub enum PaymentError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("storage is not ready")]
    NotReady,
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("payment file not found at {0}")]
    PaymentFileNotFound(String),
    #[error("no plugins in common with the counterparty")]
    NoMatchingPlugins,
    #[error("no plugins left to try")]
    NoPluginsAvailable,
    #[error("order has outstanding payments")]
    OutstandingPayments,
    #[error("order is cancelled")]
    OrderCancelled,
    #[error("order is completed")]
    OrderCompleted,
    #[error("hard delete is forbidden")]
    HardDeleteForbidden,
    #[error("{resource_type} not found: {identifier}")]
    NotFound {
        resource_type: String,
        identifier: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Core(#[from] SlashpayError),
}

impl PaymentError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
