//! Payment and order state machine scenarios.

mod common;

use chrono::{Duration, Utc};
use slashpay_lib::{MemoryNetwork, Transport};
use slashpay_payments::{
    AmountParams, MemoryPaymentStorage, OrderParams, OrderProgress, OrderState, Payment,
    PaymentError, PaymentOrder, PaymentParams, PaymentStatus, PaymentStorage, ProcessOutcome,
};
use std::sync::Arc;

async fn two_rail_payment() -> (Payment, Arc<MemoryPaymentStorage>) {
    let network = MemoryNetwork::new();
    let bob = common::counterparty(&network, &["p2sh", "p2tr"]).await;
    let storage = Arc::new(MemoryPaymentStorage::new());
    let transport: Arc<dyn Transport> = Arc::new(network.transport());

    let params = PaymentParams::outgoing("order-1", "invoice-1", bob.get_url(), AmountParams::new("5000"))
        .with_sending_priority(vec!["p2sh".to_string(), "p2tr".to_string()]);
    let mut payment = Payment::new(params, storage.clone(), transport).unwrap();
    payment.init().await.unwrap();
    payment.save().await.unwrap();
    (payment, storage)
}

#[tokio::test]
async fn test_fallback_until_every_rail_failed() {
    let (mut payment, storage) = two_rail_payment().await;

    assert_eq!(
        payment.process().await.unwrap(),
        ProcessOutcome::Started("p2sh".to_string())
    );
    assert_eq!(payment.status(), PaymentStatus::InProgress);
    assert_eq!(payment.current_plugin().unwrap().name(), "p2sh");

    payment.fail_current_plugin().await.unwrap();
    assert_eq!(
        payment.process().await.unwrap(),
        ProcessOutcome::Started("p2tr".to_string())
    );
    let tried = payment.state().tried_plugins();
    assert_eq!(tried.len(), 1);
    assert_eq!(tried[0].name(), "p2sh");
    assert!(tried[0].end_at().is_some() && !tried[0].is_success());

    payment.fail_current_plugin().await.unwrap();
    assert_eq!(payment.process().await.unwrap(), ProcessOutcome::Failed);
    assert_eq!(payment.status(), PaymentStatus::Failed);
    let names: Vec<&str> = payment.state().tried_plugins().iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["p2sh", "p2tr"]);
    assert!(payment
        .state()
        .tried_plugins()
        .iter()
        .all(|a| !a.is_success() && !a.is_submitted()));

    let stored = storage.get_payment(payment.id(), false).await.unwrap().unwrap();
    assert_eq!(&stored, payment.record());
}

#[tokio::test]
async fn test_second_rail_completes() {
    let (mut payment, _storage) = two_rail_payment().await;

    payment.process().await.unwrap();
    payment.fail_current_plugin().await.unwrap();
    payment.process().await.unwrap();
    payment.complete().await.unwrap();

    assert_eq!(payment.status(), PaymentStatus::Completed);
    assert_eq!(payment.state().completed_by_plugin().unwrap().name(), "p2tr");
    assert!(payment.current_plugin().is_none());

    // Terminal states reject further transitions
    assert!(matches!(payment.cancel().await, Err(PaymentError::InvalidState(_))));
    assert!(matches!(payment.fail().await, Err(PaymentError::InvalidState(_))));
}

#[tokio::test]
async fn test_cancel_order_twice() {
    let network = MemoryNetwork::new();
    let bob = common::counterparty(&network, &["p2sh"]).await;
    let storage = Arc::new(MemoryPaymentStorage::new());
    let transport: Arc<dyn Transport> = Arc::new(network.transport());

    let params = OrderParams::one_time("invoice-7", bob.get_url(), AmountParams::new("100"))
        .with_sending_priority(["p2sh"]);
    let mut order = PaymentOrder::new(params, storage.clone(), transport).unwrap();
    order.init().await.unwrap();

    order.cancel().await.unwrap();
    assert_eq!(order.state(), OrderState::Cancelled);
    let payment_id = order.payments()[0].id().to_string();
    let stored = storage.get_payment(&payment_id, false).await.unwrap().unwrap();
    assert_eq!(stored.internal_state.status(), PaymentStatus::Cancelled);

    assert!(matches!(order.cancel().await, Err(PaymentError::InvalidState(_))));
    assert!(matches!(order.process().await, Err(PaymentError::InvalidState(_))));
    assert!(matches!(order.complete().await, Err(PaymentError::OrderCancelled)));
}

#[tokio::test]
async fn test_cancel_skips_payment_in_flight() {
    let network = MemoryNetwork::new();
    let bob = common::counterparty(&network, &["p2sh"]).await;
    let storage = Arc::new(MemoryPaymentStorage::new());
    let transport: Arc<dyn Transport> = Arc::new(network.transport());

    let params = OrderParams::recurring("sub-1", bob.get_url(), AmountParams::new("100"), 60_000)
        .with_sending_priority(["p2sh"])
        .with_schedule(Some(Utc::now() - Duration::minutes(1)), Some(Utc::now()));
    let mut order = PaymentOrder::new(params, storage.clone(), transport).unwrap();
    order.init().await.unwrap();
    assert_eq!(order.payments().len(), 2);

    let OrderProgress::Dispatched(mut first) = order.process().await.unwrap() else {
        panic!("first payment is due");
    };
    first.process().await.unwrap();

    order.cancel().await.unwrap();
    let statuses: Vec<PaymentStatus> = order.payments().iter().map(|p| p.status()).collect();
    assert_eq!(statuses, vec![PaymentStatus::InProgress, PaymentStatus::Cancelled]);
}

#[tokio::test]
async fn test_unbounded_recurring_order_extends_window() {
    let network = MemoryNetwork::new();
    let bob = common::counterparty(&network, &["p2sh"]).await;
    let storage = Arc::new(MemoryPaymentStorage::new());
    let transport: Arc<dyn Transport> = Arc::new(network.transport());

    let params = OrderParams::recurring("sub-2", bob.get_url(), AmountParams::new("1"), 1)
        .with_sending_priority(["p2sh"])
        .with_schedule(Some(Utc::now() - Duration::hours(1)), None);
    let mut order = PaymentOrder::new(params, storage.clone(), transport).unwrap();
    order.init().await.unwrap();
    assert_eq!(order.payments().len(), 100);

    for _ in 0..100 {
        let OrderProgress::Dispatched(mut payment) = order.process().await.unwrap() else {
            panic!("every generated payment is due");
        };
        payment.process().await.unwrap();
        payment.complete().await.unwrap();
    }
    assert!(order.payments().iter().filter(|p| !p.is_final()).count() <= 1);

    // The 101st call finds the window exhausted and generates the next one
    let OrderProgress::Dispatched(next) = order.process().await.unwrap() else {
        panic!("the next window starts in the past");
    };
    assert_eq!(order.payments().len(), 200);
    let hundredth = order.payments()[99].execute_at();
    assert_eq!(next.execute_at(), hundredth + Duration::milliseconds(1));

    let stored = storage
        .get_payments(slashpay_payments::PaymentFilter::for_order(order.id()))
        .await
        .unwrap();
    assert_eq!(stored.len(), 200);
}
