/// Purchase flow through the payment queue observer
use crate::support::{response, FixtureBuilder, RecordingDelegate};
use iapsync::{
    IapError, PlatformError, PlatformErrorCode, Product, ProductType, PurchaseState, Transaction,
    TransactionState,
};
use serde_json::json;
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

fn catalog() -> Vec<Product> {
    vec![
        Product::new("coins100", ProductType::Consumable),
        Product::new("lifetime", ProductType::NonConsumable),
    ]
}

fn lifetime_in_receipt() -> serde_json::Value {
    response(json!([
        { "id": "lifetime", "purchaseDate": 1700000000000i64, "quantity": 1 }
    ]))
}

#[tokio::test]
async fn test_purchase_confirmed_by_receipt() {
    let f = FixtureBuilder::new(catalog())
        .application_username("user-hash")
        .build();
    f.validator.respond_with(lifetime_in_receipt());

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("lifetime", 0).await });
    f.queue.wait_for_payments(1).await;

    let payment = f.queue.payments().remove(0);
    assert_eq!(payment.product_id, "lifetime");
    assert_eq!(payment.quantity, 1);
    assert_eq!(payment.application_username.as_deref(), Some("user-hash"));

    f.queue.deliver(vec![Transaction::new(
        "t1",
        "lifetime",
        TransactionState::Purchased,
    )]);
    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Purchased);
    assert!(f.iap.has_active_purchase("lifetime"));
    assert_eq!(
        f.iap.get_transaction_state("lifetime"),
        Some(TransactionState::Purchased)
    );
    // Default delegate finishes once ownership is recorded
    assert_eq!(f.queue.finished(), vec!["t1"]);
    assert!(!f.iap.has_pending_transaction("lifetime"));
}

#[tokio::test]
async fn test_purchase_missing_from_receipt() {
    let f = FixtureBuilder::new(catalog()).build();

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("lifetime", 1).await });
    f.queue.wait_for_payments(1).await;
    f.queue.deliver(vec![Transaction::new(
        "t1",
        "lifetime",
        TransactionState::Purchased,
    )]);

    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Failed);
    assert_eq!(
        result.error,
        Some(IapError::ProductNotInReceipt("lifetime".to_string()))
    );
    assert!(f.queue.finished().is_empty());
}

#[tokio::test]
async fn test_already_purchasing_in_queue() {
    let f = FixtureBuilder::new(catalog()).build();
    *f.queue.last_state.lock().unwrap() = Some(TransactionState::Purchasing);

    let result = f.iap.purchase("lifetime", 1).await;

    assert_eq!(result.state, PurchaseState::Failed);
    assert_eq!(result.error, Some(IapError::AlreadyPurchasing));
    assert!(f.queue.payments().is_empty());
}

#[tokio::test]
async fn test_cannot_make_purchase() {
    let f = FixtureBuilder::new(catalog()).build();
    f.queue.can_pay.store(false, Ordering::SeqCst);

    let result = f.iap.purchase("lifetime", 1).await;

    assert_eq!(result.error, Some(IapError::CannotMakePurchase));
    assert!(f.queue.payments().is_empty());
}

#[tokio::test]
async fn test_overlapping_purchase_rejected() {
    let f = FixtureBuilder::new(catalog()).build();

    let iap = f.iap.clone();
    let first = tokio::spawn(async move { iap.purchase("lifetime", 1).await });
    f.queue.wait_for_payments(1).await;

    let second = f.iap.purchase("coins100", 1).await;
    assert_eq!(second.error, Some(IapError::AlreadyPurchasing));
    assert_eq!(f.queue.payments().len(), 1);

    f.queue.deliver(vec![Transaction::new("t1", "lifetime", TransactionState::Failed)
        .with_error(PlatformError::new(
            PlatformErrorCode::PaymentCancelled,
            "user cancelled",
        ))]);
    assert_eq!(first.await.unwrap().state, PurchaseState::Cancelled);

    // Slot is free again
    let iap = f.iap.clone();
    let third = tokio::spawn(async move { iap.purchase("coins100", 1).await });
    f.queue.wait_for_payments(2).await;
    f.queue.deliver(vec![Transaction::new("t2", "coins100", TransactionState::Deferred)]);
    assert_eq!(third.await.unwrap().state, PurchaseState::Deferred);
}

#[tokio::test]
async fn test_abandoned_purchase_frees_the_slot() {
    let f = FixtureBuilder::new(catalog()).build();

    // The caller gives up before the queue reports anything
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), f.iap.purchase("lifetime", 1)).await;
    assert!(abandoned.is_err());
    assert_eq!(f.queue.payments().len(), 1);

    let iap = f.iap.clone();
    let retry = tokio::spawn(async move { iap.purchase("coins100", 1).await });
    f.queue.wait_for_payments(2).await;
    f.queue.deliver(vec![Transaction::new("t1", "coins100", TransactionState::Deferred)]);

    let result = retry.await.unwrap();
    assert_eq!(result.state, PurchaseState::Deferred);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn test_cancelled_purchase_is_finished() {
    let f = FixtureBuilder::new(catalog()).build();

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("coins100", 1).await });
    f.queue.wait_for_payments(1).await;
    f.queue.deliver(vec![Transaction::new("t1", "coins100", TransactionState::Failed)
        .with_error(PlatformError::new(
            PlatformErrorCode::PaymentCancelled,
            "user cancelled",
        ))]);

    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Cancelled);
    assert_eq!(result.error, None);
    assert_eq!(f.queue.finished(), vec!["t1"]);
    assert_eq!(f.validator.call_count(), 0);
}

#[tokio::test]
async fn test_failed_purchase_carries_platform_error() {
    let f = FixtureBuilder::new(catalog()).build();

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("coins100", 1).await });
    f.queue.wait_for_payments(1).await;
    let error = PlatformError::new(PlatformErrorCode::PaymentNotAllowed, "restricted");
    f.queue.deliver(vec![
        Transaction::new("t1", "coins100", TransactionState::Failed).with_error(error.clone())
    ]);

    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Failed);
    assert_eq!(result.error, Some(IapError::Platform(error)));
    assert_eq!(f.queue.finished(), vec!["t1"]);
}

#[tokio::test]
async fn test_deferred_purchase_is_not_finished() {
    let f = FixtureBuilder::new(catalog()).build();

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("lifetime", 1).await });
    f.queue.wait_for_payments(1).await;
    f.queue.deliver(vec![Transaction::new("t1", "lifetime", TransactionState::Deferred)]);

    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Deferred);
    assert!(f.iap.has_deferred_transaction("lifetime"));
    assert!(f.queue.finished().is_empty());
}

#[tokio::test]
async fn test_restored_transaction_is_finished() {
    let f = FixtureBuilder::new(catalog()).build();
    assert!(f.iap.can_make_payments());

    f.queue.deliver(vec![Transaction::new("t1", "lifetime", TransactionState::Restored)]);
    f.queue.wait_for_finished(1).await;

    assert_eq!(f.queue.finished(), vec!["t1"]);
    assert_eq!(
        f.iap.get_transaction_state("lifetime"),
        Some(TransactionState::Restored)
    );
    assert_eq!(f.validator.call_count(), 0);
}

#[tokio::test]
async fn test_delegate_owns_finishing() {
    let delegate = Arc::new(RecordingDelegate::default());
    let f = FixtureBuilder::new(catalog())
        .delegate(delegate.clone())
        .build();
    f.validator.respond_with(response(json!([
        { "id": "coins100", "purchaseDate": 1700000000000i64 }
    ])));
    assert!(f.iap.can_make_payments());

    // Redelivered after a restart, no purchase call waiting for it
    f.queue.deliver(vec![Transaction::new(
        "t1",
        "coins100",
        TransactionState::Purchased,
    )]);
    delegate.wait_for(1).await;

    assert_eq!(delegate.purchased(), vec!["coins100"]);
    assert!(f.queue.finished().is_empty());
    assert!(f.iap.has_pending_transaction("coins100"));

    f.iap.finish_transactions("coins100");

    assert_eq!(f.queue.finished(), vec!["t1"]);
    assert!(!f.iap.has_pending_transaction("coins100"));
}

#[tokio::test]
async fn test_observer_attached_once() {
    let f = FixtureBuilder::new(catalog()).build();

    f.iap.initialize().await;
    assert!(f.iap.can_make_payments());
    assert!(f.iap.can_make_payments());
    assert_eq!(f.queue.observers_added.load(Ordering::SeqCst), 1);

    f.iap.stop();
    f.iap.stop();
    assert_eq!(f.queue.observers_removed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_interrupts_awaited_purchase() {
    let f = FixtureBuilder::new(catalog()).build();

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("lifetime", 1).await });
    f.queue.wait_for_payments(1).await;

    f.iap.stop();
    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Failed);
    assert!(matches!(result.error, Some(IapError::Interrupted(_))));
}
