/// Receipt refresh coordination: coalescing, throttling and the refresh chain
use crate::support::{
    millis_from_now, response, FixtureBuilder, MockReceiptSource, MockValidator,
    RecordingDelegate,
};
use futures::future::join_all;
use iapsync::{
    IapError, Product, ProductType, PurchaseState, RefreshState, Transaction, TransactionState,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn catalog() -> Vec<Product> {
    vec![
        Product::new("coins100", ProductType::Consumable),
        Product::new("lifetime", ProductType::NonConsumable),
        Product::new("monthly", ProductType::AutoRenewableSubscription),
    ]
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_validation() {
    let f = FixtureBuilder::new(catalog())
        .validator(MockValidator::gated())
        .build();
    f.validator.respond_with(response(json!([
        { "id": "lifetime", "purchaseDate": 1700000000000i64, "quantity": 1 }
    ])));

    let iap = f.iap.clone();
    let callers = tokio::spawn(async move {
        join_all((0..5).map(|_| {
            let iap = iap.clone();
            async move { iap.refresh().await }
        }))
        .await
    });

    f.validator.wait_for_calls(1).await;
    f.validator.release(1);
    let results = callers.await.unwrap();

    assert_eq!(f.validator.call_count(), 1);
    for result in &results {
        assert_eq!(result.state, RefreshState::Succeeded);
        assert_eq!(result.added_purchases, 1);
    }

    // Completed just now, nothing pending: throttled
    let again = f.iap.refresh().await;
    assert_eq!(again.state, RefreshState::Skipped);
    assert_eq!(f.validator.call_count(), 1);
}

#[tokio::test]
async fn test_validation_error_reaches_every_waiter() {
    let f = FixtureBuilder::new(catalog())
        .validator(MockValidator::gated())
        .build();
    f.validator
        .fail_with(IapError::ValidateReceiptFailed("HTTP 503".to_string()));

    let iap = f.iap.clone();
    let callers = tokio::spawn(async move {
        join_all((0..3).map(|_| {
            let iap = iap.clone();
            async move { iap.restore_purchases().await }
        }))
        .await
    });

    f.validator.wait_for_calls(1).await;
    f.validator.release(1);
    let results = callers.await.unwrap();

    assert_eq!(f.validator.call_count(), 1);
    for result in results {
        assert_eq!(result.state, RefreshState::Failed);
        assert!(matches!(result.error, Some(IapError::ValidateReceiptFailed(_))));
    }
}

#[tokio::test(start_paused = true)]
async fn test_success_interval_throttles_refresh() {
    let f = FixtureBuilder::new(catalog()).build();

    assert_eq!(f.iap.refresh().await.state, RefreshState::Succeeded);
    assert_eq!(f.iap.refresh().await.state, RefreshState::Skipped);

    tokio::time::advance(Duration::from_secs(3599)).await;
    assert_eq!(f.iap.refresh().await.state, RefreshState::Skipped);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(f.iap.refresh().await.state, RefreshState::Succeeded);
    assert_eq!(f.validator.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failure_interval_after_failed_refresh() {
    let f = FixtureBuilder::new(catalog()).build();
    f.validator
        .fail_with(IapError::ValidateReceiptFailed("timeout".to_string()));

    assert_eq!(f.iap.refresh().await.state, RefreshState::Failed);
    assert_eq!(f.iap.refresh().await.state, RefreshState::Skipped);

    tokio::time::advance(Duration::from_secs(121)).await;
    f.validator.respond_with(response(json!([])));
    assert_eq!(f.iap.refresh().await.state, RefreshState::Succeeded);
    assert_eq!(f.validator.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restore_purchases_ignores_throttle() {
    let f = FixtureBuilder::new(catalog()).build();

    assert_eq!(f.iap.refresh().await.state, RefreshState::Succeeded);
    assert_eq!(f.iap.restore_purchases().await.state, RefreshState::Succeeded);
    assert_eq!(f.validator.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unfinished_transaction_keeps_short_interval() {
    let delegate = Arc::new(RecordingDelegate::default());
    let f = FixtureBuilder::new(catalog())
        .delegate(delegate.clone())
        .build();

    assert_eq!(f.iap.initialize().await.state, RefreshState::Succeeded);

    // Delivered outside any purchase call; the delegate never finishes it
    f.validator.respond_with(response(json!([
        { "id": "coins100", "purchaseDate": 1700000000000i64 }
    ])));
    f.queue.deliver(vec![Transaction::new(
        "t1",
        "coins100",
        TransactionState::Purchased,
    )]);
    delegate.wait_for(1).await;
    assert!(f.iap.has_pending_transaction("coins100"));

    tokio::time::advance(Duration::from_secs(121)).await;
    let result = f.iap.refresh().await;

    assert_eq!(result.state, RefreshState::Succeeded);
    assert_eq!(result.updated_purchases, 1);
    assert_eq!(f.validator.call_count(), 3);
}

#[tokio::test]
async fn test_missing_receipt_is_refreshed_first() {
    let f = FixtureBuilder::new(catalog())
        .source(MockReceiptSource::without_receipt().refreshes_to(b"fresh-receipt"))
        .build();

    let result = f.iap.refresh().await;

    assert_eq!(result.state, RefreshState::Succeeded);
    assert_eq!(f.source.refresh_calls(), 1);
    let requests = f.validator.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].transaction.app_store_receipt,
        "ZnJlc2gtcmVjZWlwdA=="
    );
}

#[tokio::test]
async fn test_receipt_refresh_failure() {
    let f = FixtureBuilder::new(catalog())
        .source(MockReceiptSource::without_receipt())
        .build();

    let result = f.iap.refresh().await;

    assert_eq!(result.state, RefreshState::Failed);
    assert!(matches!(result.error, Some(IapError::RefreshReceiptFailed(_))));
    assert_eq!(f.source.refresh_calls(), 1);
    assert_eq!(f.validator.call_count(), 0);
}

#[tokio::test]
async fn test_missing_bundle_identifier() {
    let f = FixtureBuilder::new(catalog())
        .source(MockReceiptSource::with_receipt(b"receipt").without_bundle_identifier())
        .build();

    let result = f.iap.refresh().await;

    assert_eq!(result.error, Some(IapError::BundleIdentifierInvalid));
    assert_eq!(f.validator.call_count(), 0);
}

#[tokio::test]
async fn test_unreadable_response_keeps_ownership() {
    let f = FixtureBuilder::new(catalog()).build();
    f.validator.respond_with(response(json!([
        { "id": "lifetime", "purchaseDate": 1700000000000i64 }
    ])));
    f.iap.restore_purchases().await;
    assert!(f.iap.has_active_purchase("lifetime"));

    f.validator.respond_with(json!({ "ok": false }));
    let result = f.iap.restore_purchases().await;

    assert!(matches!(result.error, Some(IapError::ReadReceiptFailed(_))));
    assert!(f.iap.has_active_purchase("lifetime"));
}

#[tokio::test]
async fn test_purchase_confirmed_in_mixed_batch() {
    let f = FixtureBuilder::new(catalog()).build();
    f.validator.respond_with(response(json!([
        { "id": "coins100", "purchaseDate": millis_from_now(0) },
        { "id": "lifetime", "purchaseDate": millis_from_now(0) }
    ])));

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("lifetime", 1).await });
    f.queue.wait_for_payments(1).await;

    // An unrelated purchase lands in the same batch as the awaited one
    f.queue.deliver(vec![
        Transaction::new("t0", "coins100", TransactionState::Purchased),
        Transaction::new("t1", "lifetime", TransactionState::Purchased),
    ]);
    let result = purchase.await.unwrap();

    assert_eq!(result.state, PurchaseState::Purchased);
    assert_eq!(result.error, None);
    // Queued behind the validation the first transaction started
    assert_eq!(f.validator.call_count(), 2);
    f.queue.wait_for_finished(2).await;
    assert_eq!(f.queue.finished(), vec!["t0", "t1"]);
}

#[tokio::test]
async fn test_refresh_and_purchase_share_round_with_different_outcomes() {
    let f = FixtureBuilder::new(catalog())
        .validator(MockValidator::gated())
        .build();
    f.validator.respond_with(response(json!([])));

    let iap = f.iap.clone();
    let purchase = tokio::spawn(async move { iap.purchase("lifetime", 1).await });
    f.queue.wait_for_payments(1).await;
    f.queue.deliver(vec![Transaction::new(
        "t1",
        "lifetime",
        TransactionState::Purchased,
    )]);
    f.validator.wait_for_calls(1).await;

    // The refresh joins the validation already in flight before it is released
    let (refreshed, _) = tokio::join!(f.iap.refresh(), async { f.validator.release(1) });
    let purchased = purchase.await.unwrap();

    assert_eq!(refreshed.state, RefreshState::Succeeded);
    assert_eq!(refreshed.error, None);
    assert_eq!(purchased.state, PurchaseState::Failed);
    assert_eq!(
        purchased.error,
        Some(IapError::ProductNotInReceipt("lifetime".to_string()))
    );
    assert_eq!(f.validator.call_count(), 1);
}

#[tokio::test]
async fn test_mistyped_entry_outside_catalog_is_ignored() {
    let f = FixtureBuilder::new(catalog()).build();
    f.validator.respond_with(json!({ "data": {
        "collection": [
            {
                "id": "com.example.legacy",
                "purchaseDate": "2019-03-01T00:00:00Z",
                "quantity": "2",
                "isExpired": "no"
            },
            { "id": "lifetime", "purchaseDate": 1700000000000i64 }
        ],
        "ineligible_for_intro_price": "monthly"
    } }));

    let result = f.iap.restore_purchases().await;

    assert_eq!(result.state, RefreshState::Succeeded);
    assert_eq!(result.added_purchases, 1);
    assert!(f.iap.has_active_purchase("lifetime"));
    assert!(!f.iap.is_ineligible_for_intro_price("monthly"));
}
