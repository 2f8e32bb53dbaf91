use std::sync::Arc;

use iapsync::{
    models::results::RefreshState,
    platform::FileReceiptSource,
    services::{
        HttpReceiptValidator, JsonFileStore, OwnershipStore, PendingTransactions, ReceiptService,
    },
    Config,
};
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,iapsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting receipt reconciliation (iapsync)");

    // Load configuration
    let config = Config::load()?;

    tracing::info!(
        "Loaded configuration - Validator: {}, Products: {}",
        config.validator.url,
        config.catalog.len()
    );

    let catalog = Arc::new(config.catalog());
    let ownership = OwnershipStore::new(Arc::new(JsonFileStore::open(&config.storage.path)?));

    // No payment queue here: nothing is pending and nobody is notified
    let receipts = Arc::new(ReceiptService::new(
        catalog.clone(),
        ownership.clone(),
        Arc::new(PendingTransactions::default()),
        Arc::new(FileReceiptSource::new(&config.application)),
        Arc::new(HttpReceiptValidator::new(&config.validator)?),
        None,
        config.application.application_username.clone(),
        config.refresh.clone(),
    ));

    let result = receipts.refresh_now().await;
    if result.state != RefreshState::Succeeded {
        let error = result
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("Receipt reconciliation failed: {}", error);
    }

    tracing::info!(
        added = result.added_purchases,
        updated = result.updated_purchases,
        "Receipt reconciled"
    );

    let now = OffsetDateTime::now_utc();
    for product in catalog.iter() {
        let record = ownership.purchase_record(&product.identifier);
        tracing::info!(
            product_id = %product.identifier,
            product_type = product.product_type.as_str(),
            active = record.is_active(product.product_type, now),
            purchase_date = ?record.purchase_date,
            expiry_date = ?record.expiry_date,
            quantity = ?record.quantity,
            "Ownership"
        );
    }

    Ok(())
}
