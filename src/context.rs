use crate::{
    config::{Config, RefreshConfig},
    error::{IapError, Result},
    models::{
        product::Catalog,
        results::{PurchaseResult, RefreshResult},
        transaction::TransactionState,
    },
    platform::{FileReceiptSource, PaymentQueue, PurchaseDelegate, ReceiptSource},
    services::{
        ownership_service::{BoolField, DateField, IntField, StringSetField},
        FinishTransactionsDelegate, HttpReceiptValidator, JsonFileStore, KeyValueStore,
        OwnershipStore, PendingTransactions, ReceiptService, ReceiptValidator,
        TransactionService,
    },
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

/// Everything the library talks to but does not own
pub struct Collaborators {
    pub payment_queue: Arc<dyn PaymentQueue>,
    pub receipt_source: Arc<dyn ReceiptSource>,
    pub validator: Arc<dyn ReceiptValidator>,
    pub store: Arc<dyn KeyValueStore>,
    /// When `None`, transactions are finished as soon as the receipt confirms them
    pub delegate: Option<Arc<dyn PurchaseDelegate>>,
}

#[derive(Clone)]
pub struct InAppPurchase {
    pub catalog: Arc<Catalog>,
    ownership: OwnershipStore,
    pending: Arc<PendingTransactions>,
    receipts: Arc<ReceiptService>,
    transactions: Arc<TransactionService>,
}

impl InAppPurchase {
    pub fn new(
        catalog: Catalog,
        application_username: Option<String>,
        refresh: RefreshConfig,
        collaborators: Collaborators,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let ownership = OwnershipStore::new(collaborators.store);
        let pending = Arc::new(PendingTransactions::default());

        let delegate = collaborators.delegate.unwrap_or_else(|| {
            Arc::new(FinishTransactionsDelegate::new(
                pending.clone(),
                collaborators.payment_queue.clone(),
            ))
        });

        let receipts = Arc::new(ReceiptService::new(
            catalog.clone(),
            ownership.clone(),
            pending.clone(),
            collaborators.receipt_source,
            collaborators.validator,
            Some(delegate),
            application_username,
            refresh,
        ));
        let transactions = Arc::new(TransactionService::new(
            collaborators.payment_queue,
            receipts.clone(),
            pending.clone(),
        ));

        Self {
            catalog,
            ownership,
            pending,
            receipts,
            transactions,
        }
    }

    /// Build the context with the file-backed receipt source and store and the HTTP validator
    pub fn from_config(
        config: &Config,
        payment_queue: Arc<dyn PaymentQueue>,
        delegate: Option<Arc<dyn PurchaseDelegate>>,
    ) -> Result<Self> {
        let store = JsonFileStore::open(&config.storage.path)?;
        let validator = HttpReceiptValidator::new(&config.validator)?;

        Ok(Self::new(
            config.catalog(),
            config.application.application_username.clone(),
            config.refresh.clone(),
            Collaborators {
                payment_queue,
                receipt_source: Arc::new(FileReceiptSource::new(&config.application)),
                validator: Arc::new(validator),
                store: Arc::new(store),
                delegate,
            },
        ))
    }

    /// Attach to the payment queue and reconcile ownership with the receipt
    pub async fn initialize(&self) -> RefreshResult {
        info!(products = self.catalog.len(), "Initializing in-app purchases");
        self.transactions.start();
        self.receipts.refresh().await
    }

    pub fn stop(&self) {
        self.transactions.stop();
    }

    pub async fn refresh(&self) -> RefreshResult {
        self.receipts.refresh().await
    }

    /// User-initiated refresh; never throttled
    pub async fn restore_purchases(&self) -> RefreshResult {
        self.receipts.refresh_now().await
    }

    pub async fn purchase(&self, product_id: &str, quantity: u32) -> PurchaseResult {
        let Some(product) = self.catalog.get(product_id) else {
            return PurchaseResult::failed(IapError::ProductNotFound(product_id.to_string()));
        };
        let application_username = self.receipts.application_username().map(str::to_string);
        self.transactions
            .purchase(product, quantity, application_username)
            .await
    }

    pub fn can_make_payments(&self) -> bool {
        self.transactions.can_make_payments()
    }

    pub fn finish_transactions(&self, product_id: &str) {
        self.transactions.finish_transactions(product_id);
    }

    pub fn get_transaction_state(&self, product_id: &str) -> Option<TransactionState> {
        self.transactions.get_transaction_state(product_id)
    }

    pub fn has_deferred_transaction(&self, product_id: &str) -> bool {
        self.transactions.has_deferred_transaction(product_id)
    }

    pub fn has_pending_transaction(&self, product_id: &str) -> bool {
        self.pending.has_pending_transaction(product_id)
    }

    /// Whether the last validated receipt contained any purchase at all
    pub fn has_already_purchased(&self) -> bool {
        self.ownership.get_bool(BoolField::HasAlreadyPurchased)
    }

    pub fn has_active_purchase(&self, product_id: &str) -> bool {
        self.catalog.get(product_id).is_some_and(|product| {
            self.ownership
                .has_active_purchase(product, OffsetDateTime::now_utc())
        })
    }

    pub fn has_active_subscription(&self) -> bool {
        let now = OffsetDateTime::now_utc();
        self.catalog
            .auto_renewable_subscriptions()
            .any(|p| self.ownership.has_active_purchase(p, now))
    }

    pub fn get_purchase_date(&self, product_id: &str) -> Option<OffsetDateTime> {
        self.ownership.get_date(DateField::Purchase, product_id)
    }

    pub fn get_expiry_date(&self, product_id: &str) -> Option<OffsetDateTime> {
        self.ownership.get_date(DateField::Expiry, product_id)
    }

    pub fn get_purchased_quantity(&self, product_id: &str) -> i64 {
        self.ownership
            .get_int(IntField::Quantity, product_id)
            .unwrap_or(0)
    }

    pub fn is_ineligible_for_intro_price(&self, product_id: &str) -> bool {
        self.ownership
            .get_string_set(StringSetField::IneligibleForIntroPrice)
            .contains(product_id)
    }
}
