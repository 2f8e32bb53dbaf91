//! Platform collaborators
//!
//! The payment queue, the local receipt and the purchase delegate are owned by
//! the host platform or the application. The reconciliation services only see
//! them through these traits.

pub mod file_receipt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{
    iap::DeviceInfo,
    transaction::{Payment, PlatformError, Transaction, TransactionState},
};

pub use file_receipt::FileReceiptSource;

/// Batches of transaction updates, in the order the queue emits them
pub type TransactionUpdates = mpsc::UnboundedReceiver<Vec<Transaction>>;

/// The OS payment queue. Persistent and at-least-once: a transaction that was
/// never finished is delivered again after a restart.
pub trait PaymentQueue: Send + Sync {
    /// Whether the user is allowed to authorize payments
    fn can_make_payments(&self) -> bool;

    /// State of the most recent transaction in the queue, if any
    fn last_transaction_state(&self) -> Option<TransactionState>;

    /// Start delivering transaction updates
    fn add_observer(&self) -> TransactionUpdates;

    fn remove_observer(&self);

    fn add_payment(&self, payment: Payment);

    /// Acknowledge a transaction so it is not delivered again
    fn finish_transaction(&self, transaction: &Transaction);
}

/// Access to the app's receipt and bundle metadata
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    fn bundle_identifier(&self) -> Option<String>;

    /// Raw receipt blob, or `None` when no receipt is present locally
    fn load_receipt(&self) -> Option<Vec<u8>>;

    /// Ask the platform for a fresh receipt
    async fn refresh_receipt(&self) -> Result<(), PlatformError>;

    fn device(&self) -> DeviceInfo {
        DeviceInfo::current()
    }
}

/// Application hook for the one cross-cutting event: a product newly became
/// purchased. Implementations must call `finish_transactions` once the content
/// has been durably delivered.
pub trait PurchaseDelegate: Send + Sync {
    fn product_purchased(&self, product_id: &str);
}
