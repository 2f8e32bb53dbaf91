// Library exports for embedding and testing
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod platform;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use context::{Collaborators, InAppPurchase};
pub use error::{IapError, Result};
pub use models::{
    product::{Catalog, Product, ProductType},
    results::{PurchaseResult, PurchaseState, RefreshResult, RefreshState},
    transaction::{Payment, PlatformError, PlatformErrorCode, Transaction, TransactionState},
};
pub use platform::{PaymentQueue, PurchaseDelegate, ReceiptSource};
