// Service modules
pub mod ownership_service;
pub mod receipt_service;
pub mod storage_service;
pub mod transaction_service;
pub mod validator_service;

pub use ownership_service::OwnershipStore;
pub use receipt_service::ReceiptService;
pub use storage_service::{JsonFileStore, KeyValueStore, MemoryStore};
pub use transaction_service::{FinishTransactionsDelegate, PendingTransactions, TransactionService};
pub use validator_service::{HttpReceiptValidator, ReceiptValidator};
