use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

/// Error codes reported by the payment queue for failed transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorCode {
    PaymentCancelled,
    PaymentInvalid,
    PaymentNotAllowed,
    ProductNotAvailable,
    NetworkUnavailable,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformError {
    pub code: PlatformErrorCode,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: PlatformErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == PlatformErrorCode::PaymentCancelled
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// A payment request submitted to the payment queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub product_id: String,
    pub quantity: u32,
    pub application_username: Option<String>,
}

/// One purchase or restore event for one product, as delivered by the payment queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Platform-assigned handle, used to acknowledge the transaction
    pub identifier: String,
    pub product_id: String,
    pub state: TransactionState,
    pub error: Option<PlatformError>,
}

impl Transaction {
    pub fn new(
        identifier: impl Into<String>,
        product_id: impl Into<String>,
        state: TransactionState,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            product_id: product_id.into(),
            state,
            error: None,
        }
    }

    pub fn with_error(mut self, error: PlatformError) -> Self {
        self.error = Some(error);
        self
    }
}
