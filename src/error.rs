use crate::models::transaction::PlatformError;

/// Errors surfaced to callers of `refresh()`, `purchase()` and `restore_purchases()`.
///
/// A single validation outcome is fanned out to every coalesced caller, so the
/// error carries owned messages and is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IapError {
    #[error("The bundle identifier is invalid")]
    BundleIdentifierInvalid,

    #[error("The validator URL is invalid: {0}")]
    ValidatorUrlInvalid(String),

    #[error("Failed to refresh the receipt: {0}")]
    RefreshReceiptFailed(String),

    #[error("Failed to validate the receipt: {0}")]
    ValidateReceiptFailed(String),

    #[error("Failed to read the receipt validation: {0}")]
    ReadReceiptFailed(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("The user is not allowed to authorize payments")]
    CannotMakePurchase,

    #[error("A purchase is already in progress")]
    AlreadyPurchasing,

    #[error("Product {0} is not present in the validated receipt")]
    ProductNotInReceipt(String),

    #[error("Payment queue error: {0}")]
    Platform(PlatformError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),
}

impl IapError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            IapError::BundleIdentifierInvalid => "BUNDLE_IDENTIFIER_INVALID",
            IapError::ValidatorUrlInvalid(_) => "VALIDATOR_URL_INVALID",
            IapError::RefreshReceiptFailed(_) => "REFRESH_RECEIPT_FAILED",
            IapError::ValidateReceiptFailed(_) => "VALIDATE_RECEIPT_FAILED",
            IapError::ReadReceiptFailed(_) => "READ_RECEIPT_FAILED",
            IapError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            IapError::CannotMakePurchase => "CANNOT_MAKE_PURCHASE",
            IapError::AlreadyPurchasing => "ALREADY_PURCHASING",
            IapError::ProductNotInReceipt(_) => "PRODUCT_NOT_IN_RECEIPT",
            IapError::Platform(_) => "PLATFORM_ERROR",
            IapError::Storage(_) => "STORAGE_ERROR",
            IapError::Interrupted(_) => "INTERRUPTED",
        }
    }

    /// Configuration errors are fatal to the attempt and never resolve on their own.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            IapError::BundleIdentifierInvalid | IapError::ValidatorUrlInvalid(_)
        )
    }
}

impl From<PlatformError> for IapError {
    fn from(error: PlatformError) -> Self {
        IapError::Platform(error)
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, IapError>;
