use crate::error::IapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Succeeded,
    Failed,
    /// Not necessary yet: a refresh completed within the minimum interval
    Skipped,
}

/// Outcome of `refresh()` or `restore_purchases()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResult {
    pub state: RefreshState,
    pub error: Option<IapError>,
    pub added_purchases: u32,
    pub updated_purchases: u32,
}

impl RefreshResult {
    pub fn succeeded(added_purchases: u32, updated_purchases: u32) -> Self {
        Self {
            state: RefreshState::Succeeded,
            error: None,
            added_purchases,
            updated_purchases,
        }
    }

    pub fn failed(error: IapError) -> Self {
        Self {
            state: RefreshState::Failed,
            error: Some(error),
            added_purchases: 0,
            updated_purchases: 0,
        }
    }

    pub fn skipped() -> Self {
        Self {
            state: RefreshState::Skipped,
            error: None,
            added_purchases: 0,
            updated_purchases: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    Purchased,
    Failed,
    Cancelled,
    Deferred,
}

/// Outcome of `purchase()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseResult {
    pub state: PurchaseState,
    pub error: Option<IapError>,
}

impl PurchaseResult {
    pub fn purchased() -> Self {
        Self {
            state: PurchaseState::Purchased,
            error: None,
        }
    }

    pub fn failed(error: IapError) -> Self {
        Self {
            state: PurchaseState::Failed,
            error: Some(error),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: PurchaseState::Cancelled,
            error: None,
        }
    }

    pub fn deferred() -> Self {
        Self {
            state: PurchaseState::Deferred,
            error: None,
        }
    }
}
