use time::OffsetDateTime;

use super::{iap::PurchaseEntry, product::ProductType};

/// Last known receipt state for one product
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseRecord {
    pub purchase_date: Option<OffsetDateTime>,
    /// May be past or future
    pub expiry_date: Option<OffsetDateTime>,
    /// Set only while the subscription period has not elapsed
    pub next_expiry_date: Option<OffsetDateTime>,
    pub quantity: Option<i64>,
}

impl PurchaseRecord {
    /// Snapshot for a product from its receipt entry. No entry means not owned.
    pub fn from_entry(entry: Option<&PurchaseEntry>) -> Self {
        let Some(entry) = entry else {
            return Self::default();
        };

        let expiry_date = entry.expiry_date();
        let next_expiry_date = match expiry_date {
            Some(date) if !entry.is_expired() => Some(date),
            _ => None,
        };

        Self {
            purchase_date: entry.purchase_date(),
            expiry_date,
            next_expiry_date,
            quantity: Some(entry.quantity()),
        }
    }

    /// Ownership as seen by the application. Consumables and non-renewing
    /// subscriptions are tracked by the purchase delegate, never here.
    pub fn is_active(&self, product_type: ProductType, now: OffsetDateTime) -> bool {
        match product_type {
            ProductType::NonConsumable => self.purchase_date.is_some(),
            ProductType::AutoRenewableSubscription => {
                self.next_expiry_date.is_some_and(|date| date > now)
            }
            ProductType::Consumable | ProductType::NonRenewingSubscription => false,
        }
    }
}
