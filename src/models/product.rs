use serde::{Deserialize, Serialize};

/// Product type, as declared in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Consumable,
    NonConsumable,
    NonRenewingSubscription,
    AutoRenewableSubscription,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumable => "consumable",
            Self::NonConsumable => "non_consumable",
            Self::NonRenewingSubscription => "non_renewing_subscription",
            Self::AutoRenewableSubscription => "auto_renewable_subscription",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub identifier: String,
    #[serde(rename = "type")]
    pub product_type: ProductType,
}

impl Product {
    pub fn new(identifier: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            identifier: identifier.into(),
            product_type,
        }
    }
}

/// The static product list supplied at startup. Order is significant: the
/// purchase delegate is notified in catalog order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        let mut unique: Vec<Product> = Vec::with_capacity(products.len());
        for product in products {
            if !unique.iter().any(|p| p.identifier == product.identifier) {
                unique.push(product);
            }
        }
        Self { products: unique }
    }

    pub fn get(&self, identifier: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.identifier == identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.iter()
    }

    pub fn auto_renewable_subscriptions(&self) -> impl Iterator<Item = &Product> {
        self.products
            .iter()
            .filter(|p| p.product_type == ProductType::AutoRenewableSubscription)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
