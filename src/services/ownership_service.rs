use crate::{
    error::Result,
    models::{
        iap::datetime_to_millis,
        product::Product,
        purchase::PurchaseRecord,
    },
    services::storage_service::{KeyValueStore, Writes},
};
use serde_json::{json, Value};
use std::{collections::BTreeSet, sync::Arc};
use time::OffsetDateTime;

const KEY_PREFIX: &str = "iapsync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Purchase,
    Expiry,
    NextExpiry,
}

impl DateField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Expiry => "expiry",
            Self::NextExpiry => "nextExpiry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntField {
    Quantity,
}

impl IntField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Quantity => "quantity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolField {
    HasAlreadyPurchased,
}

impl BoolField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::HasAlreadyPurchased => "hasAlreadyPurchased",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringSetField {
    IneligibleForIntroPrice,
}

impl StringSetField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::IneligibleForIntroPrice => "ineligibleForIntroPrice",
        }
    }
}

fn product_key(field: &str, product_id: &str) -> String {
    format!("{}.{}.{}", KEY_PREFIX, product_id, field)
}

fn global_key(field: &str) -> String {
    format!("{}.{}", KEY_PREFIX, field)
}

/// Ownership writes collected during one validation pass and committed together
#[derive(Debug, Default)]
pub struct OwnershipBatch {
    writes: Writes,
}

impl OwnershipBatch {
    pub fn set_date(&mut self, field: DateField, product_id: &str, value: Option<OffsetDateTime>) {
        self.writes.push((
            product_key(field.as_str(), product_id),
            value.map(|date| json!(datetime_to_millis(date))),
        ));
    }

    pub fn set_int(&mut self, field: IntField, product_id: &str, value: Option<i64>) {
        self.writes
            .push((product_key(field.as_str(), product_id), value.map(Value::from)));
    }

    pub fn set_bool(&mut self, field: BoolField, value: bool) {
        self.writes
            .push((global_key(field.as_str()), Some(Value::Bool(value))));
    }

    pub fn set_string_set(&mut self, field: StringSetField, values: &BTreeSet<String>) {
        self.writes
            .push((global_key(field.as_str()), Some(json!(values))));
    }

    /// Overwrite every field of the product's record
    pub fn set_purchase_record(&mut self, product_id: &str, record: &PurchaseRecord) {
        self.set_date(DateField::Purchase, product_id, record.purchase_date);
        self.set_date(DateField::Expiry, product_id, record.expiry_date);
        self.set_date(DateField::NextExpiry, product_id, record.next_expiry_date);
        self.set_int(IntField::Quantity, product_id, record.quantity);
    }
}

/// Typed accessors over the durable key-value store.
///
/// Reads of keys that were never written return `None`, `false` or an empty set.
/// Only the receipt service writes here, one validation pass at a time.
#[derive(Clone)]
pub struct OwnershipStore {
    store: Arc<dyn KeyValueStore>,
}

impl OwnershipStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist every write of the batch, or none of them
    pub fn commit(&self, batch: OwnershipBatch) -> Result<()> {
        if batch.writes.is_empty() {
            return Ok(());
        }
        self.store.set_many(batch.writes)
    }

    fn write(&self, fill: impl FnOnce(&mut OwnershipBatch)) -> Result<()> {
        let mut batch = OwnershipBatch::default();
        fill(&mut batch);
        self.commit(batch)
    }

    pub fn get_date(&self, field: DateField, product_id: &str) -> Option<OffsetDateTime> {
        let millis = self
            .store
            .get(&product_key(field.as_str(), product_id))?
            .as_i64()?;
        OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
    }

    pub fn set_date(
        &self,
        field: DateField,
        product_id: &str,
        value: Option<OffsetDateTime>,
    ) -> Result<()> {
        self.write(|batch| batch.set_date(field, product_id, value))
    }

    pub fn get_int(&self, field: IntField, product_id: &str) -> Option<i64> {
        self.store
            .get(&product_key(field.as_str(), product_id))?
            .as_i64()
    }

    pub fn set_int(&self, field: IntField, product_id: &str, value: Option<i64>) -> Result<()> {
        self.write(|batch| batch.set_int(field, product_id, value))
    }

    pub fn get_bool(&self, field: BoolField) -> bool {
        self.store
            .get(&global_key(field.as_str()))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn set_bool(&self, field: BoolField, value: bool) -> Result<()> {
        self.write(|batch| batch.set_bool(field, value))
    }

    pub fn get_string_set(&self, field: StringSetField) -> BTreeSet<String> {
        match self.store.get(&global_key(field.as_str())) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    pub fn set_string_set(&self, field: StringSetField, values: &BTreeSet<String>) -> Result<()> {
        self.write(|batch| batch.set_string_set(field, values))
    }

    pub fn purchase_record(&self, product_id: &str) -> PurchaseRecord {
        PurchaseRecord {
            purchase_date: self.get_date(DateField::Purchase, product_id),
            expiry_date: self.get_date(DateField::Expiry, product_id),
            next_expiry_date: self.get_date(DateField::NextExpiry, product_id),
            quantity: self.get_int(IntField::Quantity, product_id),
        }
    }

    pub fn set_purchase_record(&self, product_id: &str, record: &PurchaseRecord) -> Result<()> {
        self.write(|batch| batch.set_purchase_record(product_id, record))
    }

    pub fn has_active_purchase(&self, product: &Product, now: OffsetDateTime) -> bool {
        self.purchase_record(&product.identifier)
            .is_active(product.product_type, now)
    }
}
