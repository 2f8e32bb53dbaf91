//! Wire format of the remote receipt validator.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Identifies this library to the validator
pub const PLUGIN_NAME: &str = concat!("iapsync/", env!("CARGO_PKG_VERSION"));

/// Validation request body (POST, JSON)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub device: DeviceInfo,
    pub transaction: ReceiptTransaction,
    pub additional_data: AdditionalData,
}

impl ValidationRequest {
    pub fn new(
        bundle_identifier: &str,
        device: DeviceInfo,
        receipt: &[u8],
        application_username: Option<String>,
    ) -> Self {
        Self {
            id: bundle_identifier.to_string(),
            kind: "application".to_string(),
            device,
            transaction: ReceiptTransaction {
                kind: "ios-appstore".to_string(),
                id: bundle_identifier.to_string(),
                app_store_receipt: STANDARD.encode(receipt),
            },
            additional_data: AdditionalData {
                application_username,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub plugin: String,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub model: Option<String>,
}

impl DeviceInfo {
    /// Descriptor for the host this process runs on
    pub fn current() -> Self {
        Self {
            plugin: PLUGIN_NAME.to_string(),
            platform: Some(std::env::consts::OS.to_string()),
            version: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptTransaction {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub app_store_receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalData {
    pub application_username: Option<String>,
}

/// Validation response body. A missing `data.collection` fails deserialization;
/// anything inside the collection is read leniently, one field at a time.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorResponse {
    pub data: ValidatorData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorData {
    pub collection: Vec<Value>,
    #[serde(default)]
    pub ineligible_for_intro_price: Option<Value>,
}

impl ValidatorData {
    pub fn entries(&self) -> Vec<PurchaseEntry> {
        self.collection.iter().map(PurchaseEntry::from_value).collect()
    }

    /// Product ids listed as ineligible; non-string items are skipped
    pub fn ineligible_products(&self) -> BTreeSet<String> {
        match &self.ineligible_for_intro_price {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// One normalized purchase, keyed by product id. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurchaseEntry {
    pub id: Option<String>,
    pub purchase_date: Option<f64>,
    pub quantity: Option<i64>,
    pub expiry_date: Option<f64>,
    pub is_expired: Option<bool>,
}

impl PurchaseEntry {
    /// Fields of the wrong type read as absent
    pub fn from_value(value: &Value) -> Self {
        Self {
            id: value.get("id").and_then(Value::as_str).map(str::to_string),
            purchase_date: value.get("purchaseDate").and_then(Value::as_f64),
            quantity: value.get("quantity").and_then(|q| {
                q.as_i64()
                    .or_else(|| q.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            }),
            expiry_date: value.get("expiryDate").and_then(Value::as_f64),
            is_expired: value.get("isExpired").and_then(Value::as_bool),
        }
    }

    pub fn purchase_date(&self) -> Option<OffsetDateTime> {
        self.purchase_date.and_then(datetime_from_millis)
    }

    pub fn expiry_date(&self) -> Option<OffsetDateTime> {
        self.expiry_date.and_then(datetime_from_millis)
    }

    pub fn quantity(&self) -> i64 {
        self.quantity.unwrap_or(1)
    }

    /// Entries that do not say otherwise are treated as expired
    pub fn is_expired(&self) -> bool {
        self.is_expired.unwrap_or(true)
    }
}

/// Zero means "not set". Sub-millisecond precision is dropped so that stored
/// and freshly parsed dates compare equal.
pub fn datetime_from_millis(millis: f64) -> Option<OffsetDateTime> {
    if !millis.is_finite() || millis == 0.0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(millis.trunc() as i128 * 1_000_000).ok()
}

pub fn datetime_to_millis(date: OffsetDateTime) -> i64 {
    (date.unix_timestamp_nanos() / 1_000_000) as i64
}
