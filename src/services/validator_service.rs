use crate::{
    config::ValidatorConfig,
    error::{IapError, Result},
    models::iap::ValidationRequest,
};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// Remote receipt validator. Returns the decoded JSON body; interpreting its
/// shape is left to the receipt service.
#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    async fn validate(&self, request: &ValidationRequest) -> Result<Value>;
}

pub struct HttpReceiptValidator {
    url: String,
    http_client: reqwest::Client,
}

impl HttpReceiptValidator {
    pub fn new(config: &ValidatorConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                IapError::ValidateReceiptFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            url: config.url.clone(),
            http_client,
        })
    }

    fn endpoint(&self) -> Result<reqwest::Url> {
        let url = reqwest::Url::parse(self.url.trim())
            .map_err(|e| IapError::ValidatorUrlInvalid(format!("{:?}: {}", self.url, e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(IapError::ValidatorUrlInvalid(format!(
                "unsupported scheme {:?}",
                scheme
            ))),
        }
    }
}

#[async_trait]
impl ReceiptValidator for HttpReceiptValidator {
    #[instrument(skip(self, request), fields(bundle = %request.id))]
    async fn validate(&self, request: &ValidationRequest) -> Result<Value> {
        let endpoint = self.endpoint()?;

        let response = self
            .http_client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!("Validator request failed: {}", e);
                IapError::ValidateReceiptFailed(format!("Failed to reach validator: {}", e))
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            IapError::ValidateReceiptFailed(format!("Failed to read validator response: {}", e))
        })?;

        debug!(
            status = %status.as_u16(),
            body = %truncate_body(&String::from_utf8_lossy(&body), 2000),
            "Validator response"
        );

        let json: Value = serde_json::from_slice(&body).map_err(|e| {
            IapError::ValidateReceiptFailed(format!(
                "Invalid response format (HTTP {}): {}",
                status.as_u16(),
                e
            ))
        })?;

        info!(status = %status.as_u16(), "Receipt validated");

        Ok(json)
    }
}

/// Fingerprint used to identify a receipt in logs without logging its contents
pub fn receipt_fingerprint(receipt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(receipt);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Truncate body for logging, adding ellipsis if truncated
fn truncate_body(body: &str, max_len: usize) -> String {
    let body = body.trim();
    if body.len() <= max_len {
        body.to_string()
    } else {
        let mut end = max_len;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}...[truncated, {} bytes total]",
            &body[..end],
            body.len()
        )
    }
}
