use async_trait::async_trait;
use std::{io::ErrorKind, path::PathBuf};
use tracing::{debug, warn};

use super::ReceiptSource;
use crate::{
    config::ApplicationConfig,
    models::transaction::{PlatformError, PlatformErrorCode},
};

/// Receipt read from a file on disk, for headless reconciliation
pub struct FileReceiptSource {
    receipt_path: PathBuf,
    bundle_identifier: Option<String>,
}

impl FileReceiptSource {
    pub fn new(config: &ApplicationConfig) -> Self {
        Self {
            receipt_path: PathBuf::from(&config.receipt_path),
            bundle_identifier: config.bundle_identifier.clone(),
        }
    }
}

#[async_trait]
impl ReceiptSource for FileReceiptSource {
    fn bundle_identifier(&self) -> Option<String> {
        self.bundle_identifier.clone()
    }

    fn load_receipt(&self) -> Option<Vec<u8>> {
        match std::fs::read(&self.receipt_path) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                debug!(path = %self.receipt_path.display(), "Receipt file is empty");
                None
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.receipt_path.display(), "Failed to read receipt: {}", e);
                None
            }
        }
    }

    // A file cannot be re-issued; the refresh succeeds once the file has appeared
    async fn refresh_receipt(&self) -> Result<(), PlatformError> {
        match tokio::fs::metadata(&self.receipt_path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(PlatformError::new(
                PlatformErrorCode::Unknown,
                format!("no receipt at {}", self.receipt_path.display()),
            )),
        }
    }
}
