use serde::Deserialize;
use std::time::Duration;

use crate::models::product::{Catalog, Product};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub application: ApplicationConfig,
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: Vec<Product>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub bundle_identifier: Option<String>,
    #[serde(default)]
    pub application_username: Option<String>,
    pub receipt_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    pub url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ValidatorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    // Minimum spacing after a failed or indefinite validation attempt
    #[serde(default = "default_failure_interval_secs")]
    pub failure_interval_secs: u64,
    // Minimum spacing after a successful validation with nothing pending
    #[serde(default = "default_success_interval_secs")]
    pub success_interval_secs: u64,
}

impl RefreshConfig {
    pub fn failure_interval(&self) -> Duration {
        Duration::from_secs(self.failure_interval_secs)
    }

    pub fn success_interval(&self) -> Duration {
        Duration::from_secs(self.success_interval_secs)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            failure_interval_secs: default_failure_interval_secs(),
            success_interval_secs: default_success_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_failure_interval_secs() -> u64 {
    120
}

fn default_success_interval_secs() -> u64 {
    3600
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            // Allow environment variables to override config file
            .add_source(
                config::Environment::with_prefix("IAPSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.catalog.clone())
    }
}
