//! Configuration module
//!
//! Settings for the ingestion engine: storage backend selection, staging
//! session lifetime, upload retry policy, transcoding parameters, display
//! order retry policy and bulk migration sizing. Everything is read from the
//! environment (optionally seeded from a `.env` file).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_ORIGINAL_MAX_DIMENSION;
use crate::storage_types::StorageBackend;

const STAGING_TTL_HOURS: u64 = 6;
const STAGING_MAX_LIFETIME_HOURS: u64 = 24;
const UPLOAD_MAX_CONCURRENCY: usize = 3;
const UPLOAD_MAX_RETRIES: u32 = 3;
const UPLOAD_RETRY_BACKOFF_MS: u64 = 2000;
const STORAGE_TIMEOUT_SECS: u64 = 30;
const COPY_POLL_INTERVAL_MS: u64 = 250;
const COPY_MAX_WAIT_SECS: u64 = 60;
const MAX_UPLOAD_SIZE_MB: usize = 20;
const IMAGE_QUALITY: u8 = 80;
const ORDER_MAX_RETRIES: u32 = 5;
const ORDER_RETRY_BACKOFF_MS: u64 = 50;
const BULK_BATCH_SIZE: usize = 50;
const BULK_CONCURRENCY: usize = 4;
const STAGING_SWEEP_INTERVAL_SECS: u64 = 3600;
const STAGING_SWEEP_OLDER_THAN_HOURS: u64 = 24;
const DB_MAX_CONNECTIONS: u32 = 10;

/// Raw configuration values.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub environment: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    // Storage
    pub storage_backend: Option<StorageBackend>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    // Staging sessions
    pub staging_ttl_hours: u64,
    pub staging_max_lifetime_hours: u64,
    // Blob uploads and copies
    pub upload_max_concurrency: usize,
    pub upload_max_retries: u32,
    pub upload_retry_backoff_ms: u64,
    pub storage_timeout_secs: u64,
    pub copy_poll_interval_ms: u64,
    pub copy_max_wait_secs: u64,
    // Transcoding
    pub max_upload_size_bytes: usize,
    pub image_quality: u8,
    pub original_max_dimension: u32,
    // Display order
    pub order_max_retries: u32,
    pub order_retry_backoff_ms: u64,
    // Bulk migration
    pub bulk_batch_size: usize,
    pub bulk_concurrency: usize,
    pub legacy_image_root: Option<String>,
    // Staging sweep
    pub staging_sweep_interval_secs: u64,
    pub staging_sweep_older_than_hours: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<IngestConfig>);

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    fn inner(&self) -> &IngestConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = IngestConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().environment.to_lowercase();
        env == "production" || env == "prod"
    }

    /// Local and development environments serve cookies without `Secure`.
    pub fn is_local(&self) -> bool {
        matches!(
            self.inner().environment.to_lowercase().as_str(),
            "local" | "dev" | "development" | "test"
        )
    }

    pub fn environment(&self) -> &str {
        &self.inner().environment
    }

    pub fn log_json(&self) -> bool {
        self.inner().log_json
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().db_max_connections
    }

    pub fn storage_backend(&self) -> Option<StorageBackend> {
        self.inner().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.inner().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.inner().aws_region.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.inner().local_storage_base_url.as_deref()
    }

    pub fn staging_ttl(&self) -> Duration {
        Duration::from_secs(self.inner().staging_ttl_hours * 3600)
    }

    pub fn staging_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.inner().staging_max_lifetime_hours * 3600)
    }

    pub fn upload_max_concurrency(&self) -> usize {
        self.inner().upload_max_concurrency
    }

    pub fn upload_max_retries(&self) -> u32 {
        self.inner().upload_max_retries
    }

    pub fn upload_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.inner().upload_retry_backoff_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.inner().storage_timeout_secs)
    }

    pub fn copy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inner().copy_poll_interval_ms)
    }

    pub fn copy_max_wait(&self) -> Duration {
        Duration::from_secs(self.inner().copy_max_wait_secs)
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.inner().max_upload_size_bytes
    }

    pub fn image_quality(&self) -> u8 {
        self.inner().image_quality
    }

    pub fn original_max_dimension(&self) -> u32 {
        self.inner().original_max_dimension
    }

    pub fn order_max_retries(&self) -> u32 {
        self.inner().order_max_retries
    }

    pub fn order_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.inner().order_retry_backoff_ms)
    }

    pub fn bulk_batch_size(&self) -> usize {
        self.inner().bulk_batch_size
    }

    pub fn bulk_concurrency(&self) -> usize {
        self.inner().bulk_concurrency
    }

    pub fn legacy_image_root(&self) -> Option<&str> {
        self.inner().legacy_image_root.as_deref()
    }

    pub fn staging_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.inner().staging_sweep_interval_secs)
    }

    pub fn staging_sweep_older_than_hours(&self) -> u64 {
        self.inner().staging_sweep_older_than_hours
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(s) => Some(s.parse::<StorageBackend>()?),
            Err(_) => None,
        };

        let max_upload_size_mb: usize = env_or("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB);

        let config = IngestConfig {
            environment,
            log_json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            staging_ttl_hours: env_or("STAGING_TTL_HOURS", STAGING_TTL_HOURS),
            staging_max_lifetime_hours: env_or(
                "STAGING_MAX_LIFETIME_HOURS",
                STAGING_MAX_LIFETIME_HOURS,
            ),
            upload_max_concurrency: env_or("UPLOAD_MAX_CONCURRENCY", UPLOAD_MAX_CONCURRENCY),
            upload_max_retries: env_or("UPLOAD_MAX_RETRIES", UPLOAD_MAX_RETRIES),
            upload_retry_backoff_ms: env_or("UPLOAD_RETRY_BACKOFF_MS", UPLOAD_RETRY_BACKOFF_MS),
            storage_timeout_secs: env_or("STORAGE_TIMEOUT_SECS", STORAGE_TIMEOUT_SECS),
            copy_poll_interval_ms: env_or("COPY_POLL_INTERVAL_MS", COPY_POLL_INTERVAL_MS),
            copy_max_wait_secs: env_or("COPY_MAX_WAIT_SECS", COPY_MAX_WAIT_SECS),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            image_quality: env_or("IMAGE_QUALITY", IMAGE_QUALITY),
            original_max_dimension: env_or(
                "ORIGINAL_MAX_DIMENSION",
                DEFAULT_ORIGINAL_MAX_DIMENSION,
            ),
            order_max_retries: env_or("ORDER_MAX_RETRIES", ORDER_MAX_RETRIES),
            order_retry_backoff_ms: env_or("ORDER_RETRY_BACKOFF_MS", ORDER_RETRY_BACKOFF_MS),
            bulk_batch_size: env_or("BULK_BATCH_SIZE", BULK_BATCH_SIZE),
            bulk_concurrency: env_or("BULK_CONCURRENCY", BULK_CONCURRENCY),
            legacy_image_root: env::var("LEGACY_IMAGE_ROOT").ok(),
            staging_sweep_interval_secs: env_or(
                "STAGING_SWEEP_INTERVAL_SECS",
                STAGING_SWEEP_INTERVAL_SECS,
            ),
            staging_sweep_older_than_hours: env_or(
                "STAGING_SWEEP_OLDER_THAN_HOURS",
                STAGING_SWEEP_OLDER_THAN_HOURS,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.upload_max_concurrency == 0 {
            return Err(anyhow::anyhow!("UPLOAD_MAX_CONCURRENCY must be at least 1"));
        }
        if self.bulk_batch_size == 0 || self.bulk_concurrency == 0 {
            return Err(anyhow::anyhow!(
                "BULK_BATCH_SIZE and BULK_CONCURRENCY must be at least 1"
            ));
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(anyhow::anyhow!("IMAGE_QUALITY must be between 1 and 100"));
        }
        if self.staging_ttl_hours == 0 || self.staging_max_lifetime_hours < self.staging_ttl_hours
        {
            return Err(anyhow::anyhow!(
                "STAGING_MAX_LIFETIME_HOURS must be at least STAGING_TTL_HOURS (> 0)"
            ));
        }
        if self.storage_backend == Some(StorageBackend::S3) && self.s3_bucket.is_none() {
            return Err(anyhow::anyhow!("S3_BUCKET must be set when STORAGE_BACKEND=s3"));
        }
        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_json: false,
            database_url: None,
            db_max_connections: DB_MAX_CONNECTIONS,
            storage_backend: Some(StorageBackend::Local),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            aws_region: None,
            local_storage_path: None,
            local_storage_base_url: None,
            staging_ttl_hours: STAGING_TTL_HOURS,
            staging_max_lifetime_hours: STAGING_MAX_LIFETIME_HOURS,
            upload_max_concurrency: UPLOAD_MAX_CONCURRENCY,
            upload_max_retries: UPLOAD_MAX_RETRIES,
            upload_retry_backoff_ms: UPLOAD_RETRY_BACKOFF_MS,
            storage_timeout_secs: STORAGE_TIMEOUT_SECS,
            copy_poll_interval_ms: COPY_POLL_INTERVAL_MS,
            copy_max_wait_secs: COPY_MAX_WAIT_SECS,
            max_upload_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            image_quality: IMAGE_QUALITY,
            original_max_dimension: DEFAULT_ORIGINAL_MAX_DIMENSION,
            order_max_retries: ORDER_MAX_RETRIES,
            order_retry_backoff_ms: ORDER_RETRY_BACKOFF_MS,
            bulk_batch_size: BULK_BATCH_SIZE,
            bulk_concurrency: BULK_CONCURRENCY,
            legacy_image_root: None,
            staging_sweep_interval_secs: STAGING_SWEEP_INTERVAL_SECS,
            staging_sweep_older_than_hours: STAGING_SWEEP_OLDER_THAN_HOURS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config(Box::default())
    }
}
