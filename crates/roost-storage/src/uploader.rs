//! Bounded, retrying uploads.
//!
//! Every upload in the process goes through one shared permit pool. Retriable
//! failures are re-sent with the full buffer after a fixed backoff; anything
//! else fails on the spot.

use bytes::Bytes;
use roost_core::{Config, Variant};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::paths::{staging_variant_key, validate_key};
use crate::{Storage, StorageError, StorageResult};

/// Run one storage call under a deadline. Expiry is reported, never retried.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl UploadPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.upload_max_retries().max(1),
            backoff: config.upload_retry_backoff(),
            timeout: config.storage_timeout(),
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
        }
    }
}

/// What a successful upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub path: String,
    pub size_bytes: u64,
    pub attempts: u32,
}

/// Uploads blobs through a process-wide permit pool.
///
/// Clone it to share; clones draw from the same pool.
#[derive(Clone)]
pub struct BlobUploader {
    storage: Arc<dyn Storage>,
    permits: Arc<Semaphore>,
    policy: UploadPolicy,
}

impl BlobUploader {
    pub fn new(storage: Arc<dyn Storage>, max_concurrency: usize, policy: UploadPolicy) -> Self {
        Self {
            storage,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            policy,
        }
    }

    pub fn from_config(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self::new(
            storage,
            config.upload_max_concurrency(),
            UploadPolicy::from_config(config),
        )
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Permits currently free in the shared pool.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn upload_with_retry(
        &self,
        data: Bytes,
        path: &str,
        content_type: &str,
        overwrite: bool,
    ) -> StorageResult<UploadReceipt> {
        validate_key(path)?;
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    StorageError::Permanent("upload permit pool closed".to_string())
                })?;
                with_timeout(
                    self.policy.timeout,
                    self.storage
                        .put(path, data.clone(), content_type, overwrite),
                )
                .await
            };

            match result {
                Ok(size_bytes) => {
                    tracing::debug!(
                        attempt,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Upload complete"
                    );
                    return Ok(UploadReceipt {
                        path: path.to_string(),
                        size_bytes,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retriable() && attempt < self.policy.max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Upload failed with retriable error, backing off"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Upload failed");
                    return Err(e);
                }
            }
        }
    }

    /// Upload every variant under `{base_path}/{variant}`.
    ///
    /// On the first failure every variant already written by this call is
    /// deleted before the error is returned.
    pub async fn upload_variant_set_atomic(
        &self,
        variants: &BTreeMap<Variant, Bytes>,
        base_path: &str,
        content_type: &str,
    ) -> StorageResult<BTreeMap<Variant, UploadReceipt>> {
        let mut uploaded: BTreeMap<Variant, UploadReceipt> = BTreeMap::new();

        for (variant, data) in variants {
            let key = staging_variant_key(base_path, *variant);
            match self
                .upload_with_retry(data.clone(), &key, content_type, true)
                .await
            {
                Ok(receipt) => {
                    uploaded.insert(*variant, receipt);
                }
                Err(e) => {
                    tracing::warn!(
                        base_path = %base_path,
                        variant = %variant,
                        error = %e,
                        uploaded = uploaded.len(),
                        "Variant upload failed, removing uploaded siblings"
                    );
                    for receipt in uploaded.values() {
                        if let Err(del_err) =
                            with_timeout(self.policy.timeout, self.storage.delete(&receipt.path))
                                .await
                        {
                            tracing::error!(
                                key = %receipt.path,
                                error = %del_err,
                                "Failed to delete variant during upload cleanup"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(uploaded)
    }
}
