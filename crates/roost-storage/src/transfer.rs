//! Copy/move/delete over a [`Storage`] backend.
//!
//! Moves are copy-then-poll: a copy is started, its status polled until it
//! reaches a terminal state, and only a successful copy may be followed by a
//! delete of the source. Batch operations report per-path outcomes and never
//! fail as a whole.

use futures::stream::{self, StreamExt};
use roost_core::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::traits::{CopyHandle, CopyStatus, StoredObject};
use crate::uploader::with_timeout;
use crate::{Storage, StorageError, StorageResult};

const BATCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct TransferPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub timeout: Duration,
}

impl TransferPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.copy_poll_interval(),
            max_wait: config.copy_max_wait(),
            timeout: config.storage_timeout(),
        }
    }
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_wait: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct BlobTransfer {
    storage: Arc<dyn Storage>,
    policy: TransferPolicy,
}

impl BlobTransfer {
    pub fn new(storage: Arc<dyn Storage>, policy: TransferPolicy) -> Self {
        Self { storage, policy }
    }

    pub fn from_config(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self::new(storage, TransferPolicy::from_config(config))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    async fn await_copy(&self, handle: &CopyHandle) -> StorageResult<CopyStatus> {
        let deadline = Instant::now() + self.policy.max_wait;
        let mut status = handle.status.clone();

        while !status.is_terminal() {
            if Instant::now() >= deadline {
                return Err(StorageError::Timeout(self.policy.max_wait));
            }
            tokio::time::sleep(self.policy.poll_interval).await;
            status = with_timeout(self.policy.timeout, self.storage.copy_status(handle)).await?;
        }

        Ok(status)
    }

    /// Copy `src` to `dst`, wait for the copy to finish, and optionally delete `src`.
    #[tracing::instrument(skip(self))]
    pub async fn move_object(&self, src: &str, dst: &str, delete_source: bool) -> StorageResult<()> {
        let handle = with_timeout(self.policy.timeout, self.storage.start_copy(src, dst)).await?;

        match self.await_copy(&handle).await? {
            CopyStatus::Success => {}
            CopyStatus::Failed(reason) => {
                return Err(StorageError::CopyFailed {
                    from: src.to_string(),
                    to: dst.to_string(),
                    reason,
                });
            }
            CopyStatus::Aborted | CopyStatus::Pending => {
                return Err(StorageError::CopyFailed {
                    from: src.to_string(),
                    to: dst.to_string(),
                    reason: "copy aborted".to_string(),
                });
            }
        }

        if delete_source {
            // The destination is complete; a stale source is left for the sweep.
            if let Err(e) = with_timeout(self.policy.timeout, self.storage.delete(src)).await {
                tracing::warn!(error = %e, "Copy succeeded but source delete failed");
            }
        }

        Ok(())
    }

    /// Move every pair concurrently. No rollback: each source maps to its own outcome.
    pub async fn move_batch(
        &self,
        pairs: &[(String, String)],
        delete_source: bool,
    ) -> HashMap<String, StorageResult<()>> {
        stream::iter(pairs.iter().cloned())
            .map(|(src, dst)| async move {
                let outcome = self.move_object(&src, &dst, delete_source).await;
                (src, outcome)
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await
    }

    pub async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        with_timeout(self.policy.timeout, self.storage.delete(storage_key)).await
    }

    /// Delete every key; `true` for keys that are gone afterwards.
    pub async fn delete_multiple(&self, keys: &[String]) -> HashMap<String, bool> {
        stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let ok = match self.delete(&key).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Delete failed");
                        false
                    }
                };
                (key, ok)
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await
    }

    pub async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        with_timeout(self.policy.timeout, self.storage.exists(storage_key)).await
    }

    pub async fn stat(&self, storage_key: &str) -> StorageResult<StoredObject> {
        with_timeout(self.policy.timeout, self.storage.stat(storage_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockStorage;

    fn transfer(storage: Arc<MockStorage>) -> BlobTransfer {
        BlobTransfer::new(
            storage,
            TransferPolicy {
                poll_interval: Duration::from_millis(1),
                max_wait: Duration::from_secs(2),
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_move_keeps_source_unless_asked() {
        let storage = Arc::new(MockStorage::new());
        storage.set_file("temp/a", b"a".to_vec());
        storage.set_file("temp/b", b"b".to_vec());
        let transfer = transfer(storage.clone());

        transfer.move_object("temp/a", "perm/a", false).await.unwrap();
        assert!(storage.has_file("temp/a"));
        assert!(storage.has_file("perm/a"));

        transfer.move_object("temp/b", "perm/b", true).await.unwrap();
        assert!(!storage.has_file("temp/b"));
        assert_eq!(storage.get_file("perm/b").unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_move_polls_pending_copy_to_completion() {
        let storage = Arc::new(MockStorage::new());
        storage.set_file("temp/a", b"a".to_vec());
        storage.set_pending_polls(3);

        transfer(storage.clone())
            .move_object("temp/a", "perm/a", true)
            .await
            .unwrap();
        assert!(storage.has_file("perm/a"));
        assert!(!storage.has_file("temp/a"));
    }

    #[tokio::test]
    async fn test_failed_copy_never_deletes_source() {
        let storage = Arc::new(MockStorage::new());
        storage.set_file("temp/a", b"a".to_vec());
        storage.fail_copies("perm/a", "checksum mismatch");

        let result = transfer(storage.clone())
            .move_object("temp/a", "perm/a", true)
            .await;
        assert!(matches!(result, Err(StorageError::CopyFailed { .. })));
        assert!(storage.has_file("temp/a"));
        assert!(!storage.has_file("perm/a"));
    }

    #[tokio::test]
    async fn test_move_batch_reports_each_path() {
        let storage = Arc::new(MockStorage::new());
        storage.set_file("temp/a", b"a".to_vec());
        storage.set_file("temp/b", b"b".to_vec());
        storage.fail_copies("perm/b", "boom");

        let pairs = vec![
            ("temp/a".to_string(), "perm/a".to_string()),
            ("temp/b".to_string(), "perm/b".to_string()),
            ("temp/missing".to_string(), "perm/c".to_string()),
        ];
        let outcomes = transfer(storage.clone()).move_batch(&pairs, false).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes["temp/a"].is_ok());
        assert!(outcomes["temp/b"].is_err());
        assert!(matches!(outcomes["temp/missing"], Err(StorageError::NotFound(_))));
        // No rollback of the path that did succeed.
        assert!(storage.has_file("perm/a"));
    }

    #[tokio::test]
    async fn test_delete_multiple_never_raises() {
        let storage = Arc::new(MockStorage::new());
        storage.set_file("a", b"a".to_vec());
        storage.set_file("locked/b", b"b".to_vec());
        storage.fail_deletes("locked/");

        let keys = vec!["a".to_string(), "locked/b".to_string(), "gone".to_string()];
        let outcomes = transfer(storage.clone()).delete_multiple(&keys).await;

        assert_eq!(outcomes["a"], true);
        assert_eq!(outcomes["locked/b"], false);
        assert_eq!(outcomes["gone"], true);
    }
}
