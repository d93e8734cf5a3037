//! Age-based removal of abandoned staging objects.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::paths::staging_root;
use crate::uploader::with_timeout;
use crate::{Storage, StorageResult};

/// Counts from one staging sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Delete staging objects last modified more than `older_than_hours` ago.
///
/// Every storage call runs under `timeout`. Listing failures abort the
/// sweep; a failure on a single object is logged and the sweep moves on.
/// A window too large to represent expires nothing.
pub async fn sweep_expired(
    storage: &dyn Storage,
    older_than_hours: u64,
    timeout: Duration,
) -> StorageResult<SweepReport> {
    let cutoff = i64::try_from(older_than_hours)
        .ok()
        .and_then(ChronoDuration::try_hours)
        .and_then(|age| Utc::now().checked_sub_signed(age));
    let objects = with_timeout(timeout, storage.list(&staging_root())).await?;

    let mut report = SweepReport {
        scanned: objects.len(),
        ..SweepReport::default()
    };

    let Some(cutoff) = cutoff else {
        tracing::warn!(older_than_hours, "Sweep window out of range; nothing expires");
        return Ok(report);
    };

    for object in objects.into_iter().filter(|o| o.last_modified < cutoff) {
        match with_timeout(timeout, storage.delete(&object.key)).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(key = %object.key, error = %e, "Failed to delete expired staging object");
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        deleted = report.deleted,
        failed = report.failed,
        older_than_hours,
        "Staging sweep finished"
    );

    Ok(report)
}


#[cfg(all(test, feature = "storage-local"))]
mod local_tests {
    use super::*;
    use crate::LocalStorage;
    use bytes::Bytes;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_fresh_objects_survive() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost/media".to_string())
            .await
            .unwrap();
        storage
            .put("temp/s/gallery/new/g/original", Bytes::from_static(b"x"), "image/webp", true)
            .await
            .unwrap();
        storage
            .put("gallery/1/original/g.webp", Bytes::from_static(b"x"), "image/webp", true)
            .await
            .unwrap();

        let report = sweep_expired(&storage, 24, TIMEOUT).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.deleted, 0);

        // A zero-hour window treats everything staged as expired.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let report = sweep_expired(&storage, 0, TIMEOUT).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(storage.exists("gallery/1/original/g.webp").await.unwrap());
    }
}
