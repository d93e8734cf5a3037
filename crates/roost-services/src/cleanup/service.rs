use roost_core::Config;
use roost_storage::{sweep_expired, Storage, SweepReport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::session::{EvictionReport, TempSessionStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub sweep: SweepReport,
    pub evicted: EvictionReport,
}

/// Periodically drops expired staging sessions and the staged objects they left behind.
#[derive(Clone)]
pub struct StagingCleanupService {
    storage: Arc<dyn Storage>,
    sessions: Arc<TempSessionStore>,
    every: Duration,
    /// Staged objects older than this many hours are deleted.
    older_than_hours: u64,
    /// Deadline for each storage call made by the sweep.
    timeout: Duration,
}

impl StagingCleanupService {
    pub fn new(
        storage: Arc<dyn Storage>,
        sessions: Arc<TempSessionStore>,
        every: Duration,
        older_than_hours: u64,
    ) -> Self {
        Self {
            storage,
            sessions,
            every,
            older_than_hours,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(
        storage: Arc<dyn Storage>,
        sessions: Arc<TempSessionStore>,
        config: &Config,
    ) -> Self {
        Self::new(
            storage,
            sessions,
            config.staging_sweep_interval(),
            config.staging_sweep_older_than_hours(),
        )
        .with_timeout(config.storage_timeout())
    }

    /// Start the background cleanup task.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut cleanup_interval = interval(self.every);

            loop {
                cleanup_interval.tick().await;

                tracing::info!("Starting scheduled staging cleanup");

                match self.run_once().await {
                    Ok(report) => tracing::info!(
                        deleted = report.sweep.deleted,
                        failed = report.sweep.failed,
                        sessions = report.evicted.sessions,
                        "Staging cleanup completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Staging cleanup failed"),
                }
            }
        })
    }

    /// One pass: evict expired sessions, then sweep old staged objects.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "staging"))]
    pub async fn run_once(&self) -> Result<CleanupReport, anyhow::Error> {
        let evicted = self.sessions.evict_expired();
        let sweep = sweep_expired(self.storage.as_ref(), self.older_than_hours, self.timeout).await?;
        Ok(CleanupReport { sweep, evicted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use roost_storage::test_helpers::MockStorage;

    #[tokio::test]
    async fn test_run_once_sweeps_old_staged_objects_only() {
        let storage = Arc::new(MockStorage::new());
        storage
            .put("temp/a/gallery/new/g/original", Bytes::from_static(b"x"), "image/webp", true)
            .await
            .unwrap();
        storage
            .put("temp/b/gallery/new/h/original", Bytes::from_static(b"x"), "image/webp", true)
            .await
            .unwrap();
        storage.backdate(
            "temp/a/gallery/new/g/original",
            Utc::now() - chrono::Duration::hours(48),
        );

        let sessions = Arc::new(TempSessionStore::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            true,
        ));
        let service =
            StagingCleanupService::new(storage.clone(), sessions, Duration::from_secs(3600), 24);

        let report = service.run_once().await.unwrap();
        assert_eq!(report.sweep.scanned, 2);
        assert_eq!(report.sweep.deleted, 1);
        assert!(!storage.has_file("temp/a/gallery/new/g/original"));
        assert!(storage.has_file("temp/b/gallery/new/h/original"));
    }

    #[tokio::test]
    async fn test_run_once_gives_up_on_a_stalled_listing() {
        let storage = Arc::new(MockStorage::new());
        storage.set_list_delay(Duration::from_millis(200));
        let sessions = Arc::new(TempSessionStore::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            true,
        ));
        let service =
            StagingCleanupService::new(storage, sessions, Duration::from_secs(3600), 24)
                .with_timeout(Duration::from_millis(10));

        assert!(service.run_once().await.is_err());
    }
}
