//! Bulk migration of a legacy image corpus.
//!
//! A job walks its source in fixed-size batches. Each batch stages its items
//! through the regular upload pipeline, then migrates them per entity through
//! the coordinator. Pause, resume and cancel are honoured between batches,
//! and the session is saved after every batch so a restarted job skips what
//! is already done.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use roost_core::{
    Config, EntityRef, FailedItem, MigrationSession, MigrationStatus, OrderingStrategy,
    StagedImage,
};
use roost_db::MigrationSessionStore;
use roost_services::{
    MigrationCoordinator, MigrationError, MigrationRequest, MigrationSummary, TempSessionStore,
    UploadRequest, UploadStager,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::JobError;
use crate::source::{LegacyImage, LegacyImageSource};

/// What the controller wants the job to do at its next batch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    Run,
    Pause,
    Cancel,
}

/// Pollable snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub id: Uuid,
    pub status: MigrationStatus,
    pub total: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub elapsed_ms: u64,
    pub failed_items: Vec<FailedItem>,
    pub error: Option<String>,
}

impl From<&MigrationSession> for JobProgress {
    fn from(session: &MigrationSession) -> Self {
        let elapsed_ms = session
            .started_at
            .map(|started| {
                let until = session.finished_at.unwrap_or_else(Utc::now);
                (until - started).num_milliseconds().max(0) as u64
            })
            .unwrap_or(0);

        Self {
            id: session.id,
            status: session.status,
            total: session.total,
            processed: session.processed,
            succeeded: session.succeeded,
            failed: session.failed,
            elapsed_ms,
            failed_items: session.failed_items.clone(),
            error: session.error.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    succeeded: Vec<String>,
    failed: Vec<FailedItem>,
    migrated_paths: Vec<String>,
}

impl BatchOutcome {
    fn fail(&mut self, item: &LegacyImage, reason: String) {
        tracing::warn!(source = %item.source_id, reason = %reason, "Legacy image failed");
        self.failed.push(FailedItem {
            source: item.source_id.clone(),
            reason,
        });
    }

    fn apply_to(self, session: &mut MigrationSession) {
        session.processed += (self.succeeded.len() + self.failed.len()) as i64;
        session.succeeded += self.succeeded.len() as i64;
        session.failed += self.failed.len() as i64;
        session.completed_sources.extend(self.succeeded);
        session.failed_items.extend(self.failed);
        session.migrated_paths.extend(self.migrated_paths);
        session.updated_at = Utc::now();
    }
}

#[derive(Clone)]
pub struct BulkMigrationJob {
    source: Arc<dyn LegacyImageSource>,
    sessions: Arc<TempSessionStore>,
    stager: UploadStager,
    coordinator: Arc<MigrationCoordinator>,
    store: Arc<dyn MigrationSessionStore>,
    concurrency: usize,
    strategy: OrderingStrategy,
}

impl BulkMigrationJob {
    pub fn new(
        source: Arc<dyn LegacyImageSource>,
        sessions: Arc<TempSessionStore>,
        stager: UploadStager,
        coordinator: Arc<MigrationCoordinator>,
        store: Arc<dyn MigrationSessionStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            sessions,
            stager,
            coordinator,
            store,
            concurrency: concurrency.max(1),
            strategy: OrderingStrategy::Pessimistic,
        }
    }

    pub fn from_config(
        source: Arc<dyn LegacyImageSource>,
        sessions: Arc<TempSessionStore>,
        stager: UploadStager,
        coordinator: Arc<MigrationCoordinator>,
        store: Arc<dyn MigrationSessionStore>,
        config: &Config,
    ) -> Self {
        Self::new(
            source,
            sessions,
            stager,
            coordinator,
            store,
            config.bulk_concurrency(),
        )
    }

    pub fn with_strategy(mut self, strategy: OrderingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn coordinator(&self) -> &MigrationCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn MigrationSessionStore> {
        &self.store
    }

    /// Drive `session` until it completes, fails, is cancelled, or is paused
    /// and its controller goes away.
    #[tracing::instrument(skip(self, session, control), fields(migration.id = %session.id))]
    pub async fn run(
        &self,
        mut session: MigrationSession,
        mut control: watch::Receiver<JobCommand>,
    ) -> Result<MigrationSession, JobError> {
        if session.status.is_terminal() {
            return Err(JobError::InvalidState {
                id: session.id,
                status: session.status,
            });
        }

        let items = match self.source.list().await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Could not list legacy images");
                session.error = Some(e.to_string());
                session.transition(MigrationStatus::Failed);
                self.store.save(&session).await?;
                return Ok(session);
            }
        };

        // Failed items stay failed; only a fresh session retries them.
        let done: HashSet<String> = session
            .completed_sources
            .iter()
            .chain(session.failed_items.iter().map(|f| &f.source))
            .cloned()
            .collect();
        let pending: Vec<LegacyImage> = items
            .iter()
            .filter(|item| !done.contains(&item.source_id))
            .cloned()
            .collect();

        session.total = items.len() as i64;
        session.transition(MigrationStatus::Running);
        self.store.save(&session).await?;
        tracing::info!(
            total = session.total,
            pending = pending.len(),
            skipped = items.len() - pending.len(),
            batch_size = session.batch_size,
            "Bulk migration started"
        );

        let batch_size = session.batch_size.max(1) as usize;
        for (index, batch) in pending.chunks(batch_size).enumerate() {
            if !self.checkpoint(&mut session, &mut control).await? {
                return Ok(session);
            }

            let outcome = self.process_batch(session.id, batch).await;
            outcome.apply_to(&mut session);
            self.store.save(&session).await?;

            tracing::info!(
                batch = index + 1,
                processed = session.processed,
                succeeded = session.succeeded,
                failed = session.failed,
                "Batch finished"
            );
        }

        session.transition(MigrationStatus::Completed);
        self.store.save(&session).await?;
        tracing::info!(
            succeeded = session.succeeded,
            failed = session.failed,
            "Bulk migration completed"
        );
        Ok(session)
    }

    /// Returns `false` when the run must stop here.
    async fn checkpoint(
        &self,
        session: &mut MigrationSession,
        control: &mut watch::Receiver<JobCommand>,
    ) -> Result<bool, JobError> {
        loop {
            let command = *control.borrow_and_update();
            match command {
                JobCommand::Run => {
                    if session.status == MigrationStatus::Paused {
                        session.transition(MigrationStatus::Running);
                        self.store.save(session).await?;
                        tracing::info!("Bulk migration resumed");
                    }
                    return Ok(true);
                }
                JobCommand::Cancel => {
                    session.transition(MigrationStatus::Cancelled);
                    self.store.save(session).await?;
                    tracing::info!(processed = session.processed, "Bulk migration cancelled");
                    return Ok(false);
                }
                JobCommand::Pause => {
                    if session.status != MigrationStatus::Paused {
                        session.transition(MigrationStatus::Paused);
                        self.store.save(session).await?;
                        tracing::info!(processed = session.processed, "Bulk migration paused");
                    }
                    if control.changed().await.is_err() {
                        // Controller gone; the saved session can be resumed later.
                        return Ok(false);
                    }
                }
            }
        }
    }

    async fn process_batch(&self, job_id: Uuid, batch: &[LegacyImage]) -> BatchOutcome {
        let grant = self.sessions.get_or_create(None);
        let session_id = grant.session_id;
        let mut outcome = BatchOutcome::default();

        // Each task owns its inputs so the batch future stays spawnable.
        let staging: Vec<_> = batch
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, item)| {
                let job = self.clone();
                let session_id = session_id.clone();
                async move { (index, job.stage_one(&session_id, &item).await) }
            })
            .collect();
        let results: Vec<(usize, Result<StagedImage, String>)> = stream::iter(staging)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut staged: Vec<(usize, StagedImage)> = Vec::new();
        for (index, result) in results {
            match result {
                Ok(image) => staged.push((index, image)),
                Err(reason) => outcome.fail(&batch[index], reason),
            }
        }
        staged.sort_by_key(|(index, _)| *index);

        let mut groups: Vec<(EntityRef, Vec<(usize, StagedImage)>)> = Vec::new();
        for (index, image) in staged {
            let entity = batch[index].entity;
            match groups.iter_mut().find(|(e, _)| *e == entity) {
                Some((_, members)) => members.push((index, image)),
                None => groups.push((entity, vec![(index, image)])),
            }
        }

        let migrations: Vec<_> = groups
            .into_iter()
            .map(|(entity, members)| {
                let job = self.clone();
                let session_id = session_id.clone();
                async move {
                    let result = job
                        .migrate_group(job_id, &session_id, entity, &members)
                        .await;
                    (members, result)
                }
            })
            .collect();
        let migrated: Vec<(Vec<(usize, StagedImage)>, Result<MigrationSummary, MigrationError>)> =
            stream::iter(migrations)
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (members, result) in migrated {
            match result {
                Ok(summary) => {
                    outcome.migrated_paths.extend(summary.moved_paths);
                    outcome
                        .succeeded
                        .extend(members.iter().map(|(i, _)| batch[*i].source_id.clone()));
                }
                Err(e) => {
                    outcome
                        .migrated_paths
                        .extend(e.rollback_paths().iter().cloned());
                    for (index, image) in members {
                        outcome.fail(&batch[index], e.to_string());
                        if let Err(discard) = self.stager.discard(&session_id, image.image_id).await {
                            tracing::debug!(error = %discard, "Staged image already gone");
                        }
                    }
                }
            }
        }

        outcome
    }

    async fn stage_one(&self, session_id: &str, item: &LegacyImage) -> Result<StagedImage, String> {
        let data = self.source.read(item).await.map_err(|e| e.to_string())?;
        let request = UploadRequest {
            category: item.category,
            target_entity_id: Some(item.entity.entity_id),
            file_name: item.file_name.clone(),
            content_type: item.content_type.clone(),
            data,
        };
        self.stager
            .stage_upload(session_id, request)
            .await
            .map(|result| result.image)
            .map_err(|e| e.to_string())
    }

    async fn migrate_group(
        &self,
        job_id: Uuid,
        session_id: &str,
        entity: EntityRef,
        members: &[(usize, StagedImage)],
    ) -> Result<MigrationSummary, MigrationError> {
        let ids: Vec<Uuid> = members.iter().map(|(_, image)| image.image_id).collect();
        let request = MigrationRequest {
            session_id: session_id.to_string(),
            image_ids: ids.clone(),
            entity,
            order_hint: Some(ids),
            uploaded_by: Some(format!("bulk-migration/{}", job_id)),
            strategy: self.strategy,
        };
        self.coordinator.migrate(&request).await
    }
}
