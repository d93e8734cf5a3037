use dashmap::DashMap;
use roost_core::{Config, MigrationSession, MigrationStatus};
use roost_db::MigrationSessionStore;
use roost_services::RollbackReport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{BulkMigrationJob, JobCommand, JobProgress};

struct RunningJob {
    control: watch::Sender<JobCommand>,
    task: JoinHandle<Result<MigrationSession, JobError>>,
}

/// Starts bulk jobs and routes control commands to them by session id.
///
/// Sessions live in the [`MigrationSessionStore`]; the registry only tracks
/// the tasks running in this process.
pub struct JobRegistry {
    job: BulkMigrationJob,
    running: DashMap<Uuid, RunningJob>,
    batch_size: usize,
}

impl JobRegistry {
    pub fn new(job: BulkMigrationJob, batch_size: usize) -> Self {
        Self {
            job,
            running: DashMap::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(job: BulkMigrationJob, config: &Config) -> Self {
        Self::new(job, config.bulk_batch_size())
    }

    fn store(&self) -> &Arc<dyn MigrationSessionStore> {
        self.job.store()
    }

    async fn load(&self, id: Uuid) -> Result<MigrationSession, JobError> {
        self.store().get(id).await?.ok_or(JobError::NotFound(id))
    }

    fn spawn(&self, session: MigrationSession, command: JobCommand) {
        let id = session.id;
        let (control, receiver) = watch::channel(command);
        let job = self.job.clone();
        let task = tokio::spawn(async move {
            let result = job.run(session, receiver).await;
            if let Err(e) = &result {
                tracing::error!(migration.id = %id, error = %e, "Bulk migration stopped");
            }
            result
        });
        self.running.insert(id, RunningJob { control, task });
    }

    /// Whether a task for `id` is still live in this process.
    pub fn is_running(&self, id: Uuid) -> bool {
        self.running
            .get(&id)
            .map(|job| !job.task.is_finished())
            .unwrap_or(false)
    }

    /// `false` when no live task runs `id` in this process.
    fn send(&self, id: Uuid, command: JobCommand) -> bool {
        match self.running.get(&id) {
            Some(job) if !job.task.is_finished() => job.control.send(command).is_ok(),
            _ => false,
        }
    }

    /// Create a session and start working through the source.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<Uuid, JobError> {
        let session = MigrationSession::new(self.batch_size as i32);
        self.store().save(&session).await?;
        let id = session.id;
        self.spawn(session, JobCommand::Run);
        tracing::info!(migration.id = %id, "Bulk migration queued");
        Ok(id)
    }

    pub fn pause(&self, id: Uuid) -> Result<(), JobError> {
        if self.send(id, JobCommand::Pause) {
            Ok(())
        } else {
            Err(JobError::NotRunning(id))
        }
    }

    /// Continue a paused job, or pick up a session interrupted by a restart.
    pub async fn resume(&self, id: Uuid) -> Result<(), JobError> {
        if self.send(id, JobCommand::Run) {
            return Ok(());
        }

        let session = self.load(id).await?;
        if session.status.is_terminal() {
            return Err(JobError::InvalidState {
                id,
                status: session.status,
            });
        }
        tracing::info!(migration.id = %id, processed = session.processed, "Restarting bulk migration");
        self.spawn(session, JobCommand::Run);
        Ok(())
    }

    pub async fn cancel(&self, id: Uuid) -> Result<(), JobError> {
        if self.send(id, JobCommand::Cancel) {
            return Ok(());
        }

        let mut session = self.load(id).await?;
        if !session.transition(MigrationStatus::Cancelled) {
            return Err(JobError::InvalidState {
                id,
                status: session.status,
            });
        }
        self.store().save(&session).await?;
        Ok(())
    }

    pub async fn progress(&self, id: Uuid) -> Result<JobProgress, JobError> {
        Ok(JobProgress::from(&self.load(id).await?))
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<JobProgress>, JobError> {
        Ok(self
            .store()
            .list_recent(limit)
            .await?
            .iter()
            .map(JobProgress::from)
            .collect())
    }

    /// Wait for the task running `id` to stop and return its final session.
    ///
    /// The job's controller goes away, so a paused job stops where it is
    /// and can be resumed later from the store.
    pub async fn wait(&self, id: Uuid) -> Result<MigrationSession, JobError> {
        match self.running.remove(&id) {
            Some((_, RunningJob { control, task })) => {
                drop(control);
                task.await.map_err(|e| JobError::Task(e.to_string()))?
            }
            None => self.load(id).await,
        }
    }

    /// Undo everything the session recorded as migrated: rows and descriptors
    /// are withdrawn, then the permanent objects are deleted.
    ///
    /// Only for jobs with no live task; cancel a paused job first. Paths that
    /// could not be undone stay recorded so the call can be repeated.
    #[tracing::instrument(skip(self))]
    pub async fn rollback(&self, id: Uuid) -> Result<RollbackReport, JobError> {
        let mut session = self.load(id).await?;
        if self.is_running(id) {
            return Err(JobError::InvalidState {
                id,
                status: session.status,
            });
        }

        let report = self.job.coordinator().rollback(&session.migrated_paths).await;
        session.migrated_paths = report.failed.clone();
        session.updated_at = chrono::Utc::now();
        self.store().save(&session).await?;
        Ok(report)
    }
}
