use roost_core::{AppError, MigrationStatus};
use roost_db::RepositoryError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Migration session {0} not found")]
    NotFound(Uuid),

    #[error("Migration session {id} is {status}")]
    InvalidState { id: Uuid, status: MigrationStatus },

    #[error("Migration session {0} is not running")]
    NotRunning(Uuid),

    #[error("Legacy source error: {0}")]
    Source(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Job task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Source(err.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => AppError::NotFound(format!("migration session {}", id)),
            JobError::InvalidState { .. } | JobError::NotRunning(_) => {
                AppError::Validation(err.to_string())
            }
            JobError::Source(msg) => AppError::PermanentStorage(msg),
            JobError::Repository(e) => e.into(),
            JobError::Task(msg) => AppError::Internal(msg),
        }
    }
}
