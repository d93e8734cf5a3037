use roost_core::{AppError, EntityRef, Partition, Variant};
use roost_db::RepositoryError;
use roost_processing::{TranscodeError, ValidationError};
use roost_storage::StorageError;
use serde::Serialize;
use uuid::Uuid;

/// Failures while staging an upload.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Staging session is unknown or expired")]
    UnknownSession,

    #[error("Image {0} is not staged in this session")]
    NotStaged(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Transcode task failed: {0}")]
    Task(String),
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::UnknownSession => AppError::Validation(err.to_string()),
            StagingError::NotStaged(id) => AppError::NotFound(format!("staged image {}", id)),
            StagingError::Validation(e) => e.into(),
            StagingError::Transcode(e) => e.into(),
            StagingError::Storage(e) => e.into(),
            StagingError::Task(msg) => AppError::Internal(msg),
        }
    }
}

/// Failures from the display order engine.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Partition {partition} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { partition: Partition, attempts: u32 },

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Unexpected ordering failure: {0}")]
    Unexpected(RepositoryError),
}

impl From<RepositoryError> for OrderError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => OrderError::NotFound(msg),
            RepositoryError::InvalidData(msg) => OrderError::InvalidPosition(msg),
            other => OrderError::Unexpected(other),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound(msg) => AppError::NotFound(msg),
            OrderError::ConflictRetriesExhausted { .. } => {
                AppError::ConcurrencyConflict(err.to_string())
            }
            OrderError::InvalidPosition(msg) => AppError::Validation(msg),
            OrderError::Unexpected(e) => e.into(),
        }
    }
}

/// One reason a migration request was rejected before anything moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationProblem {
    SessionNotFound,
    NotStaged { image_id: Uuid },
    UnsupportedMime { image_id: Uuid, mime_type: String },
    MissingVariant { image_id: Uuid, variant: Variant, path: String },
    StagingUnreachable { image_id: Uuid, path: String, reason: String },
    EntityNotFound { entity: EntityRef },
    EntityMismatch { image_id: Uuid, staged_for: i64 },
}

impl std::fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationProblem::SessionNotFound => write!(f, "session not found"),
            ValidationProblem::NotStaged { image_id } => write!(f, "{} is not staged", image_id),
            ValidationProblem::UnsupportedMime {
                image_id,
                mime_type,
            } => write!(f, "{} has unsupported type {}", image_id, mime_type),
            ValidationProblem::MissingVariant {
                image_id, variant, ..
            } => write!(f, "{} is missing its {} variant", image_id, variant),
            ValidationProblem::StagingUnreachable {
                image_id, reason, ..
            } => write!(f, "{} could not be checked: {}", image_id, reason),
            ValidationProblem::EntityNotFound { entity } => write!(f, "{} does not exist", entity),
            ValidationProblem::EntityMismatch {
                image_id,
                staged_for,
            } => write!(f, "{} was staged for entity {}", image_id, staged_for),
        }
    }
}

/// Pipeline stages of a single migration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Validate,
    PlanMoves,
    ExecuteMoves,
    PersistMetadata,
    CleanupStaging,
    Done,
}

/// A destination that could not be written during a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMove {
    pub source: String,
    pub destination: String,
    pub reason: String,
}

/// Exactly which paths landed and which did not when a move batch partially failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialMove {
    /// Destination keys that were written.
    pub moved: Vec<String>,
    pub failed: Vec<FailedMove>,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Migration request is invalid: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<ValidationProblem>),

    #[error("{} of {} moves failed", .0.failed.len(), .0.failed.len() + .0.moved.len())]
    PartialFailure(PartialMove),

    /// Objects were copied but their metadata could not be written.
    #[error("Metadata write failed after {} objects were copied: {source}", .moved.len())]
    Persist {
        moved: Vec<String>,
        #[source]
        source: Box<MigrationError>,
    },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MigrationError {
    /// Stage the migration stopped in.
    pub fn stage(&self) -> MigrationStage {
        match self {
            MigrationError::Validation(_) => MigrationStage::Validate,
            MigrationError::PartialFailure(_) => MigrationStage::ExecuteMoves,
            MigrationError::Persist { .. } | MigrationError::Order(_) => {
                MigrationStage::PersistMetadata
            }
            MigrationError::Repository(_) | MigrationError::Storage(_) => MigrationStage::Validate,
        }
    }

    /// Permanent objects this failed call left behind, for [`rollback`].
    ///
    /// [`rollback`]: crate::migration::MigrationCoordinator::rollback
    pub fn rollback_paths(&self) -> &[String] {
        match self {
            MigrationError::PartialFailure(partial) => &partial.moved,
            MigrationError::Persist { moved, .. } => moved,
            _ => &[],
        }
    }
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Validation(_) => AppError::Validation(err.to_string()),
            MigrationError::PartialFailure(partial) => AppError::PartialMigrationFailure {
                succeeded: partial.moved.len(),
                failed: partial.failed.len(),
                failed_paths: partial.failed.into_iter().map(|f| f.destination).collect(),
            },
            MigrationError::Persist { source, .. } => (*source).into(),
            MigrationError::Order(e) => e.into(),
            MigrationError::Repository(e) => e.into(),
            MigrationError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::{EntityType, ImageCategory};

    #[test]
    fn test_partial_failure_maps_to_taxonomy() {
        let err = MigrationError::PartialFailure(PartialMove {
            moved: vec!["gallery/1/original/a.webp".to_string()],
            failed: vec![FailedMove {
                source: "temp/s/gallery/1/b/medium".to_string(),
                destination: "gallery/1/medium/b.webp".to_string(),
                reason: "503".to_string(),
            }],
        });
        assert_eq!(err.to_string(), "1 of 2 moves failed");
        assert_eq!(err.stage(), MigrationStage::ExecuteMoves);
        assert_eq!(err.rollback_paths(), ["gallery/1/original/a.webp".to_string()]);

        match AppError::from(err) {
            AppError::PartialMigrationFailure {
                succeeded,
                failed,
                failed_paths,
            } => {
                assert_eq!((succeeded, failed), (1, 1));
                assert_eq!(failed_paths, vec!["gallery/1/medium/b.webp".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validation_lists_every_problem() {
        let err = MigrationError::Validation(vec![
            ValidationProblem::SessionNotFound,
            ValidationProblem::EntityNotFound {
                entity: EntityRef::new(EntityType::Unit, 9),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Migration request is invalid: session not found; unit/9 does not exist"
        );
    }

    #[test]
    fn test_exhausted_retries_is_a_conflict() {
        let err = OrderError::ConflictRetriesExhausted {
            partition: Partition::new(EntityRef::new(EntityType::Property, 1), ImageCategory::Gallery),
            attempts: 5,
        };
        assert!(matches!(AppError::from(err), AppError::ConcurrencyConflict(_)));
    }
}
