//! Roost Services Layer
//!
//! Orchestration on top of storage, processing and the repositories: the
//! staging session registry, the upload stager, the display order engine,
//! the migration coordinator and the staging cleanup loop. Callers (an HTTP
//! layer, the bulk worker, the CLI) talk to these types only.

pub mod cleanup;
pub mod error;
pub mod migration;
pub mod ordering;
pub mod session;
pub mod upload;

pub use cleanup::{CleanupReport, StagingCleanupService};
pub use error::{
    FailedMove, MigrationError, MigrationStage, OrderError, PartialMove, StagingError,
    ValidationProblem,
};
pub use migration::{
    ImageMovePlan, MigratedImage, MigrationCoordinator, MigrationRequest, MigrationSummary,
    PlannedMove, RollbackReport, ValidatedRequest,
};
pub use ordering::{DisplayOrderEngine, OrderMap};
pub use session::{SessionCookie, SessionGrant, TempSessionStore};
pub use upload::{UploadRequest, UploadResult, UploadStager};
