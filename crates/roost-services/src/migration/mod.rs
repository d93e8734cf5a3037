mod coordinator;

pub use coordinator::{
    ImageMovePlan, MigratedImage, MigrationCoordinator, MigrationRequest, MigrationSummary,
    PlannedMove, RollbackReport, ValidatedRequest,
};
