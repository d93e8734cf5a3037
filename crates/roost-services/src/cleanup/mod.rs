mod service;

pub use service::{CleanupReport, StagingCleanupService};
