//! Roost Core Library
//!
//! Domain models, the category policy table, error types and configuration
//! shared by every Roost crate. Nothing in here performs I/O apart from
//! reading the environment in [`Config::from_env`].

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, IngestConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{
    CategoryPolicies, CategoryPolicy, EntityId, EntityRef, EntityType, FailedItem, ImageCategory,
    ImageId, MigrationSession, MigrationStatus, MimeKind, NewImageRecord, OrderingStrategy,
    Partition, PermanentImageRecord, PersistKind, PolicyError, StagedImage, Variant,
};
pub use storage_types::StorageBackend;
