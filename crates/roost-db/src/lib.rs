//! Roost Database Layer
//!
//! Persistence ports used by the ingestion engine and their Postgres and
//! in-memory implementations.

pub mod db;

// Re-exports: ports and their implementations
pub use db::{
    CoverImage, DocumentDescriptor, EntityDirectory, EntityRepository, ImageRecordRepository,
    ImageRecordStore, InMemoryEntityDirectory, InMemoryImageStore, InMemorySessionStore,
    MigrationSessionRepository, MigrationSessionStore, OrderUpdate, PartitionPlanner,
    RepositoryError, WriteGuard,
};

// Re-exports: setup and transaction utilities
pub use db::setup::setup_database;
pub use db::transaction::TransactionGuard;
