//! Repositories for image metadata, entity fields and migration sessions
//!
//! Each port is an `#[async_trait]` trait with a Postgres implementation and
//! an in-memory one. The engine depends only on the traits.

pub mod entities;
pub mod error;
pub mod images;
pub mod memory;
pub mod sessions;
pub mod setup;
pub mod transaction;

pub use entities::{CoverImage, DocumentDescriptor, EntityDirectory, EntityRepository};
pub use error::RepositoryError;
pub use images::{ImageRecordRepository, ImageRecordStore, OrderUpdate, PartitionPlanner, WriteGuard};
pub use memory::{InMemoryEntityDirectory, InMemoryImageStore, InMemorySessionStore};
pub use sessions::{MigrationSessionRepository, MigrationSessionStore};
