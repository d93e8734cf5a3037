//! Roost Worker
//!
//! Background bulk migration of legacy image corpora: the resumable
//! [`BulkMigrationJob`], the [`LegacyImageSource`] it reads from, and a
//! [`JobRegistry`] for starting and steering jobs by session id.

pub mod error;
pub mod job;
pub mod registry;
pub mod source;

pub use error::JobError;
pub use job::{BulkMigrationJob, JobCommand, JobProgress};
pub use registry::JobRegistry;
pub use source::{DirectorySource, LegacyImage, LegacyImageSource};
