//! Roost Storage Library
//!
//! Object storage for staged and permanent image variants: the `Storage`
//! trait with local filesystem and S3 backends, plus the retrying uploader,
//! copy-based transfers and the staging sweep built on top of it.
//!
//! # Storage key format
//!
//! - **Staging**: `temp/{sessionId}/{category}/{entityId|new}/{imageGuid}/{variant}`
//! - **Permanent**: `{category}/{entityId}/{variant}/{imageGuid}.{ext}`
//!
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in
//! the `paths` module so all backends stay consistent.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod paths;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod sweep;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod traits;
pub mod transfer;
pub mod uploader;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use roost_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use sweep::{sweep_expired, SweepReport};
pub use traits::{
    CopyHandle, CopyStatus, Storage, StorageError, StorageResult, StoredObject,
};
pub use transfer::{BlobTransfer, TransferPolicy};
pub use uploader::{BlobUploader, UploadPolicy, UploadReceipt};
