//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement,
//! and the error type whose retriable/permanent split drives the upload retry loop.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Rate limiting, 5xx responses, dropped connections.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Permission problems, malformed requests, anything a retry will not fix.
    #[error("Permanent storage failure: {0}")]
    Permanent(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Copy {from} -> {to} did not succeed: {reason}")]
    CopyFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether the uploader may re-send the same request.
    ///
    /// Timeouts are deliberately excluded: a timed-out call surfaces as a
    /// failure without automatic retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            StorageError::Transient(_) => true,
            StorageError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<StorageError> for roost_core::AppError {
    fn from(err: StorageError) -> Self {
        use roost_core::AppError;
        match err {
            StorageError::NotFound(key) => AppError::NotFound(key),
            StorageError::InvalidKey(msg) => AppError::Validation(msg),
            e @ (StorageError::Transient(_) | StorageError::Timeout(_)) => {
                AppError::TransientStorage(e.to_string())
            }
            e => AppError::PermanentStorage(e.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Listing / stat entry for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// State of a server-side copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed(String),
    Aborted,
}

impl CopyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CopyStatus::Pending)
    }
}

/// Handle returned when a copy is started; polled until terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyHandle {
    pub copy_id: String,
    pub from_key: String,
    pub to_key: String,
    /// Status observed when the copy was accepted.
    pub status: CopyStatus,
}

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem) implement this trait. Keys are
/// plain `/`-separated paths relative to the bucket or storage root; they must
/// not contain `..` or start with `/`. See [`crate::paths`] for the layouts
/// the engine writes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` under `storage_key` and return the stored size.
    ///
    /// When `overwrite` is false and the key exists, fails with
    /// [`StorageError::AlreadyExists`].
    async fn put(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
        overwrite: bool,
    ) -> StorageResult<u64>;

    /// Download a file by its storage key
    async fn get(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Delete a file by its storage key. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Check if a file exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Size and modification time of an object.
    async fn stat(&self, storage_key: &str) -> StorageResult<StoredObject>;

    /// Every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<StoredObject>>;

    /// Start a server-side copy. Backends that copy synchronously return a
    /// handle that is already terminal.
    async fn start_copy(&self, from_key: &str, to_key: &str) -> StorageResult<CopyHandle>;

    /// Current status of a copy started with [`Storage::start_copy`].
    async fn copy_status(&self, handle: &CopyHandle) -> StorageResult<CopyStatus> {
        Ok(handle.status.clone())
    }

    /// Publicly reachable URL for a key.
    fn public_url(&self, storage_key: &str) -> String;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retriable() {
        assert!(StorageError::Transient("503".to_string()).is_retriable());
        assert!(!StorageError::Permanent("403".to_string()).is_retriable());
        assert!(!StorageError::Timeout(Duration::from_secs(30)).is_retriable());
        assert!(!StorageError::NotFound("k".to_string()).is_retriable());
        assert!(StorageError::IoError(std::io::Error::from(std::io::ErrorKind::Interrupted))
            .is_retriable());
        assert!(!StorageError::IoError(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied
        ))
        .is_retriable());
    }

    #[test]
    fn test_copy_status_terminality() {
        assert!(!CopyStatus::Pending.is_terminal());
        assert!(CopyStatus::Success.is_terminal());
        assert!(CopyStatus::Failed("boom".to_string()).is_terminal());
        assert!(CopyStatus::Aborted.is_terminal());
    }
}
