//! In-memory storage with fault injection, for tests in this and downstream crates.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::traits::{CopyHandle, CopyStatus, StoredObject};
use crate::{Storage, StorageBackend, StorageError, StorageResult};

/// Kind of error an injected fault raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone)]
struct Fault {
    pattern: String,
    kind: FaultKind,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    files: HashMap<String, StoredFile>,
    put_faults: Vec<Fault>,
    delete_faults: Vec<String>,
    copy_failures: Vec<(String, String)>,
    pending_polls: u32,
    copies: HashMap<String, (u32, CopyStatus)>,
    put_attempts: HashMap<String, usize>,
}

/// Mock storage implementation that keeps objects in memory
pub struct MockStorage {
    state: Arc<Mutex<State>>,
    put_delay: Mutex<Option<Duration>>,
    list_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            put_delay: Mutex::new(None),
            list_delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail puts whose key contains `pattern`, `times` times (forever if `None`).
    pub fn fail_puts(&self, pattern: &str, kind: FaultKind, times: Option<u32>) {
        self.state.lock().unwrap().put_faults.push(Fault {
            pattern: pattern.to_string(),
            kind,
            remaining: times,
        });
    }

    /// Report copies whose destination contains `pattern` as failed.
    pub fn fail_copies(&self, pattern: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .copy_failures
            .push((pattern.to_string(), reason.to_string()));
    }

    /// Fail deletes whose key contains `pattern`.
    pub fn fail_deletes(&self, pattern: &str) {
        self.state
            .lock()
            .unwrap()
            .delete_faults
            .push(pattern.to_string());
    }

    /// Drop every configured put, copy and delete fault.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.put_faults.clear();
        state.delete_faults.clear();
        state.copy_failures.clear();
    }

    /// Copies report `Pending` for this many polls before finishing.
    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().unwrap().pending_polls = polls;
    }

    /// Hold each put for `delay`, to observe concurrency limits.
    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    /// Hold each listing for `delay`.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_file(&self, key: &str, data: Vec<u8>) {
        self.state.lock().unwrap().files.insert(
            key.to_string(),
            StoredFile {
                data: Bytes::from(data),
                last_modified: Utc::now(),
            },
        );
    }

    /// Pretend `key` was last written at `when`.
    pub fn backdate(&self, key: &str, when: DateTime<Utc>) {
        if let Some(file) = self.state.lock().unwrap().files.get_mut(key) {
            file.last_modified = when;
        }
    }

    pub fn has_file(&self, key: &str) -> bool {
        self.state.lock().unwrap().files.contains_key(key)
    }

    pub fn get_file(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(key)
            .map(|f| f.data.to_vec())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().unwrap().files.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    pub fn put_attempts(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .put_attempts
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of puts observed running at once.
    pub fn peak_concurrent_puts(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn take_put_fault(&self, key: &str) -> Option<FaultKind> {
        let mut state = self.state.lock().unwrap();
        *state.put_attempts.entry(key.to_string()).or_insert(0) += 1;
        for fault in state.put_faults.iter_mut() {
            if !key.contains(&fault.pattern) {
                continue;
            }
            match fault.remaining {
                None => return Some(fault.kind),
                Some(0) => continue,
                Some(ref mut n) => {
                    *n -= 1;
                    return Some(fault.kind);
                }
            }
        }
        None
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn put(
        &self,
        storage_key: &str,
        data: Bytes,
        _content_type: &str,
        overwrite: bool,
    ) -> StorageResult<u64> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.take_put_fault(storage_key) {
            Some(FaultKind::Transient) => Err(StorageError::Transient(format!(
                "503 Slow Down: {}",
                storage_key
            ))),
            Some(FaultKind::Permanent) => Err(StorageError::Permanent(format!(
                "403 Access Denied: {}",
                storage_key
            ))),
            None => {
                let mut state = self.state.lock().unwrap();
                if !overwrite && state.files.contains_key(storage_key) {
                    Err(StorageError::AlreadyExists(storage_key.to_string()))
                } else {
                    let size = data.len() as u64;
                    state.files.insert(
                        storage_key.to_string(),
                        StoredFile {
                            data,
                            last_modified: Utc::now(),
                        },
                    );
                    Ok(size)
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        self.get_file(storage_key)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.delete_faults.iter().any(|p| storage_key.contains(p)) {
            return Err(StorageError::Permanent(format!(
                "delete refused: {}",
                storage_key
            )));
        }
        state.files.remove(storage_key);
        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Ok(self.has_file(storage_key))
    }

    async fn stat(&self, storage_key: &str) -> StorageResult<StoredObject> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(storage_key)
            .map(|f| StoredObject {
                key: storage_key.to_string(),
                size_bytes: f.data.len() as u64,
                last_modified: f.last_modified,
            })
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StoredObject>> {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        let mut objects: Vec<StoredObject> = state
            .files
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, f)| StoredObject {
                key: k.clone(),
                size_bytes: f.data.len() as u64,
                last_modified: f.last_modified,
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn start_copy(&self, from_key: &str, to_key: &str) -> StorageResult<CopyHandle> {
        let mut state = self.state.lock().unwrap();
        let source = state
            .files
            .get(from_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(from_key.to_string()))?;

        let failure = state
            .copy_failures
            .iter()
            .find(|(pattern, _)| to_key.contains(pattern.as_str()))
            .map(|(_, reason)| reason.clone());

        let final_status = match failure {
            Some(reason) => CopyStatus::Failed(reason),
            None => {
                state.files.insert(
                    to_key.to_string(),
                    StoredFile {
                        data: source.data,
                        last_modified: Utc::now(),
                    },
                );
                CopyStatus::Success
            }
        };

        let copy_id = Uuid::new_v4().to_string();
        let pending = state.pending_polls;
        let status = if pending > 0 {
            state
                .copies
                .insert(copy_id.clone(), (pending, final_status));
            CopyStatus::Pending
        } else {
            final_status
        };

        Ok(CopyHandle {
            copy_id,
            from_key: from_key.to_string(),
            to_key: to_key.to_string(),
            status,
        })
    }

    async fn copy_status(&self, handle: &CopyHandle) -> StorageResult<CopyStatus> {
        let mut state = self.state.lock().unwrap();
        match state.copies.get_mut(&handle.copy_id) {
            Some((remaining, final_status)) => {
                if *remaining > 1 {
                    *remaining -= 1;
                    Ok(CopyStatus::Pending)
                } else {
                    Ok(final_status.clone())
                }
            }
            None => Ok(handle.status.clone()),
        }
    }

    fn public_url(&self, storage_key: &str) -> String {
        format!("https://example.com/{}", storage_key)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
