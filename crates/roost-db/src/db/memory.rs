//! In-memory implementations of the repository ports.
//!
//! Used when no `DATABASE_URL` is configured and by the engine tests. Writes
//! are atomic under one table lock; partition locks are per-key mutexes so
//! different partitions never wait on each other.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use roost_core::{
    EntityRef, ImageCategory, ImageId, MigrationSession, NewImageRecord, Partition,
    PermanentImageRecord,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::entities::{CoverImage, DocumentDescriptor, EntityDirectory};
use super::error::RepositoryError;
use super::images::{ImageRecordStore, OrderUpdate, PartitionPlanner, WriteGuard};
use super::sessions::MigrationSessionStore;

fn sort_partition(rows: &mut [PermanentImageRecord]) {
    rows.sort_by_key(|r| (r.display_order.is_none(), r.display_order, r.image_id));
}

#[derive(Default)]
pub struct InMemoryImageStore {
    rows: RwLock<BTreeMap<ImageId, PermanentImageRecord>>,
    next_id: AtomicI64,
    partition_locks: DashMap<String, Arc<Mutex<()>>>,
    injected_conflicts: AtomicUsize,
    rows_written: AtomicUsize,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` token-checked writes fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Rows written by order updates so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written.load(Ordering::SeqCst)
    }

    /// Every row, active or not.
    pub async fn all(&self) -> Vec<PermanentImageRecord> {
        self.rows.read().await.values().cloned().collect()
    }

    fn partition_lock(&self, partition: &Partition) -> Arc<Mutex<()>> {
        self.partition_locks
            .entry(partition.lock_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write_all(
        &self,
        rows: &mut BTreeMap<ImageId, PermanentImageRecord>,
        partition: &Partition,
        updates: &[OrderUpdate],
        guard: &WriteGuard,
    ) -> Result<usize, RepositoryError> {
        if let WriteGuard::Tokens(expected) = guard {
            let mut current: Vec<PermanentImageRecord> = rows
                .values()
                .filter(|r| r.is_active && r.partition() == *partition)
                .cloned()
                .collect();
            sort_partition(&mut current);
            if WriteGuard::from_snapshot(&current) != WriteGuard::Tokens(expected.clone()) {
                return Err(RepositoryError::Conflict(format!(
                    "partition {} changed since it was read",
                    partition
                )));
            }
        }

        if let Some(missing) = updates.iter().find(|u| !rows.contains_key(&u.image_id)) {
            return Err(RepositoryError::NotFound(format!(
                "image {}",
                missing.image_id
            )));
        }

        for update in updates {
            if let Some(row) = rows.get_mut(&update.image_id) {
                row.display_order = update.display_order;
                row.is_active = update.is_active;
                row.concurrency_token = Uuid::new_v4();
            }
        }

        self.rows_written.fetch_add(updates.len(), Ordering::SeqCst);
        Ok(updates.len())
    }
}

#[async_trait]
impl ImageRecordStore for InMemoryImageStore {
    async fn get(&self, image_id: ImageId) -> Result<Option<PermanentImageRecord>, RepositoryError> {
        Ok(self.rows.read().await.get(&image_id).cloned())
    }

    async fn find_by_guids(
        &self,
        guids: &[Uuid],
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        let wanted: HashSet<&Uuid> = guids.iter().collect();
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| wanted.contains(&r.image_guid))
            .cloned()
            .collect())
    }

    async fn load_partition(
        &self,
        partition: &Partition,
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        let mut rows: Vec<PermanentImageRecord> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.is_active && r.partition() == *partition)
            .cloned()
            .collect();
        sort_partition(&mut rows);
        Ok(rows)
    }

    async fn insert_records(
        &self,
        records: &[NewImageRecord],
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        let mut rows = self.rows.write().await;

        let existing: HashSet<Uuid> = rows.values().map(|r| r.image_guid).collect();
        if let Some(dup) = records.iter().find(|r| existing.contains(&r.image_guid)) {
            return Err(RepositoryError::InvalidData(format!(
                "image guid {} already exists",
                dup.image_guid
            )));
        }

        let now = Utc::now();
        let inserted: Vec<PermanentImageRecord> = records
            .iter()
            .map(|r| PermanentImageRecord {
                image_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                image_guid: r.image_guid,
                entity_type: r.entity_type,
                entity_id: r.entity_id,
                category: r.category,
                mime_type: r.mime_type.clone(),
                original_file_name: r.original_file_name.clone(),
                stored_path: r.stored_path.clone(),
                file_size_bytes: r.file_size_bytes,
                width: r.width,
                height: r.height,
                display_order: None,
                is_active: true,
                uploaded_by: r.uploaded_by.clone(),
                uploaded_at: now,
                concurrency_token: Uuid::new_v4(),
            })
            .collect();

        for record in &inserted {
            rows.insert(record.image_id, record.clone());
        }
        Ok(inserted)
    }

    async fn delete_records(&self, image_ids: &[ImageId]) -> Result<usize, RepositoryError> {
        let mut rows = self.rows.write().await;
        Ok(image_ids
            .iter()
            .filter(|id| rows.remove(id).is_some())
            .count())
    }

    async fn apply_updates(
        &self,
        partition: &Partition,
        updates: &[OrderUpdate],
        guard: &WriteGuard,
    ) -> Result<usize, RepositoryError> {
        if updates.is_empty() {
            return Ok(0);
        }
        if matches!(guard, WriteGuard::Tokens(_)) && self.take_injected_conflict() {
            return Err(RepositoryError::Conflict("injected conflict".to_string()));
        }
        let mut rows = self.rows.write().await;
        self.write_all(&mut rows, partition, updates, guard)
    }

    async fn update_partition_locked(
        &self,
        partition: &Partition,
        planner: PartitionPlanner<'_>,
    ) -> Result<Vec<OrderUpdate>, RepositoryError> {
        let lock = self.partition_lock(partition);
        let _held = lock.lock().await;

        let snapshot = self.load_partition(partition).await?;
        let updates = planner(&snapshot)?;

        let mut rows = self.rows.write().await;
        self.write_all(&mut rows, partition, &updates, &WriteGuard::Unchecked)?;
        Ok(updates)
    }
}

#[derive(Default)]
pub struct InMemoryEntityDirectory {
    entities: DashMap<EntityRef, ()>,
    documents: DashMap<(EntityRef, ImageCategory), DocumentDescriptor>,
    covers: DashMap<Partition, CoverImage>,
    fail_descriptor_writes: AtomicBool,
}

impl InMemoryEntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entity: EntityRef) {
        self.entities.insert(entity, ());
    }

    pub fn remove(&self, entity: EntityRef) {
        self.entities.remove(&entity);
    }

    /// Make descriptor writes fail until turned off again.
    pub fn fail_descriptor_writes(&self, fail: bool) {
        self.fail_descriptor_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityDirectory for InMemoryEntityDirectory {
    async fn entity_exists(&self, entity: EntityRef) -> Result<bool, RepositoryError> {
        Ok(self.entities.contains_key(&entity))
    }

    async fn set_document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
        descriptor: &DocumentDescriptor,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError> {
        if self.fail_descriptor_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Other(anyhow::anyhow!("descriptor write failed")));
        }
        Ok(self.documents.insert((entity, category), descriptor.clone()))
    }

    async fn document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError> {
        Ok(self
            .documents
            .get(&(entity, category))
            .map(|d| d.value().clone()))
    }

    async fn clear_document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError> {
        Ok(self.documents.remove(&(entity, category)).map(|(_, d)| d))
    }

    async fn set_cover_image(
        &self,
        partition: &Partition,
        cover: Option<&CoverImage>,
    ) -> Result<(), RepositoryError> {
        match cover {
            Some(cover) => {
                self.covers.insert(*partition, cover.clone());
            }
            None => {
                self.covers.remove(partition);
            }
        }
        Ok(())
    }

    async fn cover_image(
        &self,
        partition: &Partition,
    ) -> Result<Option<CoverImage>, RepositoryError> {
        Ok(self.covers.get(partition).map(|c| c.value().clone()))
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, MigrationSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationSessionStore for InMemorySessionStore {
    async fn save(&self, session: &MigrationSession) -> Result<(), RepositoryError> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MigrationSession>, RepositoryError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<MigrationSession>, RepositoryError> {
        let mut sessions: Vec<MigrationSession> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::EntityType;

    fn partition() -> Partition {
        Partition::new(EntityRef::new(EntityType::Property, 1), ImageCategory::Gallery)
    }

    fn new_record(entity_id: i64, name: &str) -> NewImageRecord {
        NewImageRecord {
            image_guid: Uuid::new_v4(),
            entity_type: EntityType::Property,
            entity_id,
            category: ImageCategory::Gallery,
            mime_type: "image/jpeg".to_string(),
            original_file_name: name.to_string(),
            stored_path: format!("gallery/{}/original/{}.webp", entity_id, name),
            file_size_bytes: 10,
            width: Some(10),
            height: Some(10),
            uploaded_by: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_no_order() {
        let store = InMemoryImageStore::new();
        let rows = store
            .insert_records(&[new_record(1, "a"), new_record(1, "b"), new_record(2, "c")])
            .await
            .unwrap();

        assert_eq!(rows.iter().map(|r| r.image_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.display_order.is_none() && r.is_active));
        assert_eq!(store.load_partition(&partition()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_guid_rejected() {
        let store = InMemoryImageStore::new();
        let record = new_record(1, "a");
        store.insert_records(&[record.clone()]).await.unwrap();
        assert!(matches!(
            store.insert_records(&[record]).await,
            Err(RepositoryError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_checked_write_rejects_stale_snapshot_atomically() {
        let store = InMemoryImageStore::new();
        store
            .insert_records(&[new_record(1, "a"), new_record(1, "b")])
            .await
            .unwrap();
        let snapshot = store.load_partition(&partition()).await.unwrap();
        let guard = WriteGuard::from_snapshot(&snapshot);

        // Another writer touches only the second row.
        store
            .apply_updates(
                &partition(),
                &[OrderUpdate::position(snapshot[1].image_id, 1)],
                &WriteGuard::Unchecked,
            )
            .await
            .unwrap();

        let updates = vec![
            OrderUpdate::position(snapshot[0].image_id, 1),
            OrderUpdate::position(snapshot[1].image_id, 2),
        ];
        let result = store.apply_updates(&partition(), &updates, &guard).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        let first = store.get(snapshot[0].image_id).await.unwrap().unwrap();
        assert_eq!(first.display_order, None);
        assert_eq!(first.concurrency_token, snapshot[0].concurrency_token);
    }

    #[tokio::test]
    async fn test_checked_write_detects_new_rows_in_partition() {
        let store = InMemoryImageStore::new();
        let rows = store.insert_records(&[new_record(1, "a")]).await.unwrap();
        let guard = WriteGuard::from_snapshot(&store.load_partition(&partition()).await.unwrap());

        store.insert_records(&[new_record(1, "b")]).await.unwrap();

        let result = store
            .apply_updates(&partition(), &[OrderUpdate::position(rows[0].image_id, 1)], &guard)
            .await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_partition_lock_serializes_planners() {
        let store = Arc::new(InMemoryImageStore::new());
        let rows = store.insert_records(&[new_record(1, "a")]).await.unwrap();
        let id = rows[0].image_id;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let planner = move |snapshot: &[PermanentImageRecord]| {
                    let current = snapshot[0].display_order.unwrap_or(0);
                    Ok::<_, RepositoryError>(vec![OrderUpdate::position(id, current + 1)])
                };
                store
                    .update_partition_locked(&partition(), &planner)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every increment observed the previous one.
        assert_eq!(store.get(id).await.unwrap().unwrap().display_order, Some(10));
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = InMemoryImageStore::new();
        let rows = store.insert_records(&[new_record(1, "a")]).await.unwrap();
        store.inject_conflicts(1);

        let updates = [OrderUpdate::position(rows[0].image_id, 1)];
        let guard = WriteGuard::from_snapshot(&rows);

        assert!(store
            .apply_updates(&partition(), &updates, &guard)
            .await
            .unwrap_err()
            .is_conflict());
        store
            .apply_updates(&partition(), &updates, &guard)
            .await
            .unwrap();
        assert_eq!(store.rows_written(), 1);
    }

    #[tokio::test]
    async fn test_deleted_rows_free_their_guid() {
        let store = InMemoryImageStore::new();
        let record = new_record(1, "a");
        let rows = store.insert_records(&[record.clone()]).await.unwrap();

        assert_eq!(store.delete_records(&[rows[0].image_id, 99]).await.unwrap(), 1);
        assert!(store.all().await.is_empty());
        assert!(store.find_by_guids(&[record.image_guid]).await.unwrap().is_empty());

        store.insert_records(&[record]).await.unwrap();
        assert_eq!(store.load_partition(&partition()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_store_lists_recent_first() {
        let store = InMemorySessionStore::new();
        let first = MigrationSession::new(10);
        let mut second = MigrationSession::new(10);
        second.updated_at = first.updated_at + chrono::Duration::seconds(5);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let listed = store.list_recent(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(store.get(first.id).await.unwrap().unwrap(), first);
    }
}
