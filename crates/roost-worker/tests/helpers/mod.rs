#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use bytes::Bytes;
use roost_core::{
    CategoryPolicies, EntityRef, EntityType, ImageCategory, MigrationSession, MigrationStatus,
};
use roost_db::{
    InMemoryEntityDirectory, InMemoryImageStore, InMemorySessionStore, MigrationSessionStore,
};
use roost_processing::ImageTranscoder;
use roost_services::{DisplayOrderEngine, MigrationCoordinator, TempSessionStore, UploadStager};
use roost_storage::test_helpers::MockStorage;
use roost_storage::{BlobTransfer, BlobUploader, TransferPolicy, UploadPolicy};
use roost_worker::{BulkMigrationJob, JobCommand, JobError, LegacyImage, LegacyImageSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub struct Harness {
    pub storage: Arc<MockStorage>,
    pub images: Arc<InMemoryImageStore>,
    pub entities: Arc<InMemoryEntityDirectory>,
    pub store: Arc<InMemorySessionStore>,
    pub sessions: Arc<TempSessionStore>,
    pub stager: UploadStager,
    pub coordinator: Arc<MigrationCoordinator>,
}

impl Harness {
    pub fn job(&self, source: Arc<dyn LegacyImageSource>) -> BulkMigrationJob {
        BulkMigrationJob::new(
            source,
            self.sessions.clone(),
            self.stager.clone(),
            self.coordinator.clone(),
            self.store.clone(),
            2,
        )
    }

    /// Poll the stored session until it reaches `status`.
    pub async fn wait_for_status(&self, id: Uuid, status: MigrationStatus) -> MigrationSession {
        for _ in 0..500 {
            if let Some(session) = self.store.get(id).await.unwrap() {
                if session.status == status {
                    return session;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {} never reached {}", id, status);
    }
}

pub fn setup_harness() -> Harness {
    let storage = Arc::new(MockStorage::new());
    let sessions = Arc::new(TempSessionStore::new(
        Duration::from_secs(3600),
        Duration::from_secs(7200),
        true,
    ));
    let images = Arc::new(InMemoryImageStore::new());
    let entities = Arc::new(InMemoryEntityDirectory::new());
    let store = Arc::new(InMemorySessionStore::new());

    let upload_policy = UploadPolicy {
        max_attempts: 2,
        backoff: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    };
    let transfer_policy = TransferPolicy {
        poll_interval: Duration::from_millis(5),
        max_wait: Duration::from_secs(2),
        timeout: Duration::from_secs(5),
    };
    let uploader = BlobUploader::new(storage.clone(), 4, upload_policy);
    let transfer = BlobTransfer::new(storage.clone(), transfer_policy);

    let stager = UploadStager::new(
        sessions.clone(),
        uploader,
        transfer.clone(),
        ImageTranscoder::new(75, 256),
        CategoryPolicies::standard(),
        5 * 1024 * 1024,
    );
    let ordering = DisplayOrderEngine::new(
        images.clone(),
        entities.clone(),
        5,
        Duration::from_millis(1),
    );
    let coordinator = Arc::new(MigrationCoordinator::new(
        sessions.clone(),
        transfer,
        images.clone(),
        entities.clone(),
        ordering,
        CategoryPolicies::standard(),
    ));

    Harness {
        storage,
        images,
        entities,
        store,
        sessions,
        stager,
        coordinator,
    }
}

pub fn property(id: i64) -> EntityRef {
    EntityRef::new(EntityType::Property, id)
}

pub fn legacy(entity: EntityRef, category: ImageCategory, file_name: &str) -> LegacyImage {
    let content_type = if file_name.ends_with(".pdf") {
        "application/pdf"
    } else if file_name.ends_with(".jpg") {
        "image/jpeg"
    } else {
        "image/png"
    };
    LegacyImage {
        source_id: format!("{}/{}/{}", entity, category, file_name),
        entity,
        category,
        file_name: file_name.to_string(),
        content_type: content_type.to_string(),
    }
}

/// In-memory legacy corpus. Can ask its job to pause on the first read.
#[derive(Default)]
pub struct MemorySource {
    items: Vec<LegacyImage>,
    data: HashMap<String, Bytes>,
    pause_on_read: Mutex<Option<Arc<watch::Sender<JobCommand>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, item: LegacyImage, data: Bytes) -> Self {
        self.data.insert(item.source_id.clone(), data);
        self.items.push(item);
        self
    }

    pub fn pause_on_first_read(self, control: Arc<watch::Sender<JobCommand>>) -> Self {
        *self.pause_on_read.lock().unwrap() = Some(control);
        self
    }

    pub fn items(&self) -> &[LegacyImage] {
        &self.items
    }
}

#[async_trait]
impl LegacyImageSource for MemorySource {
    async fn list(&self) -> Result<Vec<LegacyImage>, JobError> {
        Ok(self.items.clone())
    }

    async fn read(&self, item: &LegacyImage) -> Result<Bytes, JobError> {
        if let Some(control) = self.pause_on_read.lock().unwrap().take() {
            let _ = control.send(JobCommand::Pause);
        }
        self.data
            .get(&item.source_id)
            .cloned()
            .ok_or_else(|| JobError::Source(format!("{} is gone", item.source_id)))
    }
}

pub struct UnreachableSource;

#[async_trait]
impl LegacyImageSource for UnreachableSource {
    async fn list(&self) -> Result<Vec<LegacyImage>, JobError> {
        Err(JobError::Source("legacy share unreachable".to_string()))
    }

    async fn read(&self, item: &LegacyImage) -> Result<Bytes, JobError> {
        Err(JobError::Source(format!("{} unreachable", item.source_id)))
    }
}
