#![allow(dead_code)]

pub mod fixtures;

use roost_core::{
    CategoryPolicies, EntityId, EntityRef, EntityType, ImageCategory, NewImageRecord,
    PermanentImageRecord, StagedImage,
};
use roost_db::{ImageRecordStore, InMemoryEntityDirectory, InMemoryImageStore};
use roost_processing::ImageTranscoder;
use roost_services::{
    DisplayOrderEngine, MigrationCoordinator, TempSessionStore, UploadRequest, UploadStager,
};
use roost_storage::test_helpers::MockStorage;
use roost_storage::{BlobTransfer, BlobUploader, TransferPolicy, UploadPolicy};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// The whole engine wired over in-memory storage and repositories.
pub struct TestEngine {
    pub storage: Arc<MockStorage>,
    pub sessions: Arc<TempSessionStore>,
    pub images: Arc<InMemoryImageStore>,
    pub entities: Arc<InMemoryEntityDirectory>,
    pub stager: UploadStager,
    pub coordinator: MigrationCoordinator,
}

impl TestEngine {
    pub fn ordering(&self) -> &DisplayOrderEngine {
        self.coordinator.ordering()
    }

    pub fn new_session(&self) -> String {
        self.sessions.get_or_create(None).session_id
    }

    /// Stage one upload through the real pipeline.
    pub async fn stage(
        &self,
        session_id: &str,
        category: ImageCategory,
        file_name: &str,
        content_type: &str,
        data: bytes::Bytes,
    ) -> StagedImage {
        self.stager
            .stage_upload(
                session_id,
                UploadRequest {
                    category,
                    target_entity_id: None,
                    file_name: file_name.to_string(),
                    content_type: content_type.to_string(),
                    data,
                },
            )
            .await
            .expect("stage upload")
            .image
    }

    pub async fn stage_photo(&self, session_id: &str, file_name: &str) -> StagedImage {
        self.stage(
            session_id,
            ImageCategory::Gallery,
            file_name,
            "image/png",
            fixtures::png(64, 48),
        )
        .await
    }
}

pub fn fast_upload_policy() -> UploadPolicy {
    UploadPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

pub fn fast_transfer_policy() -> TransferPolicy {
    TransferPolicy {
        poll_interval: Duration::from_millis(5),
        max_wait: Duration::from_secs(2),
        timeout: Duration::from_secs(5),
    }
}

pub fn setup_engine() -> TestEngine {
    setup_engine_with_retries(5)
}

pub fn setup_engine_with_retries(order_attempts: u32) -> TestEngine {
    let storage = Arc::new(MockStorage::new());
    let sessions = Arc::new(TempSessionStore::new(
        Duration::from_secs(3600),
        Duration::from_secs(7200),
        true,
    ));
    let images = Arc::new(InMemoryImageStore::new());
    let entities = Arc::new(InMemoryEntityDirectory::new());

    let uploader = BlobUploader::new(storage.clone(), 3, fast_upload_policy());
    let transfer = BlobTransfer::new(storage.clone(), fast_transfer_policy());

    let stager = UploadStager::new(
        sessions.clone(),
        uploader,
        transfer.clone(),
        ImageTranscoder::new(75, 256),
        CategoryPolicies::standard(),
        MAX_UPLOAD_BYTES,
    );
    let ordering = DisplayOrderEngine::new(
        images.clone(),
        entities.clone(),
        order_attempts,
        Duration::from_millis(1),
    );
    let coordinator = MigrationCoordinator::new(
        sessions.clone(),
        transfer,
        images.clone(),
        entities.clone(),
        ordering,
        CategoryPolicies::standard(),
    );

    TestEngine {
        storage,
        sessions,
        images,
        entities,
        stager,
        coordinator,
    }
}

pub fn property(id: EntityId) -> EntityRef {
    EntityRef::new(EntityType::Property, id)
}

/// Insert unpositioned gallery rows directly.
pub async fn insert_gallery_rows(
    images: &InMemoryImageStore,
    entity: EntityRef,
    count: usize,
) -> Vec<PermanentImageRecord> {
    let records: Vec<NewImageRecord> = (0..count)
        .map(|i| {
            let guid = Uuid::new_v4();
            NewImageRecord {
                image_guid: guid,
                entity_type: entity.entity_type,
                entity_id: entity.entity_id,
                category: ImageCategory::Gallery,
                mime_type: "image/webp".to_string(),
                original_file_name: format!("photo-{}.jpg", i),
                stored_path: format!("gallery/{}/original/{}.webp", entity.entity_id, guid),
                file_size_bytes: 100,
                width: Some(64),
                height: Some(48),
                uploaded_by: None,
            }
        })
        .collect();
    images.insert_records(&records).await.expect("insert rows")
}
