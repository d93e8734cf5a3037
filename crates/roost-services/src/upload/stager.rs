//! Upload → transcode → stage.
//!
//! An upload is validated against its category policy, transcoded on the
//! blocking pool, written to the staging area as one all-or-nothing variant
//! set and only then recorded in the caller's session.

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use roost_core::{CategoryPolicies, Config, EntityId, ImageCategory, StagedImage, Variant};
use roost_processing::{sanitize_filename, ImageTranscoder, MediaValidator};
use roost_storage::paths::{staging_base, staging_variant_key};
use roost_storage::{BlobTransfer, BlobUploader, UploadReceipt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::StagingError;
use crate::session::TempSessionStore;

/// One file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub category: ImageCategory,
    /// Entity the upload belongs to, when it already exists.
    pub target_entity_id: Option<EntityId>,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub image: StagedImage,
    pub variants: BTreeMap<Variant, UploadReceipt>,
}

#[derive(Clone)]
pub struct UploadStager {
    sessions: Arc<TempSessionStore>,
    uploader: BlobUploader,
    transfer: BlobTransfer,
    transcoder: ImageTranscoder,
    policies: CategoryPolicies,
    max_upload_bytes: usize,
}

impl UploadStager {
    pub fn new(
        sessions: Arc<TempSessionStore>,
        uploader: BlobUploader,
        transfer: BlobTransfer,
        transcoder: ImageTranscoder,
        policies: CategoryPolicies,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            sessions,
            uploader,
            transfer,
            transcoder,
            policies,
            max_upload_bytes,
        }
    }

    pub fn from_config(
        sessions: Arc<TempSessionStore>,
        uploader: BlobUploader,
        transfer: BlobTransfer,
        config: &Config,
    ) -> Self {
        Self::new(
            sessions,
            uploader,
            transfer,
            ImageTranscoder::from_config(config),
            CategoryPolicies::standard(),
            config.max_upload_size_bytes(),
        )
    }

    /// Stage one upload under `session_id`.
    ///
    /// Nothing is recorded in the session unless every variant was written.
    #[tracing::instrument(skip(self, request), fields(category = %request.category, size_bytes = request.data.len()))]
    pub async fn stage_upload(
        &self,
        session_id: &str,
        request: UploadRequest,
    ) -> Result<UploadResult, StagingError> {
        if !self.sessions.is_valid(session_id) {
            return Err(StagingError::UnknownSession);
        }

        let start = Instant::now();
        let validator =
            MediaValidator::for_policy(self.policies.get(request.category), self.max_upload_bytes);
        let mime = validator.validate_all(
            &request.file_name,
            &request.content_type,
            request.data.len(),
        )?;

        let transcoder = self.transcoder.clone();
        let raw = request.data.clone();
        let max_bytes = self.max_upload_bytes;
        let transcoded =
            tokio::task::spawn_blocking(move || transcoder.process_all(&raw, mime, max_bytes))
                .await
                .map_err(|e| StagingError::Task(e.to_string()))??;

        let image_id = Uuid::new_v4();
        let base = staging_base(
            session_id,
            request.category,
            request.target_entity_id,
            image_id,
        );
        let variants = self
            .uploader
            .upload_variant_set_atomic(&transcoded.variants, &base, transcoded.content_type)
            .await?;

        let (width, height) = match transcoded.original_size {
            Some((w, h)) => (Some(w as i32), Some(h as i32)),
            None => (None, None),
        };
        let image = StagedImage {
            image_id,
            session_id: session_id.to_string(),
            category: request.category,
            mime_type: mime.as_mime().to_string(),
            original_file_name: sanitize_filename(&request.file_name),
            file_size_bytes: request.data.len() as i64,
            width,
            height,
            target_entity_id: request.target_entity_id,
            staging_base: base,
            created_at: Utc::now(),
        };

        if let Err(e) = self.sessions.add(session_id, image.clone()) {
            // Session expired while we were uploading.
            let keys: Vec<String> = variants.values().map(|r| r.path.clone()).collect();
            self.transfer.delete_multiple(&keys).await;
            return Err(e);
        }

        tracing::info!(
            session_id = %session_id,
            image_id = %image_id,
            variants = variants.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Upload staged"
        );

        Ok(UploadResult { image, variants })
    }

    /// Stage several uploads; one result per request, in request order.
    pub async fn stage_uploads(
        &self,
        session_id: &str,
        requests: Vec<UploadRequest>,
    ) -> Vec<Result<UploadResult, StagingError>> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.stage_upload(session_id, request)),
        )
        .await
    }

    /// Drop a staged upload: forget it in the session and delete its blobs.
    #[tracing::instrument(skip(self))]
    pub async fn discard(&self, session_id: &str, image_id: Uuid) -> Result<(), StagingError> {
        let staged = self
            .sessions
            .get(session_id, image_id)
            .ok_or(StagingError::NotStaged(image_id))?;

        self.sessions.remove(session_id, image_id);

        let keys: Vec<String> = staged
            .required_variants()
            .iter()
            .map(|v| staging_variant_key(&staged.staging_base, *v))
            .collect();
        let outcomes = self.transfer.delete_multiple(&keys).await;
        let failed = outcomes.values().filter(|ok| !**ok).count();
        if failed > 0 {
            tracing::warn!(failed, "Some staged variants were not deleted; left for the sweep");
        }

        Ok(())
    }
}
