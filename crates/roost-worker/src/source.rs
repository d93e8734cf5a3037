//! Where bulk migrations read legacy images from.

use async_trait::async_trait;
use bytes::Bytes;
use roost_core::{EntityId, EntityRef, EntityType, ImageCategory, MimeKind};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::JobError;

/// One legacy image waiting to be migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyImage {
    /// Stable identifier; resumed jobs skip ids they already finished.
    pub source_id: String,
    pub entity: EntityRef,
    pub category: ImageCategory,
    pub file_name: String,
    pub content_type: String,
}

#[async_trait]
pub trait LegacyImageSource: Send + Sync {
    /// Every item, in the order positions should be assigned.
    async fn list(&self) -> Result<Vec<LegacyImage>, JobError>;

    async fn read(&self, item: &LegacyImage) -> Result<Bytes, JobError>;
}

fn mime_for_extension(path: &Path) -> Option<MimeKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(MimeKind::Jpeg),
        "png" => Some(MimeKind::Png),
        "webp" => Some(MimeKind::Webp),
        "gif" => Some(MimeKind::Gif),
        "pdf" => Some(MimeKind::Pdf),
        _ => None,
    }
}

/// Legacy images laid out as `{root}/{entity_type}/{entity_id}/{category}/{file}`.
///
/// Anything that does not fit the layout is skipped.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn parse(&self, path: &Path) -> Option<LegacyImage> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<&str> = relative.iter().filter_map(|s| s.to_str()).collect();
        let [entity_type, entity_id, category, file_name] = segments.as_slice() else {
            return None;
        };

        let entity_type: EntityType = entity_type.parse().ok()?;
        let entity_id: EntityId = entity_id.parse().ok()?;
        let category: ImageCategory = category.parse().ok()?;
        let mime = mime_for_extension(path)?;

        Some(LegacyImage {
            source_id: segments.join("/"),
            entity: EntityRef::new(entity_type, entity_id),
            category,
            file_name: file_name.to_string(),
            content_type: mime.as_mime().to_string(),
        })
    }

    fn scan(&self) -> Result<Vec<LegacyImage>, JobError> {
        let mut items = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| JobError::Source(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.parse(entry.path()) {
                Some(item) => items.push(item),
                None => tracing::debug!(path = %entry.path().display(), "Skipping unrecognised legacy file"),
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl LegacyImageSource for DirectorySource {
    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self) -> Result<Vec<LegacyImage>, JobError> {
        let source = self.clone();
        let items = tokio::task::spawn_blocking(move || source.scan())
            .await
            .map_err(|e| JobError::Task(e.to_string()))??;
        tracing::info!(count = items.len(), "Legacy images listed");
        Ok(items)
    }

    async fn read(&self, item: &LegacyImage) -> Result<Bytes, JobError> {
        let data = tokio::fs::read(self.root.join(&item.source_id)).await?;
        Ok(Bytes::from(data))
    }
}
