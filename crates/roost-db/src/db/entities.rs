use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roost_core::{EntityRef, EntityType, ImageCategory, ImageId, Partition};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use super::error::RepositoryError;

/// The single document slot a descriptor category keeps on its entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocumentDescriptor {
    pub image_guid: Uuid,
    pub stored_path: String,
    pub mime_type: String,
    pub original_file_name: String,
    pub file_size_bytes: i64,
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Cover image of a gallery partition (the row at position 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CoverImage {
    pub image_id: ImageId,
    pub stored_path: String,
}

/// The few entity fields the ingestion engine reads or writes.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    async fn entity_exists(&self, entity: EntityRef) -> Result<bool, RepositoryError>;

    /// Replace the descriptor; returns the one it replaced.
    async fn set_document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
        descriptor: &DocumentDescriptor,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError>;

    async fn document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError>;

    /// Empty the slot; returns what it held.
    async fn clear_document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError>;

    /// `None` clears the cover.
    async fn set_cover_image(
        &self,
        partition: &Partition,
        cover: Option<&CoverImage>,
    ) -> Result<(), RepositoryError>;

    async fn cover_image(&self, partition: &Partition)
        -> Result<Option<CoverImage>, RepositoryError>;
}

/// Table owning each entity type; maintained outside this workspace.
fn entity_table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Property => "properties",
        EntityType::Unit => "units",
        EntityType::MaintenanceTicket => "maintenance_tickets",
        EntityType::Contract => "contracts",
    }
}

/// Postgres-backed [`EntityDirectory`] over `entity_documents` and `entity_covers`.
#[derive(Clone)]
pub struct EntityRepository {
    pool: PgPool,
}

impl EntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityDirectory for EntityRepository {
    #[tracing::instrument(skip(self), fields(db.table = entity_table(entity.entity_type), db.operation = "select"))]
    async fn entity_exists(&self, entity: EntityRef) -> Result<bool, RepositoryError> {
        let exists = sqlx::query_scalar::<Postgres, bool>(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            entity_table(entity.entity_type)
        ))
        .bind(entity.entity_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[tracing::instrument(skip(self, descriptor), fields(db.table = "entity_documents", db.operation = "upsert"))]
    async fn set_document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
        descriptor: &DocumentDescriptor,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError> {
        let previous = self.document_descriptor(entity, category).await?;

        sqlx::query(
            r#"
            INSERT INTO entity_documents (
                entity_type, entity_id, category, image_guid, stored_path, mime_type,
                original_file_name, file_size_bytes, uploaded_by, uploaded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (entity_type, entity_id, category) DO UPDATE SET
                image_guid = EXCLUDED.image_guid,
                stored_path = EXCLUDED.stored_path,
                mime_type = EXCLUDED.mime_type,
                original_file_name = EXCLUDED.original_file_name,
                file_size_bytes = EXCLUDED.file_size_bytes,
                uploaded_by = EXCLUDED.uploaded_by,
                uploaded_at = EXCLUDED.uploaded_at
            "#,
        )
        .bind(entity.entity_type)
        .bind(entity.entity_id)
        .bind(category)
        .bind(descriptor.image_guid)
        .bind(&descriptor.stored_path)
        .bind(&descriptor.mime_type)
        .bind(&descriptor.original_file_name)
        .bind(descriptor.file_size_bytes)
        .bind(&descriptor.uploaded_by)
        .bind(descriptor.uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(previous)
    }

    #[tracing::instrument(skip(self), fields(db.table = "entity_documents", db.operation = "select"))]
    async fn document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError> {
        let descriptor = sqlx::query_as::<Postgres, DocumentDescriptor>(
            r#"
            SELECT image_guid, stored_path, mime_type, original_file_name, file_size_bytes,
                   uploaded_by, uploaded_at
            FROM entity_documents
            WHERE entity_type = $1 AND entity_id = $2 AND category = $3
            "#,
        )
        .bind(entity.entity_type)
        .bind(entity.entity_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        Ok(descriptor)
    }

    #[tracing::instrument(skip(self), fields(db.table = "entity_documents", db.operation = "delete"))]
    async fn clear_document_descriptor(
        &self,
        entity: EntityRef,
        category: ImageCategory,
    ) -> Result<Option<DocumentDescriptor>, RepositoryError> {
        let previous = sqlx::query_as::<Postgres, DocumentDescriptor>(
            r#"
            DELETE FROM entity_documents
            WHERE entity_type = $1 AND entity_id = $2 AND category = $3
            RETURNING image_guid, stored_path, mime_type, original_file_name, file_size_bytes,
                      uploaded_by, uploaded_at
            "#,
        )
        .bind(entity.entity_type)
        .bind(entity.entity_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        Ok(previous)
    }

    #[tracing::instrument(skip(self), fields(db.table = "entity_covers", db.operation = "upsert"))]
    async fn set_cover_image(
        &self,
        partition: &Partition,
        cover: Option<&CoverImage>,
    ) -> Result<(), RepositoryError> {
        match cover {
            Some(cover) => {
                sqlx::query(
                    r#"
                    INSERT INTO entity_covers (entity_type, entity_id, category, image_id, stored_path, updated_at)
                    VALUES ($1, $2, $3, $4, $5, NOW())
                    ON CONFLICT (entity_type, entity_id, category) DO UPDATE SET
                        image_id = EXCLUDED.image_id,
                        stored_path = EXCLUDED.stored_path,
                        updated_at = NOW()
                    "#,
                )
                .bind(partition.entity_type)
                .bind(partition.entity_id)
                .bind(partition.category)
                .bind(cover.image_id)
                .bind(&cover.stored_path)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM entity_covers WHERE entity_type = $1 AND entity_id = $2 AND category = $3",
                )
                .bind(partition.entity_type)
                .bind(partition.entity_id)
                .bind(partition.category)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "entity_covers", db.operation = "select"))]
    async fn cover_image(
        &self,
        partition: &Partition,
    ) -> Result<Option<CoverImage>, RepositoryError> {
        let cover = sqlx::query_as::<Postgres, CoverImage>(
            r#"
            SELECT image_id, stored_path FROM entity_covers
            WHERE entity_type = $1 AND entity_id = $2 AND category = $3
            "#,
        )
        .bind(partition.entity_type)
        .bind(partition.entity_id)
        .bind(partition.category)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cover)
    }
}
