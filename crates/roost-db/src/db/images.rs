use async_trait::async_trait;
use roost_core::{ImageId, NewImageRecord, Partition, PermanentImageRecord};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::error::RepositoryError;
use super::transaction::TransactionGuard;

/// One row change produced by an ordering plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub image_id: ImageId,
    pub display_order: Option<i32>,
    pub is_active: bool,
}

impl OrderUpdate {
    pub fn position(image_id: ImageId, display_order: i32) -> Self {
        Self {
            image_id,
            display_order: Some(display_order),
            is_active: true,
        }
    }

    pub fn deactivate(image_id: ImageId) -> Self {
        Self {
            image_id,
            display_order: None,
            is_active: false,
        }
    }
}

/// How [`ImageRecordStore::apply_updates`] treats concurrent modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteGuard {
    /// Commit only if the partition's active rows are still exactly these
    /// `(image_id, concurrency_token)` pairs; otherwise nothing is written.
    Tokens(Vec<(ImageId, Uuid)>),
    /// Last writer wins.
    Unchecked,
}

impl WriteGuard {
    /// Guard that fails if anything in the snapshot changed or a row joined or left.
    pub fn from_snapshot(rows: &[PermanentImageRecord]) -> Self {
        let mut tokens: Vec<(ImageId, Uuid)> = rows
            .iter()
            .map(|r| (r.image_id, r.concurrency_token))
            .collect();
        tokens.sort();
        WriteGuard::Tokens(tokens)
    }
}

/// Pure function from a partition snapshot to the updates to apply.
pub type PartitionPlanner<'a> = &'a (dyn Fn(&[PermanentImageRecord]) -> Result<Vec<OrderUpdate>, RepositoryError>
             + Send
             + Sync);

/// Storage port for permanent image metadata.
///
/// All multi-row writes are atomic: either every update lands or none does.
/// Each written row receives a fresh concurrency token.
#[async_trait]
pub trait ImageRecordStore: Send + Sync {
    async fn get(&self, image_id: ImageId) -> Result<Option<PermanentImageRecord>, RepositoryError>;

    async fn find_by_guids(
        &self,
        guids: &[Uuid],
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError>;

    /// Active rows of the partition, by display order (unordered last), then id.
    async fn load_partition(
        &self,
        partition: &Partition,
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError>;

    /// Insert active rows with no display order.
    async fn insert_records(
        &self,
        records: &[NewImageRecord],
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError>;

    /// Hard-delete rows, together with any cover still pointing at them.
    ///
    /// Returns the number of rows removed; unknown ids are ignored.
    async fn delete_records(&self, image_ids: &[ImageId]) -> Result<usize, RepositoryError>;

    /// Apply every update atomically under `guard`.
    async fn apply_updates(
        &self,
        partition: &Partition,
        updates: &[OrderUpdate],
        guard: &WriteGuard,
    ) -> Result<usize, RepositoryError>;

    /// Read, plan and write the partition while holding its exclusive lock.
    ///
    /// Other partitions are never blocked. Returns the updates that were applied.
    async fn update_partition_locked(
        &self,
        partition: &Partition,
        planner: PartitionPlanner<'_>,
    ) -> Result<Vec<OrderUpdate>, RepositoryError>;
}

const IMAGE_COLUMNS: &str = "image_id, image_guid, entity_type, entity_id, category, mime_type, \
     original_file_name, stored_path, file_size_bytes, width, height, display_order, is_active, \
     uploaded_by, uploaded_at, concurrency_token";

/// Postgres-backed [`ImageRecordStore`] over `entity_images`.
#[derive(Clone)]
pub struct ImageRecordRepository {
    pool: PgPool,
}

impl ImageRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_partition(
        conn: &mut sqlx::PgConnection,
        partition: &Partition,
    ) -> Result<(), RepositoryError> {
        // Transaction-scoped; released on commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(partition.lock_key())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn select_partition(
        conn: &mut sqlx::PgConnection,
        partition: &Partition,
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        let records = sqlx::query_as::<Postgres, PermanentImageRecord>(&format!(
            r#"
            SELECT {} FROM entity_images
            WHERE entity_type = $1 AND entity_id = $2 AND category = $3 AND is_active
            ORDER BY display_order ASC NULLS LAST, image_id ASC
            "#,
            IMAGE_COLUMNS
        ))
        .bind(partition.entity_type)
        .bind(partition.entity_id)
        .bind(partition.category)
        .fetch_all(&mut *conn)
        .await?;

        Ok(records)
    }

    async fn write_updates(
        conn: &mut sqlx::PgConnection,
        updates: &[OrderUpdate],
    ) -> Result<usize, RepositoryError> {
        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE entity_images
                SET display_order = $1, is_active = $2, concurrency_token = $3
                WHERE image_id = $4
                "#,
            )
            .bind(update.display_order)
            .bind(update.is_active)
            .bind(Uuid::new_v4())
            .bind(update.image_id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(format!(
                    "image {}",
                    update.image_id
                )));
            }
        }

        Ok(updates.len())
    }

    async fn guarded_write(
        conn: &mut sqlx::PgConnection,
        partition: &Partition,
        updates: &[OrderUpdate],
        guard: &WriteGuard,
    ) -> Result<usize, RepositoryError> {
        if let WriteGuard::Tokens(expected) = guard {
            // Held only for the compare-and-write, never across the caller's read.
            Self::lock_partition(conn, partition).await?;
            let current = WriteGuard::from_snapshot(&Self::select_partition(conn, partition).await?);
            if current != WriteGuard::Tokens(expected.clone()) {
                return Err(RepositoryError::Conflict(format!(
                    "partition {} changed since it was read",
                    partition
                )));
            }
        }
        Self::write_updates(conn, updates).await
    }
}

#[async_trait]
impl ImageRecordStore for ImageRecordRepository {
    #[tracing::instrument(skip(self), fields(db.table = "entity_images", db.operation = "select", db.record_id = image_id))]
    async fn get(&self, image_id: ImageId) -> Result<Option<PermanentImageRecord>, RepositoryError> {
        let record = sqlx::query_as::<Postgres, PermanentImageRecord>(&format!(
            "SELECT {} FROM entity_images WHERE image_id = $1",
            IMAGE_COLUMNS
        ))
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, guids), fields(db.table = "entity_images", db.operation = "select", count = guids.len()))]
    async fn find_by_guids(
        &self,
        guids: &[Uuid],
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        if guids.is_empty() {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<Postgres, PermanentImageRecord>(&format!(
            "SELECT {} FROM entity_images WHERE image_guid = ANY($1)",
            IMAGE_COLUMNS
        ))
        .bind(guids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "entity_images", db.operation = "select"))]
    async fn load_partition(
        &self,
        partition: &Partition,
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        let records = sqlx::query_as::<Postgres, PermanentImageRecord>(&format!(
            r#"
            SELECT {} FROM entity_images
            WHERE entity_type = $1 AND entity_id = $2 AND category = $3 AND is_active
            ORDER BY display_order ASC NULLS LAST, image_id ASC
            "#,
            IMAGE_COLUMNS
        ))
        .bind(partition.entity_type)
        .bind(partition.entity_id)
        .bind(partition.category)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self, records), fields(db.table = "entity_images", db.operation = "insert", count = records.len()))]
    async fn insert_records(
        &self,
        records: &[NewImageRecord],
    ) -> Result<Vec<PermanentImageRecord>, RepositoryError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        let mut inserted = Vec::with_capacity(records.len());

        for record in records {
            let row = sqlx::query_as::<Postgres, PermanentImageRecord>(&format!(
                r#"
                INSERT INTO entity_images (
                    image_guid, entity_type, entity_id, category, mime_type, original_file_name,
                    stored_path, file_size_bytes, width, height, display_order, is_active,
                    uploaded_by, uploaded_at, concurrency_token
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL, TRUE, $11, NOW(), $12)
                RETURNING {}
                "#,
                IMAGE_COLUMNS
            ))
            .bind(record.image_guid)
            .bind(record.entity_type)
            .bind(record.entity_id)
            .bind(record.category)
            .bind(&record.mime_type)
            .bind(&record.original_file_name)
            .bind(&record.stored_path)
            .bind(record.file_size_bytes)
            .bind(record.width)
            .bind(record.height)
            .bind(&record.uploaded_by)
            .bind(Uuid::new_v4())
            .fetch_one(&mut **tx)
            .await?;
            inserted.push(row);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[tracing::instrument(skip(self, image_ids), fields(db.table = "entity_images", db.operation = "delete", count = image_ids.len()))]
    async fn delete_records(&self, image_ids: &[ImageId]) -> Result<usize, RepositoryError> {
        if image_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = TransactionGuard::begin(&self.pool).await?;
        sqlx::query("DELETE FROM entity_covers WHERE image_id = ANY($1)")
            .bind(image_ids)
            .execute(&mut **tx)
            .await?;
        let result = sqlx::query("DELETE FROM entity_images WHERE image_id = ANY($1)")
            .bind(image_ids)
            .execute(&mut **tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() as usize)
    }

    #[tracing::instrument(skip(self, updates, guard), fields(db.table = "entity_images", db.operation = "update", count = updates.len()))]
    async fn apply_updates(
        &self,
        partition: &Partition,
        updates: &[OrderUpdate],
        guard: &WriteGuard,
    ) -> Result<usize, RepositoryError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = TransactionGuard::begin(&self.pool).await?;
        match Self::guarded_write(&mut **tx, partition, updates, guard).await {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self, planner), fields(db.table = "entity_images", db.operation = "update"))]
    async fn update_partition_locked(
        &self,
        partition: &Partition,
        planner: PartitionPlanner<'_>,
    ) -> Result<Vec<OrderUpdate>, RepositoryError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        Self::lock_partition(&mut **tx, partition).await?;

        let snapshot = Self::select_partition(&mut **tx, partition).await?;
        let updates = match planner(&snapshot) {
            Ok(updates) => updates,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        match Self::write_updates(&mut **tx, &updates).await {
            Ok(_) => {
                tx.commit().await?;
                Ok(updates)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}
