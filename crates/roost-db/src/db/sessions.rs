use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roost_core::{FailedItem, MigrationSession, MigrationStatus};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use super::error::RepositoryError;

/// Persistence for bulk migration sessions, so runs survive restarts.
#[async_trait]
pub trait MigrationSessionStore: Send + Sync {
    /// Insert or replace the session.
    async fn save(&self, session: &MigrationSession) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<MigrationSession>, RepositoryError>;

    /// Most recently updated first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<MigrationSession>, RepositoryError>;
}

#[derive(FromRow)]
struct MigrationSessionRow {
    id: Uuid,
    status: MigrationStatus,
    batch_size: i32,
    total: i64,
    processed: i64,
    succeeded: i64,
    failed: i64,
    migrated_paths: Json<Vec<String>>,
    completed_sources: Json<Vec<String>>,
    failed_items: Json<Vec<FailedItem>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<MigrationSessionRow> for MigrationSession {
    fn from(row: MigrationSessionRow) -> Self {
        MigrationSession {
            id: row.id,
            status: row.status,
            batch_size: row.batch_size,
            total: row.total,
            processed: row.processed,
            succeeded: row.succeeded,
            failed: row.failed,
            migrated_paths: row.migrated_paths.0,
            completed_sources: row.completed_sources.0,
            failed_items: row.failed_items.0,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

const SESSION_COLUMNS: &str = "id, status, batch_size, total, processed, succeeded, failed, \
     migrated_paths, completed_sources, failed_items, error, created_at, updated_at, started_at, \
     finished_at";

/// Postgres-backed [`MigrationSessionStore`] over `migration_sessions`.
#[derive(Clone)]
pub struct MigrationSessionRepository {
    pool: PgPool,
}

impl MigrationSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationSessionStore for MigrationSessionRepository {
    #[tracing::instrument(skip(self, session), fields(db.table = "migration_sessions", db.operation = "upsert", db.record_id = %session.id))]
    async fn save(&self, session: &MigrationSession) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO migration_sessions (
                id, status, batch_size, total, processed, succeeded, failed, migrated_paths,
                completed_sources, failed_items, error, created_at, updated_at, started_at,
                finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                total = EXCLUDED.total,
                processed = EXCLUDED.processed,
                succeeded = EXCLUDED.succeeded,
                failed = EXCLUDED.failed,
                migrated_paths = EXCLUDED.migrated_paths,
                completed_sources = EXCLUDED.completed_sources,
                failed_items = EXCLUDED.failed_items,
                error = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(session.id)
        .bind(session.status)
        .bind(session.batch_size)
        .bind(session.total)
        .bind(session.processed)
        .bind(session.succeeded)
        .bind(session.failed)
        .bind(Json(&session.migrated_paths))
        .bind(Json(&session.completed_sources))
        .bind(Json(&session.failed_items))
        .bind(&session.error)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.started_at)
        .bind(session.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_sessions", db.operation = "select", db.record_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<MigrationSession>, RepositoryError> {
        let row = sqlx::query_as::<Postgres, MigrationSessionRow>(&format!(
            "SELECT {} FROM migration_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MigrationSession::from))
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_sessions", db.operation = "select"))]
    async fn list_recent(&self, limit: i64) -> Result<Vec<MigrationSession>, RepositoryError> {
        let rows = sqlx::query_as::<Postgres, MigrationSessionRow>(&format!(
            "SELECT {} FROM migration_sessions ORDER BY updated_at DESC LIMIT $1",
            SESSION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MigrationSession::from).collect())
    }
}
