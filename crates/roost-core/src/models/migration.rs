use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a bulk migration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "migration_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Created,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl MigrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Cancelled | MigrationStatus::Failed
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStatus::Created => "created",
            MigrationStatus::Running => "running",
            MigrationStatus::Paused => "paused",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Cancelled => "cancelled",
            MigrationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One legacy item the job could not migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub source: String,
    pub reason: String,
}

/// Bookkeeping for a bulk migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSession {
    pub id: Uuid,
    pub status: MigrationStatus,
    pub batch_size: i32,
    pub total: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    /// Destination keys written by this session, for rollback.
    pub migrated_paths: Vec<String>,
    /// Source identifiers already migrated, so a resumed run can skip them.
    pub completed_sources: Vec<String>,
    pub failed_items: Vec<FailedItem>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationSession {
    pub fn new(batch_size: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: MigrationStatus::Created,
            batch_size,
            total: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            migrated_paths: Vec::new(),
            completed_sources: Vec::new(),
            failed_items: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `next`, stamping timestamps. Terminal states are sticky.
    pub fn transition(&mut self, next: MigrationStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        if next == MigrationStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}
