//! # Run History
//!
//! Every `run_once` is recorded as a [`SyncRun`] with validated state
//! transitions.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed
//!    │         ├────→ Interrupted
//!    │         └────→ Failed
//!    ├──────→ Refused
//!    └──────→ Failed
//! ```

use crate::stats::SyncStatistics;
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidRunId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    /// Disk-space preflight failed
    Refused,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Refused => "refused",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "refused" => Ok(RunStatus::Refused),
            "interrupted" => Ok(RunStatus::Interrupted),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters persisted with a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub downloaded: u64,
    pub converted: u64,
    pub placeholders: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
}

impl From<&SyncStatistics> for RunCounters {
    fn from(stats: &SyncStatistics) -> Self {
        Self {
            downloaded: stats.downloaded,
            converted: stats.converted,
            placeholders: stats.placeholders,
            skipped: stats.skipped,
            failed: stats.failed,
            bytes_transferred: stats.bytes_transferred,
        }
    }
}

// ============================================================================
// Sync Run Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    /// Remote root mirrored by this run
    pub root: String,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl SyncRun {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            id: SyncRunId::new(),
            root: root.into(),
            status: RunStatus::Pending,
            counters: RunCounters::default(),
            error_message: None,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(RunStatus::Running)?;
        self.status = RunStatus::Running;
        self.started_at = Some(current_timestamp());
        Ok(self)
    }

    pub fn complete(self, stats: &SyncStatistics) -> Result<Self> {
        self.finish(RunStatus::Completed, stats, None)
    }

    pub fn refuse(mut self, message: impl Into<String>) -> Result<Self> {
        self.validate_transition(RunStatus::Refused)?;
        self.status = RunStatus::Refused;
        self.completed_at = Some(current_timestamp());
        self.error_message = Some(message.into());
        Ok(self)
    }

    pub fn interrupt(self, stats: &SyncStatistics) -> Result<Self> {
        self.finish(RunStatus::Interrupted, stats, None)
    }

    pub fn fail(self, message: impl Into<String>, stats: &SyncStatistics) -> Result<Self> {
        self.finish(RunStatus::Failed, stats, Some(message.into()))
    }

    fn finish(
        mut self,
        to: RunStatus,
        stats: &SyncStatistics,
        error_message: Option<String>,
    ) -> Result<Self> {
        self.validate_transition(to)?;
        self.status = to;
        self.completed_at = Some(current_timestamp());
        self.counters = RunCounters::from(stats);
        self.error_message = error_message;
        Ok(self)
    }

    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: RunStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Refused)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Interrupted)
                | (RunStatus::Running, RunStatus::Failed)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }
        Ok(())
    }
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn insert(&self, run: &SyncRun) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the run doesn't exist or the database operation fails
    async fn update(&self, run: &SyncRun) -> Result<()>;

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRun>>;

    async fn latest(&self) -> Result<Option<SyncRun>>;

    /// Most recent runs first
    async fn history(&self, limit: u32) -> Result<Vec<SyncRun>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteSyncRunRepository {
    pool: SqlitePool,
}

impl SqliteSyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncRunRow {
    id: String,
    root: String,
    status: String,
    downloaded: i64,
    converted: i64,
    placeholders: i64,
    skipped: i64,
    failed: i64,
    bytes_transferred: i64,
    error_message: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<SyncRunRow> for SyncRun {
    type Error = SyncError;

    fn try_from(row: SyncRunRow) -> Result<Self> {
        Ok(SyncRun {
            id: SyncRunId::from_string(&row.id)?,
            root: row.root,
            status: row.status.parse()?,
            counters: RunCounters {
                downloaded: row.downloaded as u64,
                converted: row.converted as u64,
                placeholders: row.placeholders as u64,
                skipped: row.skipped as u64,
                failed: row.failed as u64,
                bytes_transferred: row.bytes_transferred as u64,
            },
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const SELECT_RUN: &str = r#"
    SELECT id, root, status, downloaded, converted, placeholders, skipped, failed,
           bytes_transferred, error_message, started_at, completed_at, created_at
    FROM sync_runs
"#;

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    async fn insert(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, root, status, downloaded, converted, placeholders, skipped,
                failed, bytes_transferred, error_message, started_at,
                completed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(&run.root)
        .bind(run.status.as_str())
        .bind(run.counters.downloaded as i64)
        .bind(run.counters.converted as i64)
        .bind(run.counters.placeholders as i64)
        .bind(run.counters.skipped as i64)
        .bind(run.counters.failed as i64)
        .bind(run.counters.bytes_transferred as i64)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, run: &SyncRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?,
                downloaded = ?,
                converted = ?,
                placeholders = ?,
                skipped = ?,
                failed = ?,
                bytes_transferred = ?,
                error_message = ?,
                started_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.counters.downloaded as i64)
        .bind(run.counters.converted as i64)
        .bind(run.counters.placeholders as i64)
        .bind(run.counters.skipped as i64)
        .bind(run.counters.failed as i64)
        .bind(run.counters.bytes_transferred as i64)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::RunNotFound(run.id.to_string()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!("{} WHERE id = ?", SELECT_RUN))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncRun::try_from).transpose()
    }

    async fn latest(&self) -> Result<Option<SyncRun>> {
        Ok(self.history(1).await?.into_iter().next())
    }

    async fn history(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(&format!(
            "{} ORDER BY created_at DESC, rowid DESC LIMIT ?",
            SELECT_RUN
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncRun::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[test]
    fn test_run_lifecycle() {
        let run = SyncRun::new("/Clients");
        assert_eq!(run.status, RunStatus::Pending);

        let run = run.start().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        let mut stats = SyncStatistics::new(run.id.to_string());
        stats.downloaded = 3;
        stats.failed = 1;
        let run = run.complete(&stats).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.counters.downloaded, 3);
        assert_eq!(run.counters.failed, 1);
        assert!(run.status.is_terminal());
        assert!(run.duration_secs().is_some());
    }

    #[test]
    fn test_invalid_transitions() {
        let stats = SyncStatistics::new("x");
        // Refusal happens before the run starts
        let running = SyncRun::new("/").start().unwrap();
        assert!(matches!(
            running.clone().refuse("low disk"),
            Err(SyncError::InvalidStateTransition { .. })
        ));

        assert!(SyncRun::new("/").complete(&stats).is_err());
        assert!(SyncRun::new("/").interrupt(&stats).is_err());

        let done = running.complete(&stats).unwrap();
        assert!(done.clone().fail("late", &stats).is_err());
        assert!(done.start().is_err());

        let refused = SyncRun::new("/").refuse("low disk").unwrap();
        assert_eq!(refused.status, RunStatus::Refused);
        assert_eq!(refused.error_message.as_deref(), Some("low disk"));
    }

    #[test]
    fn test_status_parsing() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Refused,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
        assert!(SyncRunId::from_string("not-a-uuid").is_err());
    }

    #[tokio::test]
    async fn test_repository_round_trip_and_history() {
        let repo = SqliteSyncRunRepository::new(create_test_pool().await.unwrap());

        let run = SyncRun::new("/Clients");
        repo.insert(&run).await.unwrap();
        let run = run.start().unwrap();
        repo.update(&run).await.unwrap();

        let mut stats = SyncStatistics::new(run.id.to_string());
        stats.converted = 7;
        stats.bytes_transferred = 1234;
        let run = run.fail("store unavailable", &stats).unwrap();
        repo.update(&run).await.unwrap();

        let stored = repo.find_by_id(&run.id).await.unwrap().unwrap();
        assert_eq!(stored, run);

        let second = SyncRun::new("/Clients");
        repo.insert(&second).await.unwrap();
        let history = repo.history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert_eq!(repo.latest().await.unwrap().unwrap().id, second.id);

        assert!(repo.find_by_id(&SyncRunId::new()).await.unwrap().is_none());
        assert!(matches!(
            repo.update(&SyncRun::new("/")).await,
            Err(SyncError::RunNotFound(_))
        ));
    }
}
