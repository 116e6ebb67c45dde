//! # Fingerprint Store
//!
//! The persisted record of what the engine last saw and did for each remote
//! path.
//!
//! ## Overview
//!
//! A [`Fingerprint`] is the sole authority for "have we already handled this
//! version of this file". The store is the only writer; everything else goes
//! through the narrow [`FingerprintRepository`] operations:
//!
//! - [`get`](FingerprintRepository::get) by path
//! - [`upsert`](FingerprintRepository::upsert) after an action completed
//! - [`mark_failed`](FingerprintRepository::mark_failed) after a terminal or
//!   exhausted failure, with cross-run backoff
//!
//! Rows are created on the first completed or failed attempt, updated in place
//! afterwards, and deleted only by an explicit reset or deleted-file pruning.
//!
//! The SQLite implementation also keeps the durable marker of recognition
//! jobs that outlive a run, by implementing
//! [`TranscriptionLedger`](core_convert::TranscriptionLedger).

use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::RemoteFileDescriptor;
use chrono::{DateTime, Utc};
use core_convert::{ConversionError, PendingTranscription, TranscriptionLedger};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Last Action
// ============================================================================

/// What the engine last did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastAction {
    /// Raw file mirrored, no converter applied
    Downloaded,
    /// Raw file mirrored and a text artifact written
    Converted,
    /// Stub written instead of the payload (size ceiling)
    Placeholder,
    /// Stub written because the run's download budget ran out
    Deferred,
    /// Download or conversion failed; see `last_error`
    Failed,
    /// A recognition job is still running remotely
    Transcribing,
}

impl LastAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LastAction::Downloaded => "downloaded",
            LastAction::Converted => "converted",
            LastAction::Placeholder => "placeholder",
            LastAction::Deferred => "deferred",
            LastAction::Failed => "failed",
            LastAction::Transcribing => "transcribing",
        }
    }

    /// Whether an unchanged file with this action needs no further work
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            LastAction::Downloaded | LastAction::Converted | LastAction::Placeholder
        )
    }
}

impl FromStr for LastAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "downloaded" => Ok(LastAction::Downloaded),
            "converted" => Ok(LastAction::Converted),
            "placeholder" => Ok(LastAction::Placeholder),
            "deferred" => Ok(LastAction::Deferred),
            "failed" => Ok(LastAction::Failed),
            "transcribing" => Ok(LastAction::Transcribing),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for LastAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Persisted per-path record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub path: String,
    pub size: u64,
    /// Stored with whole-second precision
    pub modified_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub last_action: LastAction,
    pub last_processed_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Local artifact written for this path, if any
    pub artifact_path: Option<String>,
    /// Consecutive failed runs for the current remote version
    pub attempt_count: u32,
    /// Earliest time a failed path is attempted again
    pub retry_after: Option<DateTime<Utc>>,
}

impl Fingerprint {
    /// Record `action` for the version of the file described by `descriptor`
    pub fn for_descriptor(
        descriptor: &RemoteFileDescriptor,
        action: LastAction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            path: descriptor.path.clone(),
            size: descriptor.size,
            modified_at: truncate_to_secs(descriptor.modified_at),
            content_hash: descriptor.content_hash.clone(),
            last_action: action,
            last_processed_at: now,
            last_error: None,
            artifact_path: None,
            attempt_count: 0,
            retry_after: None,
        }
    }

    pub fn with_artifact(mut self, artifact_path: impl Into<String>) -> Self {
        self.artifact_path = Some(artifact_path.into());
        self
    }

    /// Whether `descriptor` describes the same version of the file.
    ///
    /// Content hashes win when both sides have one; otherwise size and
    /// modification time (to the second) must both match.
    pub fn matches(&self, descriptor: &RemoteFileDescriptor) -> bool {
        match (&self.content_hash, &descriptor.content_hash) {
            (Some(stored), Some(remote)) => stored == remote,
            _ => {
                self.size == descriptor.size
                    && self.modified_at.timestamp() == descriptor.modified_at.timestamp()
            }
        }
    }

    /// A failed path still inside its backoff window
    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        self.last_action == LastAction::Failed && self.retry_after.is_some_and(|t| t > now)
    }
}

fn truncate_to_secs(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

fn from_unix(secs: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| SyncError::Database(format!("Invalid timestamp in {}: {}", column, secs)))
}

/// Cross-run backoff applied by [`FingerprintRepository::mark_failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureBackoff {
    pub base: Duration,
    pub cap: Duration,
}

impl FailureBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// `min(base × 2^(attempt-1), cap)` for the 1-based failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

impl Default for FailureBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3600),
            cap: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Row counts per last action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total: u64,
    pub downloaded: u64,
    pub converted: u64,
    pub placeholders: u64,
    pub deferred: u64,
    pub failed: u64,
    pub transcribing: u64,
    pub total_bytes: u64,
}

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait FingerprintRepository: Send + Sync {
    /// Fingerprint for `path`, if the path was ever processed
    async fn get(&self, path: &str) -> Result<Option<Fingerprint>>;

    /// Insert or replace the fingerprint for `fingerprint.path`
    async fn upsert(&self, fingerprint: &Fingerprint) -> Result<()>;

    /// Record a failure for the version in `descriptor`.
    ///
    /// Increments the attempt count when the stored version is the same
    /// (restarting at 1 for a new version) and pushes `retry_after` out
    /// according to `backoff`. Returns the stored record.
    async fn mark_failed(
        &self,
        descriptor: &RemoteFileDescriptor,
        message: &str,
        now: DateTime<Utc>,
        backoff: &FailureBackoff,
    ) -> Result<Fingerprint>;

    /// Remove the fingerprint for `path`. Returns whether a row existed.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Remove every fingerprint. Returns the number of rows removed.
    async fn reset(&self) -> Result<u64>;

    async fn all_paths(&self) -> Result<Vec<String>>;

    /// Fingerprints whose last action failed, most recent first
    async fn failed(&self) -> Result<Vec<Fingerprint>>;

    async fn statistics(&self) -> Result<StoreStatistics>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteFingerprintRepository {
    pool: SqlitePool,
}

impl SqliteFingerprintRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct FingerprintRow {
    path: String,
    size: i64,
    modified_at: i64,
    content_hash: Option<String>,
    last_action: String,
    last_processed_at: i64,
    last_error: Option<String>,
    artifact_path: Option<String>,
    attempt_count: i64,
    retry_after: Option<i64>,
}

impl TryFrom<FingerprintRow> for Fingerprint {
    type Error = SyncError;

    fn try_from(row: FingerprintRow) -> Result<Self> {
        Ok(Fingerprint {
            path: row.path,
            size: row.size.max(0) as u64,
            modified_at: from_unix(row.modified_at, "modified_at")?,
            content_hash: row.content_hash,
            last_action: row.last_action.parse()?,
            last_processed_at: from_unix(row.last_processed_at, "last_processed_at")?,
            last_error: row.last_error,
            artifact_path: row.artifact_path,
            attempt_count: row.attempt_count.max(0) as u32,
            retry_after: row
                .retry_after
                .map(|t| from_unix(t, "retry_after"))
                .transpose()?,
        })
    }
}

const SELECT_FINGERPRINT: &str = r#"
    SELECT path, size, modified_at, content_hash, last_action, last_processed_at,
           last_error, artifact_path, attempt_count, retry_after
    FROM fingerprints
"#;

#[derive(Debug, FromRow)]
struct StatisticsRow {
    total: i64,
    downloaded: i64,
    converted: i64,
    placeholders: i64,
    deferred: i64,
    failed: i64,
    transcribing: i64,
    total_bytes: i64,
}

#[async_trait]
impl FingerprintRepository for SqliteFingerprintRepository {
    async fn get(&self, path: &str) -> Result<Option<Fingerprint>> {
        let row = sqlx::query_as::<_, FingerprintRow>(&format!(
            "{} WHERE path = ?",
            SELECT_FINGERPRINT
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(Fingerprint::try_from).transpose()
    }

    async fn upsert(&self, fingerprint: &Fingerprint) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO fingerprints (
                path, size, modified_at, content_hash, last_action,
                last_processed_at, last_error, artifact_path,
                attempt_count, retry_after, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                modified_at = excluded.modified_at,
                content_hash = excluded.content_hash,
                last_action = excluded.last_action,
                last_processed_at = excluded.last_processed_at,
                last_error = excluded.last_error,
                artifact_path = excluded.artifact_path,
                attempt_count = excluded.attempt_count,
                retry_after = excluded.retry_after,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fingerprint.path)
        .bind(fingerprint.size as i64)
        .bind(fingerprint.modified_at.timestamp())
        .bind(&fingerprint.content_hash)
        .bind(fingerprint.last_action.as_str())
        .bind(fingerprint.last_processed_at.timestamp())
        .bind(&fingerprint.last_error)
        .bind(&fingerprint.artifact_path)
        .bind(fingerprint.attempt_count as i64)
        .bind(fingerprint.retry_after.map(|t| t.timestamp()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        debug!(path = %fingerprint.path, action = %fingerprint.last_action, "Fingerprint stored");
        Ok(())
    }

    async fn mark_failed(
        &self,
        descriptor: &RemoteFileDescriptor,
        message: &str,
        now: DateTime<Utc>,
        backoff: &FailureBackoff,
    ) -> Result<Fingerprint> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let previous = sqlx::query_as::<_, FingerprintRow>(&format!(
            "{} WHERE path = ?",
            SELECT_FINGERPRINT
        ))
        .bind(&descriptor.path)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?
        .map(Fingerprint::try_from)
        .transpose()?;

        let attempt_count = match &previous {
            Some(p) if p.last_action == LastAction::Failed && p.matches(descriptor) => {
                p.attempt_count.saturating_add(1)
            }
            _ => 1,
        };
        let retry_after = chrono::Duration::from_std(backoff.delay_for(attempt_count))
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        let mut fingerprint = Fingerprint::for_descriptor(descriptor, LastAction::Failed, now);
        fingerprint.last_error = Some(message.to_string());
        fingerprint.attempt_count = attempt_count;
        fingerprint.retry_after = retry_after.map(truncate_to_secs);
        fingerprint.artifact_path = previous.and_then(|p| p.artifact_path);

        sqlx::query(
            r#"
            INSERT INTO fingerprints (
                path, size, modified_at, content_hash, last_action,
                last_processed_at, last_error, artifact_path,
                attempt_count, retry_after, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                modified_at = excluded.modified_at,
                content_hash = excluded.content_hash,
                last_action = excluded.last_action,
                last_processed_at = excluded.last_processed_at,
                last_error = excluded.last_error,
                attempt_count = excluded.attempt_count,
                retry_after = excluded.retry_after,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fingerprint.path)
        .bind(fingerprint.size as i64)
        .bind(fingerprint.modified_at.timestamp())
        .bind(&fingerprint.content_hash)
        .bind(LastAction::Failed.as_str())
        .bind(now.timestamp())
        .bind(&fingerprint.last_error)
        .bind(&fingerprint.artifact_path)
        .bind(attempt_count as i64)
        .bind(fingerprint.retry_after.map(|t| t.timestamp()))
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        debug!(
            path = %descriptor.path,
            attempt_count,
            retry_after = ?fingerprint.retry_after,
            "Failure recorded"
        );
        Ok(fingerprint)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM fingerprints WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM fingerprints")
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn all_paths(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM fingerprints ORDER BY path")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn failed(&self) -> Result<Vec<Fingerprint>> {
        let rows = sqlx::query_as::<_, FingerprintRow>(&format!(
            "{} WHERE last_action = 'failed' ORDER BY last_processed_at DESC, path",
            SELECT_FINGERPRINT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(Fingerprint::try_from).collect()
    }

    async fn statistics(&self) -> Result<StoreStatistics> {
        let row = sqlx::query_as::<_, StatisticsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN last_action = 'downloaded' THEN 1 ELSE 0 END), 0) AS downloaded,
                COALESCE(SUM(CASE WHEN last_action = 'converted' THEN 1 ELSE 0 END), 0) AS converted,
                COALESCE(SUM(CASE WHEN last_action = 'placeholder' THEN 1 ELSE 0 END), 0) AS placeholders,
                COALESCE(SUM(CASE WHEN last_action = 'deferred' THEN 1 ELSE 0 END), 0) AS deferred,
                COALESCE(SUM(CASE WHEN last_action = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN last_action = 'transcribing' THEN 1 ELSE 0 END), 0) AS transcribing,
                COALESCE(SUM(size), 0) AS total_bytes
            FROM fingerprints
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(StoreStatistics {
            total: row.total as u64,
            downloaded: row.downloaded as u64,
            converted: row.converted as u64,
            placeholders: row.placeholders as u64,
            deferred: row.deferred as u64,
            failed: row.failed as u64,
            transcribing: row.transcribing as u64,
            total_bytes: row.total_bytes.max(0) as u64,
        })
    }
}

// ============================================================================
// Transcription Ledger
// ============================================================================

#[derive(Debug, FromRow)]
struct PendingRow {
    path: String,
    size: i64,
    modified_at: i64,
    content_hash: Option<String>,
    transcription_job_id: String,
    staging_object_key: String,
    transcription_submitted_at: i64,
}

fn ledger_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::Ledger(e.to_string())
}

#[async_trait]
impl TranscriptionLedger for SqliteFingerprintRepository {
    async fn record_submitted(&self, pending: &PendingTranscription) -> core_convert::Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO fingerprints (
                path, size, modified_at, content_hash, last_action, last_processed_at,
                transcription_status, transcription_job_id, staging_object_key,
                transcription_submitted_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 'transcribing', ?, 'submitted', ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                modified_at = excluded.modified_at,
                content_hash = excluded.content_hash,
                last_action = 'transcribing',
                last_processed_at = excluded.last_processed_at,
                last_error = NULL,
                attempt_count = 0,
                retry_after = NULL,
                transcription_status = 'submitted',
                transcription_job_id = excluded.transcription_job_id,
                staging_object_key = excluded.staging_object_key,
                transcription_submitted_at = excluded.transcription_submitted_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pending.source_path)
        .bind(pending.source_size as i64)
        .bind(pending.source_modified_at.timestamp())
        .bind(&pending.source_content_hash)
        .bind(now)
        .bind(&pending.job_id)
        .bind(&pending.staging_object_key)
        .bind(pending.submitted_at.timestamp())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ledger_error)?;
        Ok(())
    }

    async fn clear(&self, source_path: &str) -> core_convert::Result<()> {
        sqlx::query(
            r#"
            UPDATE fingerprints SET
                transcription_status = NULL,
                transcription_job_id = NULL,
                staging_object_key = NULL,
                transcription_submitted_at = NULL
            WHERE path = ?
            "#,
        )
        .bind(source_path)
        .execute(&self.pool)
        .await
        .map_err(ledger_error)?;
        Ok(())
    }

    async fn pending(&self) -> core_convert::Result<Vec<PendingTranscription>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT path, size, modified_at, content_hash, transcription_job_id, staging_object_key,
                   transcription_submitted_at
            FROM fingerprints
            WHERE transcription_status IS NOT NULL
              AND transcription_job_id IS NOT NULL
              AND staging_object_key IS NOT NULL
              AND transcription_submitted_at IS NOT NULL
            ORDER BY transcription_submitted_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingTranscription {
                    source_size: row.size.max(0) as u64,
                    source_modified_at: from_unix(row.modified_at, "modified_at")
                        .map_err(ledger_error)?,
                    submitted_at: from_unix(row.transcription_submitted_at, "transcription_submitted_at")
                        .map_err(ledger_error)?,
                    source_path: row.path,
                    source_content_hash: row.content_hash,
                    job_id: row.transcription_job_id,
                    staging_object_key: row.staging_object_key,
                })
            })
            .collect()
    }
}
