//! # Video Transcription State Machine
//!
//! Tracks one video through audio extraction, staging, submission and
//! polling of an asynchronous speech recognition job.
//!
//! ## State Machine
//!
//! ```text
//! Idle → AudioExtracted → Staged → Submitted → Polling ↺ → {Succeeded | Failed | TimedOut}
//! ```
//!
//! Every non-terminal state may fall to `Failed`. `TimedOut` is reachable
//! only from `Polling`, after the bounded number of polls is used up.
//!
//! ## Durable marker
//!
//! Once a job is submitted its id and staging key are handed to a
//! [`TranscriptionLedger`]. A run that dies while polling leaves the marker
//! behind, and the next run resumes the job from it instead of paying for
//! a second recognition.

use crate::{ConversionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionState {
    Idle,
    AudioExtracted,
    Staged,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl TranscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionState::Idle => "idle",
            TranscriptionState::AudioExtracted => "audio_extracted",
            TranscriptionState::Staged => "staged",
            TranscriptionState::Submitted => "submitted",
            TranscriptionState::Polling => "polling",
            TranscriptionState::Succeeded => "succeeded",
            TranscriptionState::Failed => "failed",
            TranscriptionState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranscriptionState::Succeeded | TranscriptionState::Failed | TranscriptionState::TimedOut
        )
    }
}

impl fmt::Display for TranscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptionState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(TranscriptionState::Idle),
            "audio_extracted" => Ok(TranscriptionState::AudioExtracted),
            "staged" => Ok(TranscriptionState::Staged),
            "submitted" => Ok(TranscriptionState::Submitted),
            "polling" => Ok(TranscriptionState::Polling),
            "succeeded" => Ok(TranscriptionState::Succeeded),
            "failed" => Ok(TranscriptionState::Failed),
            "timed_out" => Ok(TranscriptionState::TimedOut),
            other => Err(ConversionError::Malformed(format!(
                "Unknown transcription state: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Durable marker
// ============================================================================

/// A submitted recognition job that has not reached a terminal state yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTranscription {
    pub source_path: String,
    pub source_size: u64,
    pub source_modified_at: DateTime<Utc>,
    /// Remote content hash of the submitted version, when the listing had one
    pub source_content_hash: Option<String>,
    pub job_id: String,
    pub staging_object_key: String,
    pub submitted_at: DateTime<Utc>,
}

/// Persistence for [`PendingTranscription`] markers
#[async_trait]
pub trait TranscriptionLedger: Send + Sync {
    /// Record that `pending` was submitted and is being polled
    async fn record_submitted(&self, pending: &PendingTranscription) -> Result<()>;

    /// Forget the marker for `source_path` after its staged object is gone
    async fn clear(&self, source_path: &str) -> Result<()>;

    /// Markers left behind by earlier runs
    async fn pending(&self) -> Result<Vec<PendingTranscription>>;
}

// ============================================================================
// Job
// ============================================================================

/// In-memory state of one video conversion
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub source_path: String,
    pub audio_path: Option<PathBuf>,
    pub staging_object_key: Option<String>,
    pub transcription_job_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: TranscriptionState,
    /// Status polls made so far
    pub polls: u32,
}

impl ConversionJob {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            audio_path: None,
            staging_object_key: None,
            transcription_job_id: None,
            submitted_at: None,
            status: TranscriptionState::Idle,
            polls: 0,
        }
    }

    /// Rebuild a submitted job from its durable marker
    pub fn from_pending(pending: &PendingTranscription) -> Self {
        Self {
            source_path: pending.source_path.clone(),
            audio_path: None,
            staging_object_key: Some(pending.staging_object_key.clone()),
            transcription_job_id: Some(pending.job_id.clone()),
            submitted_at: Some(pending.submitted_at),
            status: TranscriptionState::Submitted,
            polls: 0,
        }
    }

    pub fn audio_extracted(&mut self, path: PathBuf) -> Result<()> {
        self.transition(TranscriptionState::AudioExtracted)?;
        self.audio_path = Some(path);
        Ok(())
    }

    pub fn staged(&mut self, key: impl Into<String>) -> Result<()> {
        self.transition(TranscriptionState::Staged)?;
        self.staging_object_key = Some(key.into());
        Ok(())
    }

    pub fn submitted(&mut self, job_id: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        self.transition(TranscriptionState::Submitted)?;
        self.transcription_job_id = Some(job_id.into());
        self.submitted_at = Some(at);
        Ok(())
    }

    /// Count one status poll
    pub fn polled(&mut self) -> Result<()> {
        self.transition(TranscriptionState::Polling)?;
        self.polls += 1;
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition(TranscriptionState::Succeeded)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(TranscriptionState::Failed)
    }

    pub fn time_out(&mut self) -> Result<()> {
        self.transition(TranscriptionState::TimedOut)
    }

    fn transition(&mut self, to: TranscriptionState) -> Result<()> {
        self.validate_transition(to)?;
        self.status = to;
        Ok(())
    }

    fn validate_transition(&self, to: TranscriptionState) -> Result<()> {
        use TranscriptionState::*;

        let valid = match (self.status, to) {
            (Idle, AudioExtracted) => true,
            (AudioExtracted, Staged) => true,
            (Staged, Submitted) => true,
            (Submitted, Polling) => true,
            (Polling, Polling) => true,
            (Polling, Succeeded) => true,
            (Polling, TimedOut) => true,

            // Terminal states cannot transition
            (Succeeded | Failed | TimedOut, _) => false,

            (_, Failed) => true,
            _ => false,
        };

        if !valid {
            return Err(ConversionError::InvalidStateTransition {
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
