//! Object Storage and Speech Transcription Abstractions
//!
//! Audio handed to an asynchronous recognition API is first staged in object
//! storage; the recognizer reads it from there by URI.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Status reported by a transcription job poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptionStatus {
    Pending,
    Succeeded(String),
    Failed(String),
}

impl TranscriptionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TranscriptionStatus::Pending)
    }
}

/// Object storage trait (S3-compatible bucket)
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `bytes` under `key`, returning the key actually stored.
    async fn upload_object(&self, bytes: Bytes, key: &str) -> Result<String>;

    /// Delete the object. Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// URI the transcription service uses to read the object
    fn object_uri(&self, key: &str) -> String;
}

/// Asynchronous speech recognition trait
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Submit a recognition job for a staged object, returning the job id.
    async fn submit_transcription(&self, object_uri: &str) -> Result<String>;

    /// Fetch the current status of a job.
    async fn poll_status(&self, job_id: &str) -> Result<TranscriptionStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TranscriptionStatus::Pending.is_terminal());
        assert!(TranscriptionStatus::Succeeded("text".into()).is_terminal());
        assert!(TranscriptionStatus::Failed("bad audio".into()).is_terminal());
    }
}
