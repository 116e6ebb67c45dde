//! Error types for file conversion

use bridge_traits::BridgeError;
use core_runtime::retry::{Classify, FailureClass};
use std::time::Duration;
use thiserror::Error;

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConversionError {
    /// No converter accepts this file
    #[error("Unsupported format: {0}")]
    Unsupported(String),

    /// The source could not be parsed or decoded
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// An external tool is missing or refused to run
    #[error("External tool '{tool}' failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// A failure that may clear up on another attempt
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The transcription service rejected the job
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    /// The transcription job did not finish within the polling window
    #[error("Transcription job {job_id} timed out after {waited_secs}s")]
    TimedOut { job_id: String, waited_secs: u64 },

    /// Polling stopped on cancellation; the job resumes on the next run
    #[error("Transcription job {job_id} interrupted")]
    Interrupted { job_id: String },

    /// A converter could not be constructed
    #[error("Converter setup failed: {0}")]
    Setup(String),

    /// Durable job bookkeeping could not be written
    #[error("Transcription ledger error: {0}")]
    Ledger(String),

    /// Invalid transcription state transition
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Collaborator error
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, ConversionError>;

impl Classify for ConversionError {
    fn classify(&self) -> FailureClass {
        match self {
            ConversionError::Transient(_)
            | ConversionError::TimedOut { .. }
            | ConversionError::Interrupted { .. } => FailureClass::Transient,
            ConversionError::Bridge(e) => e.classify(),
            ConversionError::Io(e) => match e.kind() {
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => {
                    FailureClass::Transient
                }
                _ => FailureClass::Terminal,
            },
            _ => FailureClass::Terminal,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ConversionError::Bridge(e) => e.retry_after(),
            _ => None,
        }
    }
}

impl ConversionError {
    pub fn external_tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ConversionError::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            ConversionError::Malformed("bad".into()).classify(),
            FailureClass::Terminal
        );
        assert_eq!(
            ConversionError::TimedOut {
                job_id: "j".into(),
                waited_secs: 600
            }
            .classify(),
            FailureClass::Transient
        );
        assert_eq!(
            ConversionError::Bridge(BridgeError::Network("reset".into())).classify(),
            FailureClass::Transient
        );
        assert_eq!(
            ConversionError::Bridge(BridgeError::NotFound("x".into())).classify(),
            FailureClass::Terminal
        );
        assert_eq!(
            ConversionError::TranscriptionFailed("no speech".into()).classify(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_rate_limit_hint_passes_through() {
        let err = ConversionError::Bridge(BridgeError::RateLimited {
            retry_after_secs: Some(12),
        });
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }
}
