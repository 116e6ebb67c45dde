use bridge_traits::BridgeError;
use core_convert::ConversionError;
use core_runtime::retry::{Classify, FailureClass};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Insufficient disk space: {available} bytes available, {required} required")]
    DiskSpace { available: u64, required: u64 },

    #[error("Remote listing failed: {0}")]
    Listing(String),

    #[error("Download of {path} failed: {message}")]
    Download { path: String, message: String },

    #[error("Conversion of {path} failed: {source}")]
    Conversion {
        path: String,
        #[source]
        source: ConversionError,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid run ID: {0}")]
    InvalidRunId(String),

    #[error("Sync run {0} not found")]
    RunNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Where this error sits in the run-level taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Database(_) | SyncError::Migration(_) => ErrorCategory::Persistence,
            SyncError::DiskSpace { .. } => ErrorCategory::ResourceExhaustion,
            SyncError::Listing(_) | SyncError::Download { .. } | SyncError::Cancelled => {
                ErrorCategory::TransientIo
            }
            SyncError::Conversion { source, .. } => ErrorCategory::from_class(source.classify()),
            SyncError::Io(e) => ErrorCategory::for_io(e),
            SyncError::InvalidStatus(_)
            | SyncError::InvalidStateTransition { .. }
            | SyncError::InvalidRunId(_)
            | SyncError::RunNotFound(_) => ErrorCategory::Persistence,
        }
    }

    /// Errors that must unwind the whole run rather than a single file
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Persistence | ErrorCategory::ResourceExhaustion
        )
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Failure groups used for statistics and the failed-paths report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network or server trouble; retryable
    TransientIo,
    /// Malformed or unsupported input, permanent rejection
    TerminalInput,
    /// Disk-space floor breached or disk full
    ResourceExhaustion,
    /// Fingerprint store unavailable
    Persistence,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientIo => "transient_io",
            ErrorCategory::TerminalInput => "terminal_input",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Persistence => "persistence",
        }
    }

    pub fn from_class(class: FailureClass) -> Self {
        match class {
            FailureClass::Transient => ErrorCategory::TransientIo,
            FailureClass::Terminal => ErrorCategory::TerminalInput,
        }
    }

    pub fn for_io(error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::StorageFull => ErrorCategory::ResourceExhaustion,
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => ErrorCategory::TransientIo,
            _ => ErrorCategory::TerminalInput,
        }
    }

    pub fn for_bridge(error: &BridgeError) -> Self {
        match error {
            BridgeError::Io(e) => Self::for_io(e),
            other => Self::from_class(other.classify()),
        }
    }

    pub fn for_conversion(error: &ConversionError) -> Self {
        match error {
            ConversionError::Bridge(e) => Self::for_bridge(e),
            ConversionError::Io(e) => Self::for_io(e),
            other => Self::from_class(other.classify()),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
