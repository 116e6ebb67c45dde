use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited by remote service")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same call may succeed.
    ///
    /// Network failures, server errors and rate limiting are transient.
    /// Everything else (missing resources, rejected credentials, malformed
    /// payloads, local IO) is terminal for the current attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::RateLimited { .. }
            | BridgeError::ServerError { .. }
            | BridgeError::Network(_) => true,
            BridgeError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => BridgeError::Unauthorized(message),
            404 | 410 => BridgeError::NotFound(message),
            429 => BridgeError::RateLimited {
                retry_after_secs: None,
            },
            500..=599 => BridgeError::ServerError { status, message },
            _ => BridgeError::OperationFailed(format!("HTTP {}: {}", status, message)),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            BridgeError::from_status(404, "gone"),
            BridgeError::NotFound(_)
        ));
        assert!(matches!(
            BridgeError::from_status(403, "denied"),
            BridgeError::Unauthorized(_)
        ));
        assert!(matches!(
            BridgeError::from_status(429, ""),
            BridgeError::RateLimited { .. }
        ));
        assert!(matches!(
            BridgeError::from_status(503, "busy"),
            BridgeError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            BridgeError::from_status(400, "bad"),
            BridgeError::OperationFailed(_)
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::Network("reset".into()).is_transient());
        assert!(BridgeError::from_status(502, "").is_transient());
        assert!(BridgeError::from_status(429, "").is_transient());
        assert!(!BridgeError::from_status(404, "").is_transient());
        assert!(!BridgeError::Unauthorized("token".into()).is_transient());
        assert!(!BridgeError::InvalidResponse("json".into()).is_transient());
    }

    #[test]
    fn test_io_timeout_is_transient() {
        let err = BridgeError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_transient());

        let err = BridgeError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        assert!(!err.is_transient());
    }
}
