//! Error types for the Yandex provider

use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpResponse;
use serde::Deserialize;
use thiserror::Error;

/// Yandex provider errors
#[derive(Error, Debug)]
pub enum YandexError {
    /// API request returned a non-success status
    #[error("Yandex API error (status {status}): {error}: {description}")]
    Api {
        status: u16,
        error: String,
        description: String,
    },

    /// Failed to parse an API response
    #[error("Failed to parse API response: {0}")]
    Parse(String),

    /// A required field was absent from an API response
    #[error("API response is missing `{0}`")]
    MissingField(&'static str),

    /// Request signing failed
    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for Yandex operations
pub type Result<T> = std::result::Result<T, YandexError>;

impl From<YandexError> for BridgeError {
    fn from(error: YandexError) -> Self {
        match error {
            YandexError::Api {
                status,
                error,
                description,
            } => BridgeError::from_status(status, format!("{}: {}", error, description)),
            YandexError::Parse(msg) => BridgeError::InvalidResponse(msg),
            YandexError::MissingField(field) => {
                BridgeError::InvalidResponse(format!("missing field `{}`", field))
            }
            YandexError::Signing(msg) => BridgeError::OperationFailed(msg),
            YandexError::Bridge(e) => e,
        }
    }
}

/// Error document returned by the Disk and Cloud JSON APIs
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    description: Option<String>,
    message: Option<String>,
    code: Option<serde_json::Value>,
}

/// Pass a success response through; map anything else to a [`BridgeError`]
/// carrying the service's own error description.
///
/// 429 keeps its `Retry-After` hint.
pub(crate) fn check_status(response: HttpResponse) -> bridge_traits::error::Result<HttpResponse> {
    if response.is_success() || response.status == 429 {
        return response.error_for_status();
    }

    let body: ApiErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
    let error = body
        .error
        .or_else(|| body.code.map(|c| c.to_string()))
        .unwrap_or_else(|| format!("HTTP {}", response.status));
    let description = body
        .description
        .or(body.message)
        .unwrap_or_else(|| String::from_utf8_lossy(&response.body).chars().take(256).collect());

    Err(YandexError::Api {
        status: response.status,
        error,
        description,
    }
    .into())
}
