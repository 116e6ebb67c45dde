//! SpeechKit long-running recognition
//!
//! Implements [`TranscriptionService`]: a job is submitted against an audio
//! object in the staging bucket and then polled through the Operation API.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::{TranscriptionService, TranscriptionStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{check_status, YandexError};
use crate::types::{AudioSource, Operation, RecognitionConfig, RecognitionRequest, RecognitionSpecification};

/// Long-running recognition endpoint
pub const RECOGNIZE_URL: &str =
    "https://transcribe.api.cloud.yandex.net/speech/stt/v2/longRunningRecognize";

/// Operation API base
pub const OPERATION_API_BASE: &str = "https://operation.api.cloud.yandex.net/operations";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// SpeechKit client authenticated with a service-account API key
pub struct SpeechKitClient {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    specification: RecognitionSpecification,
    recognize_url: String,
    operation_base: String,
}

impl SpeechKitClient {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            specification: RecognitionSpecification::default(),
            recognize_url: RECOGNIZE_URL.to_string(),
            operation_base: OPERATION_API_BASE.to_string(),
        }
    }

    pub fn with_specification(mut self, specification: RecognitionSpecification) -> Self {
        self.specification = specification;
        self
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.specification.language_code = language_code.into();
        self
    }

    pub fn with_endpoints(
        mut self,
        recognize_url: impl Into<String>,
        operation_base: impl Into<String>,
    ) -> Self {
        self.recognize_url = recognize_url.into();
        self.operation_base = operation_base.into().trim_end_matches('/').to_string();
        self
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        request
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
    }
}

#[async_trait]
impl TranscriptionService for SpeechKitClient {
    #[instrument(skip(self), fields(uri = %object_uri))]
    async fn submit_transcription(&self, object_uri: &str) -> Result<String> {
        let body = RecognitionRequest {
            config: RecognitionConfig {
                specification: self.specification.clone(),
            },
            audio: AudioSource {
                uri: object_uri.to_string(),
            },
        };
        let request = self.authorized(HttpRequest::new(HttpMethod::Post, &self.recognize_url).json(&body)?);

        let response = check_status(self.http_client.execute(request).await?)?;
        let operation: Operation = response.json()?;
        let id = operation.id.ok_or(YandexError::MissingField("id"))?;

        info!(operation_id = %id, "Recognition submitted");
        Ok(id)
    }

    #[instrument(skip(self), fields(operation_id = %job_id))]
    async fn poll_status(&self, job_id: &str) -> Result<TranscriptionStatus> {
        let url = format!("{}/{}", self.operation_base, urlencoding::encode(job_id));
        let request = self.authorized(HttpRequest::new(HttpMethod::Get, url));

        let response = check_status(self.http_client.execute(request).await?)?;
        let operation: Operation = response.json()?;

        if !operation.done {
            debug!("Recognition still running");
            return Ok(TranscriptionStatus::Pending);
        }
        if let Some(error) = operation.error {
            warn!(code = ?error.code, message = %error.message, "Recognition failed");
            return Ok(TranscriptionStatus::Failed(error.message));
        }

        let transcript = operation.response.unwrap_or_default().transcript();
        debug!(chars = transcript.chars().count(), "Recognition finished");
        Ok(TranscriptionStatus::Succeeded(transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::{ByteStream, HttpResponse};
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
            async fn download_stream(&self, url: String) -> Result<ByteStream>;
        }
    }

    fn json(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_submit_sends_specification_and_returns_operation_id() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body.as_deref().unwrap_or_default()).unwrap();
                req.method == HttpMethod::Post
                    && req.url == RECOGNIZE_URL
                    && req.headers.get("Authorization").map(String::as_str) == Some("Api-Key k-1")
                    && body["config"]["specification"]["model"] == "general"
                    && body["audio"]["uri"] == "https://storage.yandexcloud.net/b/a.ogg"
            })
            .returning(|_| Ok(json(200, r#"{"id":"e03sup6d5h7rq574ht8g","done":false}"#)));

        let client = SpeechKitClient::new(Arc::new(http), "k-1");
        let id = client
            .submit_transcription("https://storage.yandexcloud.net/b/a.ogg")
            .await
            .unwrap();
        assert_eq!(id, "e03sup6d5h7rq574ht8g");
    }

    #[tokio::test]
    async fn test_submit_without_id_is_invalid_response() {
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(|_| Ok(json(200, r#"{"done":false}"#)));

        let err = SpeechKitClient::new(Arc::new(http), "k")
            .submit_transcription("uri")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_poll_maps_operation_states() {
        let mut http = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        http.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.url == format!("{}/op-7", OPERATION_API_BASE))
            .returning(|_| Ok(json(200, r#"{"id":"op-7","done":false}"#)));
        http.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(json(
                    200,
                    r#"{"id":"op-7","done":true,"response":{"chunks":[
                        {"alternatives":[{"text":"первая фраза"}],"channelTag":"1"},
                        {"alternatives":[{"text":"вторая"}],"channelTag":"1"}
                    ]}}"#,
                ))
            });
        http.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(json(
                    200,
                    r#"{"id":"op-7","done":true,"error":{"code":3,"message":"audio is empty"}}"#,
                ))
            });

        let client = SpeechKitClient::new(Arc::new(http), "k");
        assert_eq!(client.poll_status("op-7").await.unwrap(), TranscriptionStatus::Pending);
        assert_eq!(
            client.poll_status("op-7").await.unwrap(),
            TranscriptionStatus::Succeeded("первая фраза вторая".to_string())
        );
        assert_eq!(
            client.poll_status("op-7").await.unwrap(),
            TranscriptionStatus::Failed("audio is empty".to_string())
        );
    }

    #[tokio::test]
    async fn test_poll_server_error_is_transient() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(json(502, r#"{"code":14,"message":"unavailable"}"#)));

        let err = SpeechKitClient::new(Arc::new(http), "k")
            .poll_status("op")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
