//! Yandex Object Storage staging bucket
//!
//! Implements [`ObjectStorage`] over the S3-compatible REST API with
//! path-style addressing (`<endpoint>/<bucket>/<key>`) and SigV4 headers.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::ObjectStorage;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::signing::{amz_date, encode_key, sha256_hex, CanonicalRequest, Signer, EMPTY_PAYLOAD_SHA256};

/// Object Storage endpoint
pub const STORAGE_ENDPOINT: &str = "https://storage.yandexcloud.net";

/// Signing region of Object Storage
pub const STORAGE_REGION: &str = "ru-central1";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Staging bucket client
///
/// # Example
///
/// ```ignore
/// use provider_yandex_disk::YandexObjectStorage;
///
/// let storage = YandexObjectStorage::new(http_client, key_id, secret, "my-bucket");
/// let key = storage.upload_object(audio, "audio/1234/talk.ogg").await?;
/// let uri = storage.object_uri(&key);
/// ```
pub struct YandexObjectStorage {
    http_client: Arc<dyn HttpClient>,
    signer: Signer,
    bucket: String,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl YandexObjectStorage {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            signer: Signer::new(access_key_id, secret_access_key, STORAGE_REGION, "s3"),
            bucket: bucket.into(),
            endpoint: STORAGE_ENDPOINT.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn object_path(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, encode_key(key.trim_start_matches('/')))
    }

    fn host(&self) -> &str {
        self.endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint)
    }

    /// Build a signed request. `Host` is signed but left to the HTTP client
    /// to send.
    fn signed(&self, method: HttpMethod, key: &str, body: Option<&Bytes>) -> Result<HttpRequest> {
        let path = self.object_path(key);
        let payload_sha256 = match body {
            Some(bytes) => sha256_hex(bytes),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };
        let at = self.clock.now();
        let date = amz_date(at);

        let authorization = self
            .signer
            .authorization(
                &CanonicalRequest {
                    method: method.as_str(),
                    path: &path,
                    query: "",
                    headers: &[
                        ("host", self.host()),
                        ("x-amz-content-sha256", payload_sha256.as_str()),
                        ("x-amz-date", date.as_str()),
                    ],
                    payload_sha256: &payload_sha256,
                },
                at,
            )
            .map_err(BridgeError::from)?;

        let mut request = HttpRequest::new(method, format!("{}{}", self.endpoint, path))
            .header("x-amz-date", date)
            .header("x-amz-content-sha256", payload_sha256)
            .header("Authorization", authorization);
        if let Some(bytes) = body {
            request = request
                .header("Content-Type", "application/octet-stream")
                .body(bytes.clone());
        }
        Ok(request)
    }
}

#[async_trait]
impl ObjectStorage for YandexObjectStorage {
    #[instrument(skip(self, bytes), fields(key = %key, bytes = bytes.len()))]
    async fn upload_object(&self, bytes: Bytes, key: &str) -> Result<String> {
        let request = self
            .signed(HttpMethod::Put, key, Some(&bytes))?
            .timeout(UPLOAD_TIMEOUT);
        self.http_client.execute(request).await?.error_for_status()?;

        info!(bucket = %self.bucket, "Staged object uploaded");
        Ok(key.to_string())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        let request = self
            .signed(HttpMethod::Delete, key, None)?
            .timeout(DELETE_TIMEOUT);

        match self.http_client.execute(request).await?.error_for_status() {
            Ok(_) => {
                debug!(bucket = %self.bucket, "Staged object deleted");
                Ok(())
            }
            Err(BridgeError::NotFound(_)) => {
                debug!(bucket = %self.bucket, "Staged object already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn object_uri(&self, key: &str) -> String {
        format!("{}{}", self.endpoint, self.object_path(key))
    }
}
