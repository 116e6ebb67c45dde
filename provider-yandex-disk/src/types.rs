//! Yandex API request and response types
//!
//! Data structures for the Disk REST API (`/v1/disk/resources`), the
//! SpeechKit long-running recognition API and the Operation API.

use bridge_traits::RemoteFileDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, YandexError};

// ============================================================================
// Disk
// ============================================================================

/// Disk resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Dir,
    File,
}

/// Disk resource (file or folder)
///
/// See: https://yandex.com/dev/disk-api/doc/en/reference/meta
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub name: String,

    /// Absolute path, prefixed with `disk:`
    pub path: String,

    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// File size in bytes (omitted for folders)
    #[serde(default)]
    pub size: Option<u64>,

    /// Modification time (RFC 3339)
    pub modified: String,

    #[serde(default)]
    pub md5: Option<String>,

    /// Folder contents, one page at a time
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<ResourceList>,
}

/// One page of a folder listing
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceList {
    #[serde(default)]
    pub items: Vec<Resource>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Number of entries in the folder
    #[serde(default)]
    pub total: Option<u64>,
}

impl Resource {
    /// Path relative to the disk root
    pub fn disk_path(&self) -> &str {
        strip_disk_prefix(&self.path)
    }

    pub fn to_descriptor(&self) -> Result<RemoteFileDescriptor> {
        let modified_at = parse_timestamp(&self.modified)?;
        let path = self.disk_path();
        Ok(match self.kind {
            ResourceKind::Dir => RemoteFileDescriptor::dir(path, modified_at),
            ResourceKind::File => {
                let descriptor =
                    RemoteFileDescriptor::file(path, self.size.unwrap_or(0), modified_at);
                match &self.md5 {
                    Some(md5) => descriptor.with_content_hash(md5.clone()),
                    None => descriptor,
                }
            }
        })
    }
}

/// Response of `/resources/download`
#[derive(Debug, Deserialize)]
pub struct DownloadLink {
    pub href: String,
    #[serde(default)]
    pub method: Option<String>,
}

/// `disk:/a/b` and `/a/b` both become `a/b`
pub fn strip_disk_prefix(path: &str) -> &str {
    path.strip_prefix("disk:")
        .unwrap_or(path)
        .trim_start_matches('/')
}

/// Absolute API path for a root-relative path
pub fn api_path(path: &str) -> String {
    format!("/{}", strip_disk_prefix(path).trim_end_matches('/'))
}

fn parse_timestamp(rfc3339: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| YandexError::Parse(format!("bad timestamp {:?}: {}", rfc3339, e)))
}

// ============================================================================
// SpeechKit
// ============================================================================

/// Body of `longRunningRecognize`
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionRequest {
    pub config: RecognitionConfig,
    pub audio: AudioSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognitionConfig {
    pub specification: RecognitionSpecification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionSpecification {
    pub language_code: String,
    pub model: String,
    pub audio_encoding: String,
    pub sample_rate_hertz: u32,
    pub audio_channel_count: u32,
}

impl Default for RecognitionSpecification {
    /// Russian, general model, stereo 16 kHz Opus
    fn default() -> Self {
        Self {
            language_code: "ru-RU".to_string(),
            model: "general".to_string(),
            audio_encoding: "OGG_OPUS".to_string(),
            sample_rate_hertz: 16_000,
            audio_channel_count: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioSource {
    pub uri: String,
}

/// Long-running operation, as returned by submit and by the Operation API
///
/// See: https://yandex.cloud/en/docs/api-design-guide/concepts/operation
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<OperationError>,
    #[serde(default)]
    pub response: Option<RecognitionResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionResult {
    #[serde(default)]
    pub chunks: Vec<RecognitionChunk>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionChunk {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub channel_tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub text: String,
}

impl RecognitionResult {
    /// Best alternative of every chunk, joined with spaces
    pub fn transcript(&self) -> String {
        self.chunks
            .iter()
            .filter_map(|chunk| chunk.alternatives.first())
            .map(|alt| alt.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
