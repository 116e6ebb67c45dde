//! Remote Disk Abstraction
//!
//! The mirror engine consumes a remote tree through [`RemoteDisk`]: a lazy,
//! restartable listing plus a streaming download. Listing pagination is the
//! implementation's concern; callers simply drain the stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::ByteStream;

/// Kind of remote tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEntryKind {
    File,
    Dir,
}

/// A single entry of a remote listing
///
/// `path` is slash-separated and relative to the disk root (no leading
/// slash, no provider prefix). Comparison is exact: case and Unicode form
/// are significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileDescriptor {
    pub path: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub kind: RemoteEntryKind,
    /// Checksum or etag when the remote API supplies one
    pub content_hash: Option<String>,
}

impl RemoteFileDescriptor {
    pub fn file(path: impl Into<String>, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified_at,
            kind: RemoteEntryKind::File,
            content_hash: None,
        }
    }

    pub fn dir(path: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modified_at,
            kind: RemoteEntryKind::Dir,
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == RemoteEntryKind::Dir
    }

    /// Final path component
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercased extension of the final component, if any
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
            _ => None,
        }
    }
}

/// Remote disk trait
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut entries = disk.list_tree("/");
/// while let Some(entry) = entries.next().await {
///     let entry = entry?;
///     if !entry.is_dir() {
///         let mut body = disk.download(&entry.path).await?;
///         tokio::io::copy(&mut body, &mut file).await?;
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteDisk: Send + Sync {
    /// Lazily walk the tree below `root`.
    ///
    /// The stream is finite. An error item ends the walk; calling again
    /// restarts from `root`.
    fn list_tree<'a>(&'a self, root: &'a str) -> BoxStream<'a, Result<RemoteFileDescriptor>>;

    /// Open a streaming download of a file.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, `RateLimited` or `ServerError`.
    async fn download(&self, path: &str) -> Result<ByteStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_extension() {
        let desc = RemoteFileDescriptor::file("reports/2024/Q1.Summary.CSV", 10, Utc::now());
        assert_eq!(desc.name(), "Q1.Summary.CSV");
        assert_eq!(desc.extension(), Some("csv".to_string()));
    }

    #[test]
    fn test_extension_edge_cases() {
        let now = Utc::now();
        assert_eq!(RemoteFileDescriptor::file(".DS_Store", 0, now).extension(), None);
        assert_eq!(RemoteFileDescriptor::file("README", 0, now).extension(), None);
        assert_eq!(RemoteFileDescriptor::file("trailing.", 0, now).extension(), None);
        assert_eq!(RemoteFileDescriptor::file("top.txt", 0, now).name(), "top.txt");
    }

    #[test]
    fn test_dir_descriptor() {
        let desc = RemoteFileDescriptor::dir("photos", Utc::now());
        assert!(desc.is_dir());
        assert_eq!(desc.size, 0);
    }
}
