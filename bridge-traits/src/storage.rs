//! Disk Space Abstraction

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Reports free space on the volume holding a path
#[async_trait]
pub trait DiskSpaceProbe: Send + Sync {
    /// Bytes available to the current user on the volume containing `path`.
    async fn available_space(&self, path: &Path) -> Result<u64>;
}
