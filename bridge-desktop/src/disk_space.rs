//! Disk Space Probe using fs2

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::DiskSpaceProbe};
use std::path::{Path, PathBuf};

/// Reads free space through `statvfs`/`GetDiskFreeSpaceEx`
///
/// The target may not exist yet on a first run, so the nearest existing
/// ancestor is measured instead.
#[derive(Debug, Clone, Default)]
pub struct Fs2DiskSpaceProbe;

impl Fs2DiskSpaceProbe {
    pub fn new() -> Self {
        Self
    }

    fn nearest_existing(path: &Path) -> PathBuf {
        let mut current = path.to_path_buf();
        loop {
            if current.exists() {
                return current;
            }
            match current.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => current = parent.to_path_buf(),
                _ => return PathBuf::from("."),
            }
        }
    }
}

#[async_trait]
impl DiskSpaceProbe for Fs2DiskSpaceProbe {
    async fn available_space(&self, path: &Path) -> Result<u64> {
        let target = Self::nearest_existing(path);
        let bytes = tokio::task::spawn_blocking(move || fs2::available_space(&target))
            .await
            .map_err(|e| bridge_traits::BridgeError::OperationFailed(e.to_string()))??;
        Ok(bytes)
    }
}
