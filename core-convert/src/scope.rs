//! # Conversion Scope
//!
//! Every conversion runs inside a [`ConversionScope`]: a private temporary
//! directory for intermediate files plus the list of objects staged in
//! remote storage on the conversion's behalf.
//!
//! [`ConversionScope::release`] removes both and is called by the dispatcher
//! on every exit path. If the scope is dropped without being released (the
//! owning future was cancelled or panicked) the temporary directory is still
//! removed by `TempDir`, and staged objects are deleted from a detached task
//! when a Tokio runtime is available. The exception is a recognition job that
//! is still running remotely: its staged input is left for the next run,
//! which resumes the job from its durable marker and purges the object then.

use bridge_traits::ObjectStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Scoped resources of one conversion
pub struct ConversionScope {
    workspace: Option<TempDir>,
    staged: Vec<String>,
    storage: Option<Arc<dyn ObjectStorage>>,
    pending_marker: Option<String>,
    job_live: bool,
}

/// What [`ConversionScope::release`] cleaned up
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub objects_deleted: usize,
    /// Staged keys that could not be deleted, with the error message
    pub objects_leaked: Vec<(String, String)>,
    pub workspace_removed: bool,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.objects_leaked.is_empty() && self.workspace_removed
    }
}

impl ConversionScope {
    /// Create a scope under the system temporary directory
    pub fn new() -> std::io::Result<Self> {
        Self::from_tempdir(tempfile::Builder::new().prefix("disk-mirror-").tempdir()?)
    }

    /// Create a scope under `base`
    pub fn in_dir(base: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        Self::from_tempdir(
            tempfile::Builder::new()
                .prefix("disk-mirror-")
                .tempdir_in(base)?,
        )
    }

    fn from_tempdir(dir: TempDir) -> std::io::Result<Self> {
        Ok(Self {
            workspace: Some(dir),
            staged: Vec::new(),
            storage: None,
            pending_marker: None,
            job_live: false,
        })
    }

    /// Directory for intermediate files
    pub fn path(&self) -> &Path {
        self.workspace
            .as_ref()
            .map(|d| d.path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Path of an intermediate file inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    pub fn staged_objects(&self) -> &[String] {
        &self.staged
    }

    /// Register an object key before it is uploaded, so a failed or
    /// abandoned upload is still purged.
    pub fn track_staged(&mut self, storage: Arc<dyn ObjectStorage>, key: impl Into<String>) {
        self.storage = Some(storage);
        self.staged.push(key.into());
    }

    /// Remember that a durable job marker exists for `source_path` and that
    /// its remote job is running
    pub fn mark_pending(&mut self, source_path: impl Into<String>) {
        self.pending_marker = Some(source_path.into());
        self.job_live = true;
    }

    /// The remote job reached a terminal state
    pub fn mark_finished(&mut self) {
        self.job_live = false;
    }

    pub fn take_pending_marker(&mut self) -> Option<String> {
        self.pending_marker.take()
    }

    /// Hand staged objects and the job marker over to a later run.
    ///
    /// Used when polling is interrupted: the recognition job keeps running
    /// remotely and is resumed from its marker, so its input must survive
    /// this scope.
    pub fn retain_staged(&mut self) -> Vec<String> {
        self.pending_marker = None;
        self.job_live = false;
        std::mem::take(&mut self.staged)
    }

    /// Delete staged objects and the workspace directory.
    ///
    /// Never fails: problems are logged and reported.
    pub async fn release(mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(storage) = self.storage.take() {
            for key in self.staged.drain(..) {
                match storage.delete_object(&key).await {
                    Ok(()) => {
                        debug!(key = %key, "Deleted staged object");
                        report.objects_deleted += 1;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to delete staged object");
                        report.objects_leaked.push((key, e.to_string()));
                    }
                }
            }
        }

        if let Some(dir) = self.workspace.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => report.workspace_removed = true,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove workspace"),
            }
        } else {
            report.workspace_removed = true;
        }

        report
    }
}

impl Drop for ConversionScope {
    fn drop(&mut self) {
        // A live job is resumed from its marker, which needs the staged input
        if self.staged.is_empty() || self.job_live {
            return;
        }
        let Some(storage) = self.storage.take() else {
            return;
        };
        let keys = std::mem::take(&mut self.staged);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for key in keys {
                        if let Err(e) = storage.delete_object(&key).await {
                            warn!(key = %key, error = %e, "Failed to delete abandoned staged object");
                        }
                    }
                });
            }
            Err(_) => {
                warn!(count = keys.len(), "Staged objects abandoned outside a runtime");
            }
        }
    }
}

impl std::fmt::Debug for ConversionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionScope")
            .field("workspace", &self.path())
            .field("staged", &self.staged)
            .field("pending_marker", &self.pending_marker)
            .finish()
    }
}
