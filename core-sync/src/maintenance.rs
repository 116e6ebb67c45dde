//! Housekeeping after a completed run.

use crate::fingerprint::FingerprintRepository;
use crate::paths::PathMapper;
use crate::Result;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Remove fingerprints, mirrored files and artifacts for paths that were not
/// seen in a complete listing. Returns the number of fingerprints removed.
///
/// Only call this after the listing was exhausted; a partial listing would
/// prune live files.
pub async fn prune_deleted(
    store: &dyn FingerprintRepository,
    mapper: &PathMapper,
    seen: &HashSet<String>,
) -> Result<u64> {
    let mut pruned = 0;
    for path in store.all_paths().await? {
        if seen.contains(&path) {
            continue;
        }

        remove_if_present(&mapper.raw_path(&path)).await?;
        remove_if_present(&mapper.artifact_path(&path)).await?;
        if store.delete(&path).await? {
            debug!(path = %path, "Pruned deleted remote path");
            pruned += 1;
        }
    }

    if pruned > 0 {
        info!(pruned, "Pruned paths deleted remotely");
    }
    Ok(pruned)
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove empty directories below `root`, deepest first. `root` itself is
/// kept. Returns the number of directories removed.
pub async fn remove_empty_dirs(root: &Path) -> Result<u64> {
    let root = root.to_path_buf();
    let removed = tokio::task::spawn_blocking(move || sweep(&root))
        .await
        .map_err(|e| io::Error::other(e.to_string()))??;

    if removed > 0 {
        debug!(removed, "Removed empty directories");
    }
    Ok(removed)
}

fn sweep(root: &Path) -> io::Result<u64> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut stack: Vec<(PathBuf, bool)> = vec![(root.to_path_buf(), false)];
    while let Some((dir, expanded)) = stack.pop() {
        if expanded {
            if dir == root {
                continue;
            }
            match std::fs::remove_dir(&dir) {
                Ok(()) => removed += 1,
                // Not empty, or raced with a writer
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    if is_empty(&dir) {
                        warn!(dir = %dir.display(), error = %e, "Could not remove empty directory");
                    }
                }
                Err(_) => {}
            }
            continue;
        }

        stack.push((dir.clone(), true));
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                stack.push((entry.path(), false));
            }
        }
    }
    Ok(removed)
}

fn is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
