//! # Disk-Space Guard
//!
//! Free-space checks on the volume receiving the mirror.
//!
//! ## Overview
//!
//! - [`DiskGuard::preflight`] runs once before a run touches anything and
//!   refuses the run when free space is below the floor.
//! - [`DiskGuard::watch`] starts a single background timer that re-checks on
//!   a fixed interval. Pipelines read the latest status instead of probing
//!   themselves; crossing the critical floor trips
//!   [`DiskMonitor::breached`], which the orchestrator treats as fatal.

use crate::{Result, SyncError};
use bridge_traits::DiskSpaceProbe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Latest free-space reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskStatus {
    /// Not checked yet since the monitor started
    Unknown,
    Ok { available: u64 },
    Critical { available: u64, floor: u64 },
}

#[derive(Clone)]
pub struct DiskGuard {
    probe: Arc<dyn DiskSpaceProbe>,
    path: PathBuf,
    floor: u64,
    critical_floor: u64,
    interval: Duration,
}

impl DiskGuard {
    /// `floor` gates the start of a run; `critical_floor` aborts a running one
    pub fn new(
        probe: Arc<dyn DiskSpaceProbe>,
        path: impl Into<PathBuf>,
        floor: u64,
        critical_floor: u64,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            path: path.into(),
            floor,
            critical_floor,
            interval,
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Check the floor before the run starts.
    ///
    /// # Errors
    ///
    /// [`SyncError::DiskSpace`] below the floor, [`SyncError::Io`] when the
    /// volume cannot be queried.
    pub async fn preflight(&self) -> Result<u64> {
        let available = self
            .probe
            .available_space(&self.path)
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e.to_string())))?;

        if available < self.floor {
            warn!(
                available,
                floor = self.floor,
                path = %self.path.display(),
                "Not enough free space to start"
            );
            return Err(SyncError::DiskSpace {
                available,
                required: self.floor,
            });
        }
        debug!(available, floor = self.floor, "Disk space preflight passed");
        Ok(available)
    }

    /// Start the periodic check. The first check happens one interval after
    /// start; the task ends on `stop`, on breach, or when the monitor is
    /// dropped.
    pub fn watch(&self, stop: CancellationToken) -> DiskMonitor {
        let (tx, rx) = watch::channel(DiskStatus::Unknown);
        let breached = CancellationToken::new();
        let guard = self.clone();
        let breach = breached.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(guard.interval);
            // The first tick completes immediately; preflight already covered it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let available = match guard.probe.available_space(&guard.path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "Disk space check failed");
                        continue;
                    }
                };

                if available < guard.critical_floor {
                    error!(
                        available,
                        critical_floor = guard.critical_floor,
                        "Free space below the critical floor"
                    );
                    tx.send_replace(DiskStatus::Critical {
                        available,
                        floor: guard.critical_floor,
                    });
                    breach.cancel();
                    break;
                }
                tx.send_replace(DiskStatus::Ok { available });
            }
        });

        DiskMonitor {
            status: rx,
            breached,
            task,
        }
    }
}

impl std::fmt::Debug for DiskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskGuard")
            .field("path", &self.path)
            .field("floor", &self.floor)
            .field("critical_floor", &self.critical_floor)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Handle to the background check
pub struct DiskMonitor {
    status: watch::Receiver<DiskStatus>,
    breached: CancellationToken,
    task: JoinHandle<()>,
}

impl DiskMonitor {
    pub fn status(&self) -> DiskStatus {
        *self.status.borrow()
    }

    pub fn is_breached(&self) -> bool {
        self.breached.is_cancelled()
    }

    /// Resolves once the critical floor is crossed
    pub async fn breached(&self) {
        self.breached.cancelled().await
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for DiskMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
