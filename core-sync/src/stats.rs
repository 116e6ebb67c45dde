//! # Run Statistics
//!
//! Counters for one run, owned by a single aggregator task.
//!
//! ## Overview
//!
//! File pipelines never touch [`SyncStatistics`] directly. Each sends an
//! [`ItemOutcome`] through a cloned [`StatsHandle`]; the [`StatsAggregator`]
//! task applies it, emits a progress event, and hands the final statistics
//! back once every handle is dropped.
//!
//! ```ignore
//! let (handle, aggregator) = StatsAggregator::spawn(run_id.clone(), events.clone());
//! handle.record("/docs/a.csv", ItemOutcome::Converted { category, bytes: Some(10_240) }).await;
//! drop(handle);
//! let stats = aggregator.finish().await;
//! ```

use crate::classifier::{PlaceholderReason, SkipReason};
use crate::error::ErrorCategory;
use core_convert::FileCategory;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// The listing was exhausted and every pipeline finished
    Completed,
    /// Free space was below the floor; nothing was touched
    Refused,
    /// Cancellation was honored at a checkpoint
    Interrupted,
    /// A run-level failure unwound the run
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Refused => "refused",
            RunOutcome::Interrupted => "interrupted",
            RunOutcome::Aborted => "aborted",
        }
    }

    /// Process exit status for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Refused => 2,
            RunOutcome::Interrupted => 3,
            RunOutcome::Aborted => 4,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Skipped {
        reason: SkipReason,
        category: FileCategory,
    },
    Placeholder {
        reason: PlaceholderReason,
        category: FileCategory,
    },
    /// Mirrored without conversion
    Downloaded { category: FileCategory, bytes: u64 },
    /// Artifact written; `bytes` is `None` when nothing was downloaded this
    /// run (a resumed recognition job)
    Converted {
        category: FileCategory,
        bytes: Option<u64>,
    },
    Failed {
        category: ErrorCategory,
        message: String,
        /// Bytes downloaded before the failure
        bytes: u64,
    },
    /// Downloaded, but its recognition job continues in a later run
    Pending { bytes: u64 },
}

/// A failed path with its message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub path: String,
    pub message: String,
}

/// Process-scoped counters for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub items_processed: u64,
    pub downloaded: u64,
    pub converted: u64,
    pub placeholders: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Recognition jobs still running when the run ended
    pub pending: u64,
    pub bytes_transferred: u64,
    pub skipped_by_reason: BTreeMap<SkipReason, u64>,
    pub skipped_by_category: BTreeMap<FileCategory, u64>,
    pub placeholders_by_reason: BTreeMap<PlaceholderReason, u64>,
    pub converted_by_category: BTreeMap<FileCategory, u64>,
    pub errors: BTreeMap<ErrorCategory, Vec<FailedItem>>,
    /// Fingerprints removed because the path is gone remotely
    pub pruned: u64,
    /// Run-level failure message, if the run was aborted or refused
    pub run_error: Option<String>,
    pub duration_secs: u64,
}

impl SyncStatistics {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            outcome: RunOutcome::Completed,
            items_processed: 0,
            downloaded: 0,
            converted: 0,
            placeholders: 0,
            skipped: 0,
            failed: 0,
            pending: 0,
            bytes_transferred: 0,
            skipped_by_reason: BTreeMap::new(),
            skipped_by_category: BTreeMap::new(),
            placeholders_by_reason: BTreeMap::new(),
            converted_by_category: BTreeMap::new(),
            errors: BTreeMap::new(),
            pruned: 0,
            run_error: None,
            duration_secs: 0,
        }
    }

    pub fn apply(&mut self, path: &str, outcome: ItemOutcome) {
        self.items_processed += 1;
        match outcome {
            ItemOutcome::Skipped { reason, category } => {
                self.skipped += 1;
                *self.skipped_by_reason.entry(reason).or_default() += 1;
                *self.skipped_by_category.entry(category).or_default() += 1;
            }
            ItemOutcome::Placeholder { reason, .. } => {
                self.placeholders += 1;
                *self.placeholders_by_reason.entry(reason).or_default() += 1;
            }
            ItemOutcome::Downloaded { bytes, .. } => {
                self.downloaded += 1;
                self.bytes_transferred += bytes;
            }
            ItemOutcome::Converted { category, bytes } => {
                if let Some(bytes) = bytes {
                    self.downloaded += 1;
                    self.bytes_transferred += bytes;
                }
                self.converted += 1;
                *self.converted_by_category.entry(category).or_default() += 1;
            }
            ItemOutcome::Failed {
                category,
                message,
                bytes,
            } => {
                self.failed += 1;
                self.bytes_transferred += bytes;
                self.errors.entry(category).or_default().push(FailedItem {
                    path: path.to_string(),
                    message,
                });
            }
            ItemOutcome::Pending { bytes } => {
                self.downloaded += 1;
                self.pending += 1;
                self.bytes_transferred += bytes;
            }
        }
    }

    /// Error categories by number of failures, largest first
    pub fn top_error_categories(&self) -> Vec<(ErrorCategory, usize)> {
        let mut counts: Vec<_> = self.errors.iter().map(|(c, items)| (*c, items.len())).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts
    }

    /// Every failure as (category, item), in category order
    pub fn failures(&self) -> impl Iterator<Item = (ErrorCategory, &FailedItem)> {
        self.errors
            .iter()
            .flat_map(|(category, items)| items.iter().map(move |item| (*category, item)))
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// Human-readable summary, one line per entry
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Outcome: {}", self.outcome),
            format!(
                "Processed: {} (downloaded {}, converted {}, placeholders {}, skipped {}, failed {})",
                self.items_processed,
                self.downloaded,
                self.converted,
                self.placeholders,
                self.skipped,
                self.failed
            ),
            format!("Transferred: {:.1} MB", self.bytes_transferred as f64 / 1_048_576.0),
        ];
        if self.pending > 0 {
            lines.push(format!("Transcriptions still running: {}", self.pending));
        }
        for (reason, count) in &self.skipped_by_reason {
            lines.push(format!("Skipped ({}): {}", reason, count));
        }
        for (reason, count) in &self.placeholders_by_reason {
            lines.push(format!("Placeholders ({}): {}", reason, count));
        }
        for (category, count) in &self.converted_by_category {
            lines.push(format!("Converted ({}): {}", category, count));
        }
        for (category, count) in self.top_error_categories() {
            lines.push(format!("Errors ({}): {}", category, count));
            if let Some(items) = self.errors.get(&category) {
                for item in items.iter().take(3) {
                    lines.push(format!("  {}: {}", item.path, item.message));
                }
            }
        }
        if self.pruned > 0 {
            lines.push(format!("Pruned: {}", self.pruned));
        }
        if let Some(error) = &self.run_error {
            lines.push(format!("Run error: {}", error));
        }
        lines
    }
}

// ============================================================================
// Aggregator
// ============================================================================

#[derive(Debug)]
struct StatsUpdate {
    path: String,
    outcome: ItemOutcome,
}

/// Sender side given to each file pipeline
#[derive(Debug, Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<StatsUpdate>,
}

impl StatsHandle {
    pub async fn record(&self, path: impl Into<String>, outcome: ItemOutcome) {
        let update = StatsUpdate {
            path: path.into(),
            outcome,
        };
        if self.tx.send(update).await.is_err() {
            warn!("Statistics aggregator is gone; outcome dropped");
        }
    }
}

/// Single owner of the run's [`SyncStatistics`]
pub struct StatsAggregator {
    task: JoinHandle<SyncStatistics>,
    run_id: String,
}

impl StatsAggregator {
    pub fn spawn(run_id: impl Into<String>, events: Option<EventBus>) -> (StatsHandle, Self) {
        let run_id = run_id.into();
        let (tx, mut rx) = mpsc::channel::<StatsUpdate>(256);
        let task_run_id = run_id.clone();

        let task = tokio::spawn(async move {
            let mut stats = SyncStatistics::new(task_run_id.clone());
            while let Some(update) = rx.recv().await {
                stats.apply(&update.path, update.outcome);
                if let Some(events) = &events {
                    events
                        .emit(CoreEvent::Sync(SyncEvent::Progress {
                            run_id: task_run_id.clone(),
                            items_processed: stats.items_processed,
                            bytes_transferred: stats.bytes_transferred,
                            path: update.path,
                        }))
                        .ok();
                }
            }
            stats
        });

        (StatsHandle { tx }, Self { task, run_id })
    }

    /// Wait for every handle to be dropped and return the totals
    pub async fn finish(self) -> SyncStatistics {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Statistics aggregator failed");
                SyncStatistics::new(self.run_id)
            }
        }
    }
}
