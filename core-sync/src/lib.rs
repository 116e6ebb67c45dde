//! # Incremental Mirror Engine
//!
//! Mirrors a remote disk tree into local files and text artifacts, doing
//! only the work that changed since the previous run.
//!
//! ## Overview
//!
//! Each run lists the remote tree, compares every file with its persisted
//! fingerprint, and decides whether to skip it, download it, convert it, or
//! write an empty placeholder. Work is executed with bounded retries, and the
//! fingerprint is updated only after the action completed, so a second run
//! against an unchanged tree does nothing.
//!
//! ## Components
//!
//! - **Fingerprint Store** (`fingerprint`): per-path record of the last seen
//!   version and action, with cross-run failure backoff
//! - **Action Classifier** (`classifier`): pure per-file decision
//! - **Disk-Space Guard** (`disk_guard`): preflight refusal and periodic
//!   critical-floor checks
//! - **Run Statistics** (`stats`): single-owner aggregator fed by the file
//!   pipelines
//! - **Run History** (`run`): validated run lifecycle persisted per pass
//! - **Sync Orchestrator** (`coordinator`): drives one pass end to end
//! - **Maintenance** (`maintenance`, `report`): pruning, empty-folder
//!   cleanup and the failed-paths report

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod disk_guard;
pub mod error;
pub mod fingerprint;
pub mod maintenance;
pub mod paths;
pub mod report;
pub mod run;
pub mod stats;

pub use classifier::{
    Action, ActionClassifier, ClassifierConfig, Decision, PlaceholderReason, SkipReason,
};
pub use config::SyncConfig;
pub use coordinator::{DownloadBudget, SyncOrchestrator};
pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use disk_guard::{DiskGuard, DiskMonitor, DiskStatus};
pub use error::{ErrorCategory, Result, SyncError};
pub use fingerprint::{
    FailureBackoff, Fingerprint, FingerprintRepository, LastAction, SqliteFingerprintRepository,
    StoreStatistics,
};
pub use paths::PathMapper;
pub use run::{RunCounters, RunStatus, SqliteSyncRunRepository, SyncRun, SyncRunId, SyncRunRepository};
pub use stats::{FailedItem, ItemOutcome, RunOutcome, StatsAggregator, StatsHandle, SyncStatistics};
