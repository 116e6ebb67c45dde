//! Engine policy for a mirror run

use crate::classifier::{ClassifierConfig, MIB};
use crate::fingerprint::FailureBackoff;
use crate::paths::PathMapper;
use core_runtime::config::AppConfig;
use core_runtime::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote folder to mirror
    pub remote_root: String,
    /// Raw downloads
    pub mirror_dir: PathBuf,
    /// Text artifacts
    pub output_dir: PathBuf,
    pub classifier: ClassifierConfig,
    pub download_retry: RetryPolicy,
    /// Policy for local conversions
    pub conversion_retry: RetryPolicy,
    /// Policy for video; one attempt, a timed-out job is retried next run
    pub video_retry: RetryPolicy,
    pub failure_backoff: FailureBackoff,
    /// Free space required to start a run
    pub min_free_bytes: u64,
    /// Free space below which a running run aborts
    pub critical_free_bytes: u64,
    pub disk_check_interval: Duration,
    /// Concurrent file pipelines
    pub concurrency: usize,
    /// Bytes downloaded per run before files turn into placeholders
    pub download_budget: Option<u64>,
    /// Delete fingerprints and local files of paths gone remotely
    pub prune_deleted: bool,
    pub remove_empty_dirs: bool,
    pub failed_report_path: Option<PathBuf>,
    /// Resume recognition jobs left by earlier runs before listing
    pub resume_pending: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_root: "/".to_string(),
            mirror_dir: PathBuf::from("localdata/downloaded_files"),
            output_dir: PathBuf::from("localdata/markdown_files"),
            classifier: ClassifierConfig::default(),
            download_retry: RetryPolicy::default(),
            conversion_retry: RetryPolicy::default().with_max_attempts(2),
            video_retry: RetryPolicy::no_retry(),
            failure_backoff: FailureBackoff::default(),
            min_free_bytes: GIB,
            critical_free_bytes: 256 * MIB,
            disk_check_interval: Duration::from_secs(30),
            concurrency: 5,
            download_budget: Some(10 * GIB),
            prune_deleted: false,
            remove_empty_dirs: true,
            failed_report_path: None,
            resume_pending: true,
        }
    }
}

impl SyncConfig {
    /// Defaults with the locations taken from the application config
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            remote_root: app.remote_root.clone(),
            mirror_dir: app.mirror_dir.clone(),
            output_dir: app.output_dir.clone(),
            failed_report_path: Some(app.failed_report_path.clone()),
            ..Self::default()
        }
    }

    pub fn path_mapper(&self) -> PathMapper {
        PathMapper::new(
            self.remote_root.clone(),
            self.mirror_dir.clone(),
            self.output_dir.clone(),
        )
    }

    pub fn with_remote_root(mut self, root: impl Into<String>) -> Self {
        self.remote_root = root.into();
        self
    }

    pub fn with_dirs(mut self, mirror_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = mirror_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_download_retry(mut self, policy: RetryPolicy) -> Self {
        self.download_retry = policy;
        self
    }

    pub fn with_conversion_retry(mut self, policy: RetryPolicy) -> Self {
        self.conversion_retry = policy;
        self
    }

    pub fn with_video_retry(mut self, policy: RetryPolicy) -> Self {
        self.video_retry = policy;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: FailureBackoff) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn with_disk_floors(mut self, min_free: u64, critical_free: u64) -> Self {
        self.min_free_bytes = min_free;
        self.critical_free_bytes = critical_free;
        self
    }

    pub fn with_disk_check_interval(mut self, interval: Duration) -> Self {
        self.disk_check_interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_download_budget(mut self, budget: Option<u64>) -> Self {
        self.download_budget = budget;
        self
    }

    pub fn with_prune_deleted(mut self, enabled: bool) -> Self {
        self.prune_deleted = enabled;
        self
    }

    pub fn with_remove_empty_dirs(mut self, enabled: bool) -> Self {
        self.remove_empty_dirs = enabled;
        self
    }

    pub fn with_failed_report(mut self, path: Option<PathBuf>) -> Self {
        self.failed_report_path = path;
        self
    }

    pub fn with_resume_pending(mut self, enabled: bool) -> Self {
        self.resume_pending = enabled;
        self
    }
}
