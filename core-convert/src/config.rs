//! Converter configuration

use core_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the dispatcher does with a file no converter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenericPolicy {
    /// Write a stub artifact carrying only the file's metadata
    CopyWithHeader,
    /// Produce no artifact; the raw mirror copy is all there is
    #[default]
    Skip,
}

/// Limits applied when rendering tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLimits {
    pub max_rows: Option<usize>,
    pub max_columns: Option<usize>,
    /// Workbook sheets rendered per file
    pub max_sheets: Option<usize>,
}

impl Default for TableLimits {
    fn default() -> Self {
        Self {
            max_rows: None,
            max_columns: None,
            max_sheets: Some(20),
        }
    }
}

/// External tool executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub pdftotext: String,
    pub pandoc: String,
    pub xlsx2csv: String,
    /// LibreOffice, for legacy binary Office formats pandoc cannot read
    pub soffice: String,
    /// 7-Zip, for `7z` and `rar` archives
    pub sevenzip: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            pdftotext: "pdftotext".to_string(),
            pandoc: "pandoc".to_string(),
            xlsx2csv: "xlsx2csv".to_string(),
            soffice: "soffice".to_string(),
            sevenzip: "7z".to_string(),
        }
    }
}

/// Limits applied when indexing archives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Nested archives opened below the top-level one
    pub max_depth: u32,
    /// Entries listed per archive before the index is cut short
    pub max_entries: usize,
    /// Characters of extracted text kept per entry
    pub max_text_chars: usize,
    /// Total bytes unpacked for one top-level archive
    pub max_unpacked_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_entries: 500,
            max_text_chars: 64 * 1024,
            max_unpacked_bytes: 512 * 1024 * 1024,
        }
    }
}

impl ArchiveLimits {
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn with_max_text_chars(mut self, chars: usize) -> Self {
        self.max_text_chars = chars;
        self
    }

    pub fn with_max_unpacked_bytes(mut self, bytes: u64) -> Self {
        self.max_unpacked_bytes = bytes;
        self
    }
}

/// Video transcription settings
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Pause between status polls
    pub poll_interval: Duration,
    /// Wall-clock ceiling for a single recognition job
    pub timeout: Duration,
    /// Object key prefix for staged audio
    pub staging_prefix: String,
    /// Policy for staging uploads and job submission
    pub upload_retry: RetryPolicy,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            staging_prefix: "audio".to_string(),
            upload_retry: RetryPolicy::default(),
        }
    }
}

impl VideoConfig {
    /// Number of polls that fit in the timeout, at least one
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let polls = self.timeout.as_millis().div_ceil(interval);
        polls.clamp(1, u32::MAX as u128) as u32
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_upload_retry(mut self, policy: RetryPolicy) -> Self {
        self.upload_retry = policy;
        self
    }
}

/// Settings shared by all converters
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub tools: ToolPaths,
    pub tables: TableLimits,
    /// Last PDF page passed to the text extractor
    pub pdf_max_pages: u32,
    pub generic_policy: GenericPolicy,
    /// `None` leaves archives to the generic path
    pub archives: Option<ArchiveLimits>,
    pub video: VideoConfig,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            tables: TableLimits::default(),
            pdf_max_pages: 100,
            generic_policy: GenericPolicy::default(),
            archives: Some(ArchiveLimits::default()),
            video: VideoConfig::default(),
        }
    }
}

impl ConversionConfig {
    pub fn with_generic_policy(mut self, policy: GenericPolicy) -> Self {
        self.generic_policy = policy;
        self
    }

    pub fn with_table_limits(mut self, limits: TableLimits) -> Self {
        self.tables = limits;
        self
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_archives(mut self, limits: Option<ArchiveLimits>) -> Self {
        self.archives = limits;
        self
    }

    pub fn with_video(mut self, video: VideoConfig) -> Self {
        self.video = video;
        self
    }
}
