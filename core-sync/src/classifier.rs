//! # Action Classifier
//!
//! Decides what to do with one remote file given its stored fingerprint.
//!
//! ## Decision Order
//!
//! First match wins:
//!
//! 1. Name or path matches a skip pattern → [`Action::Skip`] (`pattern`)
//! 2. Category disabled wholesale → [`Action::Skip`] (`category-disabled`)
//! 3. Fingerprint exists for the same version:
//!    - settled (downloaded, converted, placeholder) → `unchanged`
//!    - failed and still inside its backoff window → `backing-off`
//!    - recognition job still pending → `transcription-pending`
//! 4. Size above the category ceiling → [`Action::MarkEmptyPlaceholder`]
//! 5. [`Action::DownloadAndConvert`] when a converter accepts the file,
//!    otherwise [`Action::Download`]
//!
//! The classifier is a pure function of its inputs. The current time is an
//! input (it only matters for the backoff window) and so is whether a
//! converter is registered for the file.

use crate::fingerprint::{Fingerprint, LastAction};
use bridge_traits::RemoteFileDescriptor;
use chrono::{DateTime, Utc};
use core_convert::FileCategory;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

pub const MIB: u64 = 1024 * 1024;

/// Why a file is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Directory,
    Pattern,
    CategoryDisabled,
    Unchanged,
    BackingOff,
    TranscriptionPending,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Directory => "directory",
            SkipReason::Pattern => "pattern",
            SkipReason::CategoryDisabled => "category-disabled",
            SkipReason::Unchanged => "unchanged",
            SkipReason::BackingOff => "backing-off",
            SkipReason::TranscriptionPending => "transcription-pending",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stub is written instead of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaceholderReason {
    /// Larger than the category's size ceiling
    SizeCeiling,
    /// The run's download budget cannot cover the file
    Budget,
}

impl PlaceholderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderReason::SizeCeiling => "size-ceiling",
            PlaceholderReason::Budget => "budget",
        }
    }
}

impl std::fmt::Display for PlaceholderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Skip(SkipReason),
    Download,
    DownloadAndConvert,
    MarkEmptyPlaceholder(PlaceholderReason),
}

impl Action {
    pub fn needs_download(&self) -> bool {
        matches!(self, Action::Download | Action::DownloadAndConvert)
    }
}

/// Classifier output: the action plus the category it was decided for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub category: FileCategory,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Glob patterns matched against the file name and the full path
    pub skip_patterns: Vec<String>,
    /// Categories never downloaded
    pub disabled_categories: BTreeSet<FileCategory>,
    /// Per-category size ceilings overriding `default_ceiling`
    pub size_ceilings: BTreeMap<FileCategory, u64>,
    /// Ceiling for categories without an override; `None` disables it
    pub default_ceiling: Option<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            skip_patterns: [
                "*.tmp",
                "~$*",
                ".~lock.*#",
                "*.bak",
                "*.swp",
                ".DS_Store",
                "Thumbs.db",
                "desktop.ini",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            disabled_categories: BTreeSet::from([FileCategory::Columnar]),
            size_ceilings: BTreeMap::from([(FileCategory::Video, 500 * MIB)]),
            default_ceiling: Some(100 * MIB),
        }
    }
}

impl ClassifierConfig {
    pub fn with_skip_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.skip_patterns.push(pattern.into());
        self
    }

    pub fn with_disabled_category(mut self, category: FileCategory) -> Self {
        self.disabled_categories.insert(category);
        self
    }

    pub fn with_enabled_category(mut self, category: FileCategory) -> Self {
        self.disabled_categories.remove(&category);
        self
    }

    pub fn with_size_ceiling(mut self, category: FileCategory, bytes: u64) -> Self {
        self.size_ceilings.insert(category, bytes);
        self
    }

    pub fn with_default_ceiling(mut self, bytes: Option<u64>) -> Self {
        self.default_ceiling = bytes;
        self
    }

    pub fn ceiling_for(&self, category: FileCategory) -> Option<u64> {
        self.size_ceilings
            .get(&category)
            .copied()
            .or(self.default_ceiling)
    }
}

// ============================================================================
// Classifier
// ============================================================================

#[derive(Debug, Clone)]
pub struct ActionClassifier {
    config: ClassifierConfig,
    patterns: Vec<Pattern>,
}

impl ActionClassifier {
    /// Compile the skip patterns. Invalid patterns are logged and ignored.
    pub fn new(config: ClassifierConfig) -> Self {
        let patterns = config
            .skip_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid skip pattern");
                    None
                }
            })
            .collect();
        Self { config, patterns }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn matches_pattern(&self, descriptor: &RemoteFileDescriptor) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let name = descriptor.name();
        self.patterns.iter().any(|p| {
            p.matches_with(name, options) || p.matches_with(&descriptor.path, options)
        })
    }

    /// Decide the action for `descriptor`.
    ///
    /// `convertible` tells whether a registered converter accepts the file.
    pub fn classify(
        &self,
        descriptor: &RemoteFileDescriptor,
        fingerprint: Option<&Fingerprint>,
        convertible: bool,
        now: DateTime<Utc>,
    ) -> Decision {
        let category = FileCategory::from_descriptor(descriptor);
        let decide = |action| Decision { action, category };

        if descriptor.is_dir() {
            return decide(Action::Skip(SkipReason::Directory));
        }
        if self.matches_pattern(descriptor) {
            return decide(Action::Skip(SkipReason::Pattern));
        }
        if self.config.disabled_categories.contains(&category) {
            return decide(Action::Skip(SkipReason::CategoryDisabled));
        }

        if let Some(fp) = fingerprint.filter(|fp| fp.matches(descriptor)) {
            match fp.last_action {
                action if action.is_settled() => {
                    return decide(Action::Skip(SkipReason::Unchanged));
                }
                LastAction::Failed if fp.is_backing_off(now) => {
                    return decide(Action::Skip(SkipReason::BackingOff));
                }
                LastAction::Transcribing => {
                    return decide(Action::Skip(SkipReason::TranscriptionPending));
                }
                _ => {}
            }
        }

        if self
            .config
            .ceiling_for(category)
            .is_some_and(|ceiling| descriptor.size > ceiling)
        {
            return decide(Action::MarkEmptyPlaceholder(PlaceholderReason::SizeCeiling));
        }

        if convertible {
            decide(Action::DownloadAndConvert)
        } else {
            decide(Action::Download)
        }
    }
}

impl Default for ActionClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
