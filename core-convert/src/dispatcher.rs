//! # Conversion Dispatcher
//!
//! Picks the converter for a file and runs it inside a fresh
//! [`ConversionScope`], releasing the scope afterwards whether the
//! conversion succeeded or not.
//!
//! Files no converter accepts fall back to the configured
//! [`GenericPolicy`]: either a stub artifact with the file's metadata, or
//! nothing at all.
//!
//! ## Usage
//!
//! ```ignore
//! let dispatcher = ConversionDispatcher::standard(&config, runner)?
//!     .with_converter(Converter::Video(video));
//!
//! match dispatcher.convert(&descriptor, &local_path).await? {
//!     Dispatched::Converted { artifact, .. } => artifact.write_to(&out).await?,
//!     Dispatched::Generic(stub) => stub.write_to(&out).await?,
//!     Dispatched::Skipped => {}
//! }
//! ```

use crate::artifact::{dotted_extension, title_for, TextArtifact, CONVERTED_BY};
use crate::category::FileCategory;
use crate::config::{ConversionConfig, GenericPolicy};
use crate::converters::{
    ArchiveConverter, Converter, DocumentConverter, MarkupConverter, TabularConverter,
    TextConverter, VideoConverter,
};
use crate::scope::ConversionScope;
use crate::Result;
use bridge_traits::{CommandRunner, RemoteFileDescriptor};
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of dispatching one file
#[derive(Debug)]
pub enum Dispatched {
    /// A converter produced an artifact
    Converted {
        artifact: TextArtifact,
        category: FileCategory,
    },
    /// No converter matched; stub artifact per [`GenericPolicy::CopyWithHeader`]
    Generic(TextArtifact),
    /// No converter matched and the policy is [`GenericPolicy::Skip`]
    Skipped,
}

impl Dispatched {
    pub fn artifact(&self) -> Option<&TextArtifact> {
        match self {
            Dispatched::Converted { artifact, .. } | Dispatched::Generic(artifact) => Some(artifact),
            Dispatched::Skipped => None,
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self, Dispatched::Converted { .. })
    }
}

pub struct ConversionDispatcher {
    converters: Vec<Converter>,
    generic_policy: GenericPolicy,
    scratch_dir: Option<PathBuf>,
}

impl ConversionDispatcher {
    /// Empty dispatcher; every file takes the generic path
    pub fn new(generic_policy: GenericPolicy) -> Self {
        Self {
            converters: Vec::new(),
            generic_policy,
            scratch_dir: None,
        }
    }

    /// Dispatcher with the converters that need only local tools.
    ///
    /// Video needs remote collaborators and is added separately with
    /// [`ConversionDispatcher::with_converter`]. Archives are indexed unless
    /// `config.archives` is `None`.
    pub fn standard(config: &ConversionConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let mut dispatcher = Self::new(config.generic_policy)
            .with_converter(Converter::Tabular(TabularConverter::new(
                runner.clone(),
                config.tools.clone(),
                config.tables.clone(),
            )))
            .with_converter(Converter::Text(TextConverter::new()))
            .with_converter(Converter::Markup(MarkupConverter::new()?))
            .with_converter(Converter::Document(DocumentConverter::new(
                runner.clone(),
                config.tools.clone(),
                config.pdf_max_pages,
            )));
        if let Some(limits) = &config.archives {
            dispatcher = dispatcher.with_converter(Converter::Archive(ArchiveConverter::new(
                runner,
                config.tools.clone(),
                config.tables.clone(),
                config.pdf_max_pages,
                limits.clone(),
            )?));
        }
        Ok(dispatcher)
    }

    /// Register a converter. The first converter accepting a file wins.
    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converters.push(converter);
        self
    }

    /// Create conversion workspaces under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn generic_policy(&self) -> GenericPolicy {
        self.generic_policy
    }

    pub fn select(&self, descriptor: &RemoteFileDescriptor) -> Option<&Converter> {
        self.converters.iter().find(|c| c.can_handle(descriptor))
    }

    pub fn has_converter(&self, descriptor: &RemoteFileDescriptor) -> bool {
        self.select(descriptor).is_some()
    }

    /// The registered video converter, used to resume pending jobs
    pub fn video(&self) -> Option<&VideoConverter> {
        self.converters.iter().find_map(|c| match c {
            Converter::Video(v) => Some(v),
            _ => None,
        })
    }

    /// Convert the local copy of `descriptor`.
    ///
    /// The scope is released before this returns, on success and on error.
    #[instrument(skip(self, descriptor, source), fields(path = %descriptor.path))]
    pub async fn convert(&self, descriptor: &RemoteFileDescriptor, source: &Path) -> Result<Dispatched> {
        let Some(converter) = self.select(descriptor) else {
            return Ok(self.generic(descriptor));
        };

        let mut scope = match &self.scratch_dir {
            Some(dir) => ConversionScope::in_dir(dir)?,
            None => ConversionScope::new()?,
        };
        debug!(
            converter = %converter.category(),
            workspace = %strip_path(&scope.path().to_string_lossy()),
            "Converting"
        );

        let result = converter.convert(descriptor, source, &mut scope).await;
        let report = converter.cleanup(scope).await;
        if !report.is_clean() {
            warn!(
                leaked = report.objects_leaked.len(),
                workspace_removed = report.workspace_removed,
                "Conversion cleanup incomplete"
            );
        }

        result.map(|artifact| Dispatched::Converted {
            artifact,
            category: converter.category(),
        })
    }

    /// Generic fallback per the configured policy
    pub fn generic(&self, descriptor: &RemoteFileDescriptor) -> Dispatched {
        match self.generic_policy {
            GenericPolicy::Skip => Dispatched::Skipped,
            GenericPolicy::CopyWithHeader => {
                let name = descriptor.name();
                Dispatched::Generic(
                    TextArtifact::new(title_for(name))
                        .with_field("source_file", name)
                        .with_field("original_format", dotted_extension(name).as_str())
                        .with_field("category", FileCategory::from_descriptor(descriptor))
                        .with_field("size_bytes", descriptor.size)
                        .with_field("modified_at", descriptor.modified_at.to_rfc3339())
                        .with_field("converted_by", CONVERTED_BY)
                        .with_body("*Content mirrored without conversion*\n"),
                )
            }
        }
    }
}

impl std::fmt::Debug for ConversionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionDispatcher")
            .field("converters", &self.converters)
            .field("generic_policy", &self.generic_policy)
            .finish()
    }
}
