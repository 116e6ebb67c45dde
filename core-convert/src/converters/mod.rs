//! # Converters
//!
//! The closed set of converters, one variant per convertible category.
//! Each exposes the same three phases:
//!
//! - [`Converter::can_handle`]: does this descriptor belong to me?
//! - [`Converter::convert`]: local source file → [`TextArtifact`]
//! - [`Converter::cleanup`]: release the [`ConversionScope`]; always called
//!
//! Adding a category means adding a variant here and a module next to it.

pub mod archive;
pub mod document;
pub mod encoding;
pub mod markup;
pub mod tabular;
pub mod text;
pub mod video;

pub use archive::{ArchiveConverter, ArchiveKind};
pub use document::DocumentConverter;
pub use markup::MarkupConverter;
pub use tabular::TabularConverter;
pub use text::TextConverter;
pub use video::VideoConverter;

use crate::artifact::TextArtifact;
use crate::category::FileCategory;
use crate::scope::{CleanupReport, ConversionScope};
use crate::{ConversionError, Result};
use bridge_traits::{BridgeError, CommandOutput, CommandRunner, RemoteFileDescriptor};
use std::path::Path;
use tracing::debug;

pub enum Converter {
    Tabular(TabularConverter),
    Text(TextConverter),
    Markup(MarkupConverter),
    Document(DocumentConverter),
    Video(VideoConverter),
    Archive(ArchiveConverter),
}

impl Converter {
    pub fn category(&self) -> FileCategory {
        match self {
            Converter::Tabular(_) => FileCategory::Tabular,
            Converter::Text(_) => FileCategory::Text,
            Converter::Markup(_) => FileCategory::Markup,
            Converter::Document(_) => FileCategory::Document,
            Converter::Video(_) => FileCategory::Video,
            Converter::Archive(_) => FileCategory::Archive,
        }
    }

    pub fn can_handle(&self, descriptor: &RemoteFileDescriptor) -> bool {
        !descriptor.is_dir() && FileCategory::from_descriptor(descriptor) == self.category()
    }

    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
        scope: &mut ConversionScope,
    ) -> Result<TextArtifact> {
        match self {
            Converter::Tabular(c) => c.convert(descriptor, source, scope).await,
            Converter::Text(c) => c.convert(descriptor, source).await,
            Converter::Markup(c) => c.convert(descriptor, source).await,
            Converter::Document(c) => c.convert(descriptor, source, scope).await,
            Converter::Video(c) => c.convert(descriptor, source, scope).await,
            Converter::Archive(c) => c.convert(descriptor, source, scope).await,
        }
    }

    pub async fn cleanup(&self, scope: ConversionScope) -> CleanupReport {
        match self {
            Converter::Video(c) => c.cleanup(scope).await,
            _ => scope.release().await,
        }
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Converter::{}", self.category())
    }
}

/// Run an external tool and insist on a zero exit status.
///
/// A missing executable is an [`ConversionError::ExternalTool`]; a non-zero
/// exit means the tool rejected the input and is reported as malformed.
pub(crate) async fn run_tool(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput> {
    debug!(tool = program, "Running external tool");
    let output = runner.run(program, args).await.map_err(|e| match e {
        BridgeError::NotAvailable(msg) => ConversionError::external_tool(program, msg),
        other => ConversionError::Bridge(other),
    })?;

    if !output.is_success() {
        let code = output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(ConversionError::Malformed(format!(
            "{} exited with {}: {}",
            program,
            code,
            output.stderr_tail()
        )));
    }
    Ok(output)
}
