//! # Core Convert
//!
//! Turns mirrored files into Markdown/text surrogates.
//!
//! ## Overview
//!
//! - [`FileCategory`]: extension-driven classification of remote files
//! - [`ConversionDispatcher`]: picks a [`Converter`] and always releases its
//!   [`ConversionScope`]
//! - [`converters`]: tabular, text, markup, document, archive and video
//!   converters
//! - [`transcription`]: the video transcription state machine and its
//!   durable job markers
//!
//! Converters never touch the fingerprint store. Video jobs report their
//! progress through a [`TranscriptionLedger`] implemented by the caller.

pub mod artifact;
pub mod category;
pub mod config;
pub mod converters;
pub mod dispatcher;
pub mod error;
pub mod scope;
pub mod transcription;

pub use artifact::TextArtifact;
pub use category::FileCategory;
pub use config::{
    ArchiveLimits, ConversionConfig, GenericPolicy, TableLimits, ToolPaths, VideoConfig,
};
pub use converters::{
    ArchiveConverter, ArchiveKind, Converter, DocumentConverter, MarkupConverter,
    TabularConverter, TextConverter, VideoConverter,
};
pub use dispatcher::{ConversionDispatcher, Dispatched};
pub use error::{ConversionError, Result};
pub use scope::{CleanupReport, ConversionScope};
pub use transcription::{
    ConversionJob, PendingTranscription, TranscriptionLedger, TranscriptionState,
};
