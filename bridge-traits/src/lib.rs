//! # Bridge Traits
//!
//! Collaborator contracts consumed by the mirror engine.
//!
//! ## Overview
//!
//! The engine never talks to a vendor API, a subprocess or the filesystem's
//! volume statistics directly. Each of those capabilities is a trait here,
//! implemented by `bridge-desktop` (process, HTTP, disk space) and by the
//! provider crates (remote disk, object storage, transcription).
//!
//! ## Traits
//!
//! ### Remote content
//! - [`RemoteDisk`](remote::RemoteDisk) - Lazy tree listing and streaming download
//! - [`ObjectStorage`](transcription::ObjectStorage) - Staging bucket for audio uploads
//! - [`TranscriptionService`](transcription::TranscriptionService) - Async speech recognition jobs
//!
//! ### Local host
//! - [`HttpClient`](http::HttpClient) - Single-attempt HTTP with streaming bodies
//! - [`CommandRunner`](process::CommandRunner) - External conversion tools
//! - [`DiskSpaceProbe`](storage::DiskSpaceProbe) - Free space on the target volume
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All traits report failures as [`BridgeError`](error::BridgeError). The
//! variants carry enough information for callers to decide whether a retry
//! can help; see [`BridgeError::is_transient`].
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so implementations can be shared through
//! `Arc` across concurrent file pipelines.
//!
//! ## Examples
//!
//! ### Implementing CommandRunner
//!
//! ```ignore
//! use bridge_traits::process::{CommandOutput, CommandRunner};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct EchoRunner;
//!
//! #[async_trait]
//! impl CommandRunner for EchoRunner {
//!     async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
//!         Ok(CommandOutput::success(format!("{} {}", program, args.join(" "))))
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod process;
pub mod remote;
pub mod storage;
pub mod time;
pub mod transcription;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use process::{CommandOutput, CommandRunner};
pub use remote::{RemoteDisk, RemoteEntryKind, RemoteFileDescriptor};
pub use storage::DiskSpaceProbe;
pub use time::{Clock, FixedClock, SystemClock};
pub use transcription::{ObjectStorage, TranscriptionService, TranscriptionStatus};
