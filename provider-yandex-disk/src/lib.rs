//! # Yandex Provider
//!
//! Yandex implementations of the remote collaborators used by the mirror
//! engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`YandexDiskConnector`]: `RemoteDisk` over the Disk REST API, with a
//!   lazy breadth-first tree walk and link-based streaming downloads
//! - [`YandexObjectStorage`]: `ObjectStorage` over the S3-compatible Object
//!   Storage API, signed with AWS SigV4
//! - [`SpeechKitClient`]: `TranscriptionService` over SpeechKit long-running
//!   recognition and the Operation API
//!
//! All three talk HTTP through a `bridge_traits::HttpClient` and report
//! failures as `BridgeError`, mapping API statuses so that rate limits and
//! 5xx stay retryable.

pub mod connector;
pub mod error;
pub mod object_storage;
pub mod signing;
pub mod speechkit;
pub mod types;

pub use connector::YandexDiskConnector;
pub use error::{Result, YandexError};
pub use object_storage::YandexObjectStorage;
pub use speechkit::SpeechKitClient;
pub use types::RecognitionSpecification;
