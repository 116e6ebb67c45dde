//! # Desktop Bridge Implementations
//!
//! Default implementations of host bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `CommandRunner` using `tokio::process`
//! - `DiskSpaceProbe` using `fs2`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{Fs2DiskSpaceProbe, ReqwestHttpClient, TokioCommandRunner};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let runner = Arc::new(TokioCommandRunner::new());
//! let probe = Arc::new(Fs2DiskSpaceProbe::new());
//! ```

mod disk_space;
mod http;
mod process;

pub use disk_space::Fs2DiskSpaceProbe;
pub use http::ReqwestHttpClient;
pub use process::TokioCommandRunner;
