//! # Core Runtime Module
//!
//! Foundational infrastructure shared by the mirror engine crates:
//! - Logging and tracing setup
//! - Application configuration (builder and environment)
//! - Event bus for run progress
//! - The generic retry executor used for downloads and conversions
//!
//! ## Overview
//!
//! Nothing in this crate knows about fingerprints or converters. It fixes the
//! conventions (how errors are classified, how retries back off, how progress
//! is published) that the domain crates build on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod retry;

pub use error::{Error, Result};
