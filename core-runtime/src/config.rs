//! # Application Configuration
//!
//! Process-level settings for the disk mirror: where the remote tree lives,
//! where local copies and text artifacts go, and which credentials the
//! connectors use.
//!
//! ## Overview
//!
//! [`AppConfig`] is built either programmatically through
//! [`AppConfig::builder()`] or from the environment with
//! [`AppConfig::from_env()`], which first loads a `.env` file when present.
//! Both paths end in [`AppConfig::validate()`], so a bad configuration fails
//! before any network or disk work starts.
//!
//! Engine policy (classifier rules, retry policies, disk floors) is not part
//! of this struct; it lives with the crates that enforce it.
//!
//! ## Environment Variables
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `DISK_MIRROR_REMOTE_ROOT` | Remote folder to mirror | `/` |
//! | `DISK_MIRROR_DATA_DIR` | Base directory for local data | `localdata` |
//! | `DISK_MIRROR_MIRROR_DIR` | Raw downloads | `<data>/downloaded_files` |
//! | `DISK_MIRROR_OUTPUT_DIR` | Markdown/text artifacts | `<data>/markdown_files` |
//! | `DISK_MIRROR_DATABASE` | Fingerprint store | `<data>/metadata/sync_metadata.db` |
//! | `DISK_MIRROR_FAILED_REPORT` | Failed-paths report | `<data>/failed_downloads.txt` |
//! | `DISK_MIRROR_LOG_DIR` | Rolling log files | `logs` |
//! | `YANDEX_DISK_TOKEN` (or `Token`) | Disk OAuth token | required |
//! | `YC_S3_KEY_ID` / `YC_S3_SECRET_KEY` | Object storage static key | optional |
//! | `YC_S3_BUCKET` | Staging bucket | optional |
//! | `YC_API_SECRET_KEY` | SpeechKit API key | optional |
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::AppConfig;
//!
//! let config = AppConfig::builder()
//!     .remote_root("/Clients")
//!     .data_dir("localdata")
//!     .disk_token("y0_...")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Credentials for the remote services.
///
/// `Debug` never prints secret values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth token for the disk REST API
    pub disk_token: String,
    /// Object storage static access key id
    pub storage_key_id: Option<String>,
    /// Object storage static secret
    pub storage_secret_key: Option<String>,
    /// Staging bucket for audio uploads
    pub storage_bucket: Option<String>,
    /// Speech recognition API key
    pub transcription_api_key: Option<String>,
}

impl Credentials {
    /// Whether object storage and speech recognition are both configured.
    ///
    /// Video transcription is only possible when this is true.
    pub fn has_transcription(&self) -> bool {
        self.storage_key_id.is_some()
            && self.storage_secret_key.is_some()
            && self.storage_bucket.is_some()
            && self.transcription_api_key.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Credentials")
            .field("disk_token", &"[REDACTED]")
            .field("storage_key_id", &mask(&self.storage_key_id))
            .field("storage_secret_key", &mask(&self.storage_secret_key))
            .field("storage_bucket", &self.storage_bucket)
            .field("transcription_api_key", &mask(&self.transcription_api_key))
            .finish()
    }
}

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Remote folder to mirror (slash-separated, e.g. `/Clients/DPD`)
    pub remote_root: String,
    /// Raw downloads, mirroring the remote tree
    pub mirror_dir: PathBuf,
    /// Converted text artifacts
    pub output_dir: PathBuf,
    /// SQLite fingerprint store
    pub database_path: PathBuf,
    /// Failed-paths report, rewritten after every run
    pub failed_report_path: PathBuf,
    /// Rolling log files; console only when `None`
    pub log_dir: Option<PathBuf>,
    pub credentials: Credentials,
}

impl AppConfig {
    /// Creates a new builder.
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory (or a parent) is loaded first;
    /// variables already set in the environment win.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!("Failed to read .env file: {}", e))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = AppConfig::builder();

        if let Some(root) = get("DISK_MIRROR_REMOTE_ROOT") {
            builder = builder.remote_root(root);
        }
        if let Some(dir) = get("DISK_MIRROR_DATA_DIR") {
            builder = builder.data_dir(dir);
        }
        if let Some(dir) = get("DISK_MIRROR_MIRROR_DIR") {
            builder = builder.mirror_dir(dir);
        }
        if let Some(dir) = get("DISK_MIRROR_OUTPUT_DIR") {
            builder = builder.output_dir(dir);
        }
        if let Some(path) = get("DISK_MIRROR_DATABASE") {
            builder = builder.database_path(path);
        }
        if let Some(path) = get("DISK_MIRROR_FAILED_REPORT") {
            builder = builder.failed_report_path(path);
        }
        builder = builder.log_dir(get("DISK_MIRROR_LOG_DIR").unwrap_or_else(|| "logs".to_string()));

        if let Some(token) = get("YANDEX_DISK_TOKEN").or_else(|| get("Token")) {
            builder = builder.disk_token(token);
        }

        builder = builder.credentials_mut(|c| {
            c.storage_key_id = get("YC_S3_KEY_ID");
            c.storage_secret_key = get("YC_S3_SECRET_KEY");
            c.storage_bucket = get("YC_S3_BUCKET");
            c.transcription_api_key = get("YC_API_SECRET_KEY");
        });

        builder.build()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.remote_root.trim().is_empty() {
            return Err(Error::Config("Remote root cannot be empty".to_string()));
        }

        if self.credentials.disk_token.trim().is_empty() {
            return Err(Error::Config(
                "Disk OAuth token is required. Set YANDEX_DISK_TOKEN or use .disk_token()."
                    .to_string(),
            ));
        }

        for (name, path) in [
            ("Mirror directory", &self.mirror_dir),
            ("Output directory", &self.output_dir),
            ("Database path", &self.database_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
        }

        if self.mirror_dir == self.output_dir {
            return Err(Error::Config(
                "Mirror and output directories must differ".to_string(),
            ));
        }

        let storage = [
            &self.credentials.storage_key_id,
            &self.credentials.storage_secret_key,
            &self.credentials.storage_bucket,
        ];
        let set = storage.iter().filter(|v| v.is_some()).count();
        if set != 0 && set != storage.len() {
            return Err(Error::Config(
                "Object storage needs key id, secret key and bucket together".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`AppConfig`].
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    remote_root: Option<String>,
    data_dir: Option<PathBuf>,
    mirror_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    database_path: Option<PathBuf>,
    failed_report_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    credentials: Credentials,
}

impl AppConfigBuilder {
    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        self.remote_root = Some(root.into());
        self
    }

    /// Base directory from which unset local paths are derived.
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn mirror_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.mirror_dir = Some(path.into());
        self
    }

    pub fn output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn failed_report_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.failed_report_path = Some(path.into());
        self
    }

    pub fn log_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_dir = Some(path.into());
        self
    }

    pub fn disk_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.disk_token = token.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    fn credentials_mut(mut self, f: impl FnOnce(&mut Credentials)) -> Self {
        f(&mut self.credentials);
        self
    }

    /// Fill in defaults and validate.
    pub fn build(self) -> Result<AppConfig> {
        let data_dir = self.data_dir.unwrap_or_else(|| PathBuf::from("localdata"));
        let under = |p: &str| -> PathBuf { Path::new(&data_dir).join(p) };

        let config = AppConfig {
            remote_root: self.remote_root.unwrap_or_else(|| "/".to_string()),
            mirror_dir: self.mirror_dir.unwrap_or_else(|| under("downloaded_files")),
            output_dir: self.output_dir.unwrap_or_else(|| under("markdown_files")),
            database_path: self
                .database_path
                .unwrap_or_else(|| under("metadata/sync_metadata.db")),
            failed_report_path: self
                .failed_report_path
                .unwrap_or_else(|| under("failed_downloads.txt")),
            log_dir: self.log_dir,
            credentials: self.credentials,
        };

        config.validate()?;

        Ok(config)
    }
}
