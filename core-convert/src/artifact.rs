//! # Text Artifacts
//!
//! The output of every converter: a YAML-style front-matter block, a
//! Markdown heading and a body.
//!
//! ```text
//! ---
//! source_file: report.csv
//! original_format: .csv
//! converted_by: disk-mirror
//! ---
//!
//! # report
//!
//! | a | b |
//! |---|---|
//! ```

use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Value written to the `converted_by` front-matter key
pub const CONVERTED_BY: &str = "disk-mirror";

/// Rendered text surrogate of a remote file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextArtifact {
    pub title: String,
    pub front_matter: Vec<(String, String)>,
    pub body: String,
}

impl TextArtifact {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            front_matter: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a front-matter entry. Keys keep insertion order.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.front_matter.push((key.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.front_matter
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 256);
        if !self.front_matter.is_empty() {
            out.push_str("---\n");
            for (key, value) in &self.front_matter {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(&single_line(value));
                out.push('\n');
            }
            out.push_str("---\n\n");
        }
        out.push_str("# ");
        out.push_str(&single_line(&self.title));
        out.push_str("\n\n");
        out.push_str(self.body.trim_end());
        out.push('\n');
        out
    }

    /// Write the rendered artifact to `path`.
    ///
    /// The content goes to a `.part` sibling first and is renamed into place,
    /// so an interrupted write never leaves a truncated artifact behind.
    pub async fn write_to(&self, path: &Path) -> std::io::Result<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rendered = self.render();
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = std::path::PathBuf::from(partial);

        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(rendered.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial, path).await?;
        Ok(rendered.len() as u64)
    }
}

/// File stem used as the artifact title (`report.final.csv` → `report.final`)
pub fn title_for(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[..idx].to_string(),
        _ => file_name.to_string(),
    }
}

/// Extension with its leading dot, as written in `original_format`
pub fn dotted_extension(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < file_name.len() => {
            file_name[idx..].to_ascii_lowercase()
        }
        _ => String::new(),
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
