//! # File Categories
//!
//! Extension-driven classification of remote files. The category decides
//! which converter applies and which size ceiling is enforced.

use bridge_traits::RemoteFileDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Broad family of file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    /// Spreadsheets and delimited text
    Tabular,
    /// Columnar data files (parquet)
    Columnar,
    /// Office documents and PDFs
    Document,
    /// Plain text and source-like files
    Text,
    /// HTML pages
    Markup,
    /// Video with an audio track to transcribe
    Video,
    Image,
    Archive,
    /// Anything not listed above
    Generic,
}

const TABULAR: &[&str] = &["csv", "tsv", "xlsx", "xls", "xlsm", "xlsb"];
const COLUMNAR: &[&str] = &["parquet"];
const DOCUMENT: &[&str] = &["pdf", "docx", "doc", "pptx", "ppt", "rtf", "odt"];
const TEXT: &[&str] = &[
    "txt", "md", "py", "json", "xml", "avsc", "j2", "yaml", "yml", "log", "sql", "ini", "toml",
];
const MARKUP: &[&str] = &["html", "htm"];
const VIDEO: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v", "mpg", "mpeg", "3gp", "ogv", "vob",
    "ts",
];
const IMAGE: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "heic", "svg",
];
const ARCHIVE: &[&str] = &["zip", "7z", "rar", "tar", "gz", "tgz"];

impl FileCategory {
    pub const ALL: [FileCategory; 9] = [
        FileCategory::Tabular,
        FileCategory::Columnar,
        FileCategory::Document,
        FileCategory::Text,
        FileCategory::Markup,
        FileCategory::Video,
        FileCategory::Image,
        FileCategory::Archive,
        FileCategory::Generic,
    ];

    /// Category for a lowercase extension without the leading dot
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if TABULAR.contains(&ext) {
            FileCategory::Tabular
        } else if COLUMNAR.contains(&ext) {
            FileCategory::Columnar
        } else if DOCUMENT.contains(&ext) {
            FileCategory::Document
        } else if TEXT.contains(&ext) {
            FileCategory::Text
        } else if MARKUP.contains(&ext) {
            FileCategory::Markup
        } else if VIDEO.contains(&ext) {
            FileCategory::Video
        } else if IMAGE.contains(&ext) {
            FileCategory::Image
        } else if ARCHIVE.contains(&ext) {
            FileCategory::Archive
        } else {
            FileCategory::Generic
        }
    }

    pub fn from_descriptor(descriptor: &RemoteFileDescriptor) -> Self {
        descriptor
            .extension()
            .map(|ext| Self::from_extension(&ext))
            .unwrap_or(FileCategory::Generic)
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(FileCategory::Generic)
    }

    /// Whether a text converter exists for this family
    pub fn has_converter(&self) -> bool {
        matches!(
            self,
            FileCategory::Tabular
                | FileCategory::Document
                | FileCategory::Text
                | FileCategory::Markup
                | FileCategory::Video
                | FileCategory::Archive
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Tabular => "tabular",
            FileCategory::Columnar => "columnar",
            FileCategory::Document => "document",
            FileCategory::Text => "text",
            FileCategory::Markup => "markup",
            FileCategory::Video => "video",
            FileCategory::Image => "image",
            FileCategory::Archive => "archive",
            FileCategory::Generic => "generic",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tabular" => Ok(FileCategory::Tabular),
            "columnar" => Ok(FileCategory::Columnar),
            "document" => Ok(FileCategory::Document),
            "text" => Ok(FileCategory::Text),
            "markup" => Ok(FileCategory::Markup),
            "video" => Ok(FileCategory::Video),
            "image" => Ok(FileCategory::Image),
            "archive" => Ok(FileCategory::Archive),
            "generic" => Ok(FileCategory::Generic),
            _ => Err(format!("Unknown file category: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_extension_table() {
        assert_eq!(FileCategory::from_extension("csv"), FileCategory::Tabular);
        assert_eq!(FileCategory::from_extension("XLSX"), FileCategory::Tabular);
        assert_eq!(FileCategory::from_extension("parquet"), FileCategory::Columnar);
        assert_eq!(FileCategory::from_extension("pdf"), FileCategory::Document);
        assert_eq!(FileCategory::from_extension("avsc"), FileCategory::Text);
        assert_eq!(FileCategory::from_extension("htm"), FileCategory::Markup);
        assert_eq!(FileCategory::from_extension("mp4"), FileCategory::Video);
        assert_eq!(FileCategory::from_extension("heic"), FileCategory::Image);
        assert_eq!(FileCategory::from_extension("tgz"), FileCategory::Archive);
        assert_eq!(FileCategory::from_extension("tmp"), FileCategory::Generic);
    }

    #[test]
    fn test_descriptor_without_extension_is_generic() {
        let d = RemoteFileDescriptor::file("/Docs/README", 10, Utc::now());
        assert_eq!(FileCategory::from_descriptor(&d), FileCategory::Generic);

        let d = RemoteFileDescriptor::file("/Video/Intro.MOV", 10, Utc::now());
        assert_eq!(FileCategory::from_descriptor(&d), FileCategory::Video);
    }

    #[test]
    fn test_converter_availability() {
        let convertible: Vec<_> = FileCategory::ALL
            .iter()
            .filter(|c| c.has_converter())
            .collect();
        assert_eq!(convertible.len(), 6);
        assert!(FileCategory::Archive.has_converter());
        assert!(!FileCategory::Columnar.has_converter());
        assert!(!FileCategory::Generic.has_converter());
    }

    #[test]
    fn test_string_round_trip() {
        for category in FileCategory::ALL {
            assert_eq!(category.as_str().parse::<FileCategory>(), Ok(category));
        }
        assert!("spreadsheet".parse::<FileCategory>().is_err());
    }
}
