//! Plain-text and source-like files.
//!
//! Prose (`txt`, `md`, `log`) is copied under the header as is; everything
//! else is wrapped in a fenced code block tagged with its language.

use super::encoding::decode_text;
use crate::artifact::{dotted_extension, title_for, TextArtifact, CONVERTED_BY};
use crate::Result;
use bridge_traits::RemoteFileDescriptor;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct TextConverter;

impl TextConverter {
    pub fn new() -> Self {
        Self
    }

    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
    ) -> Result<TextArtifact> {
        let bytes = tokio::fs::read(source).await?;
        let decoded = decode_text(&bytes);
        let ext = descriptor.extension().unwrap_or_default();
        let language = language_for(&ext);
        let name = descriptor.name();

        let content = decoded.text.trim_end();
        let body = match language {
            None => format!("## Content\n\n{}\n", content),
            Some(lang) => {
                let fence = fence_for(content);
                format!("## Content\n\n{fence}{lang}\n{content}\n{fence}\n")
            }
        };

        Ok(TextArtifact::new(title_for(name))
            .with_field("source_file", name)
            .with_field("original_format", dotted_extension(name).as_str())
            .with_field("language", language.unwrap_or("text"))
            .with_field("encoding", decoded.encoding)
            .with_field("size_bytes", bytes.len())
            .with_field("converted_by", CONVERTED_BY)
            .with_body(body))
    }
}

/// Fence language for an extension, `None` for prose
pub fn language_for(ext: &str) -> Option<&'static str> {
    match ext {
        "txt" | "md" | "log" => None,
        "py" => Some("python"),
        "json" | "avsc" => Some("json"),
        "xml" => Some("xml"),
        "j2" => Some("jinja2"),
        "yaml" | "yml" => Some("yaml"),
        "sql" => Some("sql"),
        "ini" => Some("ini"),
        "toml" => Some("toml"),
        _ => Some("text"),
    }
}

/// A backtick fence longer than any run inside `content`
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn convert(name: &str, content: &[u8]) -> TextArtifact {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let descriptor = RemoteFileDescriptor::file(format!("/docs/{}", name), 1, Utc::now());
        TextConverter::new().convert(&descriptor, &path).await.unwrap()
    }

    #[tokio::test]
    async fn test_code_is_fenced_with_language() {
        let artifact = convert("schema.avsc", b"{\"type\": \"record\"}\n").await;
        assert_eq!(artifact.field("language"), Some("json"));
        assert!(artifact
            .body
            .contains("```json\n{\"type\": \"record\"}\n```"));
        assert_eq!(artifact.title, "schema");
    }

    #[tokio::test]
    async fn test_prose_is_copied() {
        let artifact = convert("notes.md", b"# Heading\n\nSome text.\n").await;
        assert_eq!(artifact.body, "## Content\n\n# Heading\n\nSome text.\n");
        assert_eq!(artifact.field("original_format"), Some(".md"));
    }

    #[test]
    fn test_fence_outgrows_embedded_backticks() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("a ```` b"), "`````");
    }

    #[test]
    fn test_language_table() {
        assert_eq!(language_for("py"), Some("python"));
        assert_eq!(language_for("j2"), Some("jinja2"));
        assert_eq!(language_for("txt"), None);
    }
}
