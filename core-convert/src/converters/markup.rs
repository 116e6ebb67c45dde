//! HTML to text.
//!
//! A regex pass is enough for the pages found on a shared disk: drop
//! scripts, styles and comments, turn block-level closers into line breaks,
//! strip the remaining tags and decode the common entities.

use super::encoding::decode_text;
use crate::artifact::{dotted_extension, title_for, TextArtifact, CONVERTED_BY};
use crate::{ConversionError, Result};
use bridge_traits::RemoteFileDescriptor;
use regex::Regex;
use std::path::Path;

pub struct MarkupConverter {
    hidden: Regex,
    title: Regex,
    block_break: Regex,
    tag: Regex,
    numeric_entity: Regex,
}

impl MarkupConverter {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ConversionError::Setup(e.to_string()))
        };
        Ok(Self {
            hidden: compile(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")?,
            title: compile(r"(?is)<title\b[^>]*>(.*?)</title\s*>")?,
            block_break: compile(
                r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|table|section|article|header|footer|blockquote|pre)\s*>",
            )?,
            tag: compile(r"(?s)<[^>]*>")?,
            numeric_entity: compile(r"&#(x[0-9a-fA-F]+|[0-9]+);")?,
        })
    }

    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
    ) -> Result<TextArtifact> {
        let bytes = tokio::fs::read(source).await?;
        let html = decode_text(&bytes).text;
        let name = descriptor.name();

        let page_title = self
            .title
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| self.decode_entities(m.as_str().trim()))
            .filter(|t| !t.is_empty());
        let text = self.extract_text(&html);

        let mut artifact = TextArtifact::new(page_title.clone().unwrap_or_else(|| title_for(name)))
            .with_field("source_file", name)
            .with_field("original_format", dotted_extension(name).as_str())
            .with_field("method", "tag-strip");
        if let Some(page_title) = page_title {
            artifact = artifact.with_field("page_title", page_title);
        }
        Ok(artifact
            .with_field("converted_by", CONVERTED_BY)
            .with_body(format!("## Extracted text\n\n{}\n", text)))
    }

    pub fn extract_text(&self, html: &str) -> String {
        let without_hidden = self.hidden.replace_all(html, "");
        let without_title = self.title.replace_all(&without_hidden, "");
        let with_breaks = self.block_break.replace_all(&without_title, "\n");
        let stripped = self.tag.replace_all(&with_breaks, " ");
        let decoded = self.decode_entities(&stripped);

        let mut lines: Vec<String> = Vec::new();
        for line in decoded.lines() {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                lines.push(collapsed);
            }
        }
        lines.join("\n")
    }

    fn decode_entities(&self, text: &str) -> String {
        let numeric = self.numeric_entity.replace_all(text, |caps: &regex::Captures| {
            let raw = &caps[1];
            let code = match raw.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => raw.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        });
        numeric
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&mdash;", "\u{2014}")
            .replace("&ndash;", "\u{2013}")
            .replace("&laquo;", "\u{00AB}")
            .replace("&raquo;", "\u{00BB}")
            .replace("&amp;", "&")
    }
}
