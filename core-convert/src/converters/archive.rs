//! Archives: a contents index plus the text of the files inside.
//!
//! `zip`, `tar`, `tar.gz`/`tgz` and single-file `gz` are unpacked in
//! process on the blocking pool; `7z` and `rar` go through the external
//! 7-Zip tool. Everything lands in the conversion workspace, so the scope
//! release removes it.
//!
//! Entries whose category has a local converter (text, markup, tables,
//! documents) are converted and embedded under their own heading, with
//! headings demoted and the text clipped per entry. Nested archives are
//! opened recursively down to [`ArchiveLimits::max_depth`]; an archive whose
//! content matches one of its enclosing archives is listed but not opened.
//!
//! [`ArchiveLimits::max_unpacked_bytes`] bounds the bytes written for one
//! top-level archive across all nesting levels. In-process formats stop
//! writing at the bound; 7-Zip output is trimmed after extraction.

use super::run_tool;
use super::{DocumentConverter, MarkupConverter, TabularConverter, TextConverter};
use crate::artifact::{dotted_extension, title_for, TextArtifact, CONVERTED_BY};
use crate::category::FileCategory;
use crate::config::{ArchiveLimits, TableLimits, ToolPaths};
use crate::scope::ConversionScope;
use crate::{ConversionError, Result};
use bridge_traits::{CommandRunner, RemoteFileDescriptor};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Container formats the converter can open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    Gzip,
    SevenZip,
    Rar,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return Some(ArchiveKind::TarGz);
        }
        match lower.rsplit_once('.').map(|(_, ext)| ext) {
            Some("zip") => Some(ArchiveKind::Zip),
            Some("tar") => Some(ArchiveKind::Tar),
            Some("gz") => Some(ArchiveKind::Gzip),
            Some("7z") => Some(ArchiveKind::SevenZip),
            Some("rar") => Some(ArchiveKind::Rar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::Gzip => "gzip",
            ArchiveKind::SevenZip => "7z",
            ArchiveKind::Rar => "rar",
        }
    }

    fn is_external(&self) -> bool {
        matches!(self, ArchiveKind::SevenZip | ArchiveKind::Rar)
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file unpacked from an archive
#[derive(Debug, Clone)]
struct Member {
    /// Path inside the archive, `/`-separated
    path: String,
    local: PathBuf,
    size: u64,
}

#[derive(Debug, Default)]
struct Unpacked {
    members: Vec<Member>,
    /// Entries left packed: unsafe paths or over the byte bound
    skipped: Vec<String>,
    bytes: u64,
}

/// State shared across one top-level archive and everything nested in it
#[derive(Debug, Default)]
struct Walk {
    depth: u32,
    deepest: u32,
    ancestors: HashSet<String>,
    unpacked: u64,
    nested: usize,
    next_dir: usize,
}

struct Index {
    body: String,
    entries: usize,
}

pub struct ArchiveConverter {
    runner: Arc<dyn CommandRunner>,
    sevenzip: String,
    limits: ArchiveLimits,
    text: TextConverter,
    markup: MarkupConverter,
    tabular: TabularConverter,
    document: DocumentConverter,
}

impl ArchiveConverter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tools: ToolPaths,
        tables: TableLimits,
        pdf_max_pages: u32,
        limits: ArchiveLimits,
    ) -> Result<Self> {
        Ok(Self {
            sevenzip: tools.sevenzip.clone(),
            text: TextConverter::new(),
            markup: MarkupConverter::new()?,
            tabular: TabularConverter::new(runner.clone(), tools.clone(), tables),
            document: DocumentConverter::new(runner.clone(), tools, pdf_max_pages),
            runner,
            limits,
        })
    }

    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
        scope: &mut ConversionScope,
    ) -> Result<TextArtifact> {
        let name = descriptor.name();
        let kind = ArchiveKind::from_name(name)
            .ok_or_else(|| ConversionError::Unsupported(name.to_string()))?;

        let mut walk = Walk::default();
        walk.ancestors.insert(digest_file(source).await?);
        let index = self
            .index(kind, source, descriptor.modified_at, scope, &mut walk)
            .await?;
        debug!(
            entries = index.entries,
            nested = walk.nested,
            unpacked_bytes = walk.unpacked,
            "Archive indexed"
        );

        Ok(TextArtifact::new(title_for(name))
            .with_field("source_file", name)
            .with_field("original_format", dotted_extension(name).as_str())
            .with_field("archive_type", kind)
            .with_field("entries", index.entries)
            .with_field("nested_archives", walk.nested)
            .with_field("extraction_depth", walk.deepest)
            .with_field("unpacked_bytes", walk.unpacked)
            .with_field("size_bytes", descriptor.size)
            .with_field("converted_by", CONVERTED_BY)
            .with_body(index.body))
    }

    /// Unpack `source` and render its index. Boxed because nested archives
    /// recurse through [`Self::section`].
    fn index<'a>(
        &'a self,
        kind: ArchiveKind,
        source: &'a Path,
        modified_at: DateTime<Utc>,
        scope: &'a mut ConversionScope,
        walk: &'a mut Walk,
    ) -> Pin<Box<dyn Future<Output = Result<Index>> + Send + 'a>> {
        Box::pin(async move {
            let dest = scope.file(&format!("unpack-{}", walk.next_dir));
            walk.next_dir += 1;
            let budget = self.limits.max_unpacked_bytes.saturating_sub(walk.unpacked);
            let unpacked = self.unpack(kind, source, &dest, budget).await?;
            walk.unpacked += unpacked.bytes;

            let shown = unpacked.members.len().min(self.limits.max_entries);
            let mut body = String::from("## Contents\n\n");
            if unpacked.members.is_empty() && unpacked.skipped.is_empty() {
                body.push_str("*Archive is empty*\n");
            } else if !unpacked.members.is_empty() {
                body.push_str("| Path | Size | Type |\n|---|---|---|\n");
                for member in &unpacked.members[..shown] {
                    body.push_str(&format!(
                        "| {} | {} | {} |\n",
                        escape_cell(&member.path),
                        format_size(member.size),
                        entry_type(&member.path)
                    ));
                }
                if unpacked.members.len() > shown {
                    body.push_str(&format!(
                        "\n*{} more entries not listed*\n",
                        unpacked.members.len() - shown
                    ));
                }
            }
            if !unpacked.skipped.is_empty() {
                body.push_str(&format!("\n**Not unpacked** ({}):\n\n", unpacked.skipped.len()));
                for path in unpacked.skipped.iter().take(self.limits.max_entries) {
                    body.push_str(&format!("- `{}`\n", path));
                }
            }

            let mut sections = Vec::new();
            for member in &unpacked.members[..shown] {
                if let Some(section) = self
                    .section(member, modified_at, &mut *scope, &mut *walk)
                    .await
                {
                    sections.push(format!("### {}\n\n{}", member.path, section.trim_end()));
                }
            }
            if !sections.is_empty() {
                body.push_str("\n## Extracted text\n\n");
                body.push_str(&sections.join("\n\n"));
                body.push('\n');
            }

            Ok(Index {
                body,
                entries: unpacked.members.len() + unpacked.skipped.len(),
            })
        })
    }

    /// Rendered text of one member, `None` when it is only listed
    async fn section(
        &self,
        member: &Member,
        modified_at: DateTime<Utc>,
        scope: &mut ConversionScope,
        walk: &mut Walk,
    ) -> Option<String> {
        if let Some(kind) = ArchiveKind::from_name(&member.path) {
            return Some(self.nested(kind, member, modified_at, scope, walk).await);
        }

        let descriptor = RemoteFileDescriptor::file(member.path.clone(), member.size, modified_at);
        let converted = match FileCategory::from_path(&member.local) {
            FileCategory::Text => self.text.convert(&descriptor, &member.local).await,
            FileCategory::Markup => self.markup.convert(&descriptor, &member.local).await,
            FileCategory::Tabular => {
                self.tabular
                    .convert(&descriptor, &member.local, scope)
                    .await
            }
            FileCategory::Document => {
                self.document
                    .convert(&descriptor, &member.local, scope)
                    .await
            }
            _ => return None,
        };
        Some(match converted {
            Ok(artifact) => embed(&artifact.body, self.limits.max_text_chars),
            Err(e) => {
                debug!(entry = %member.path, error = %e, "Archive entry not converted");
                format!("*Extraction failed: {}*\n", e)
            }
        })
    }

    async fn nested(
        &self,
        kind: ArchiveKind,
        member: &Member,
        modified_at: DateTime<Utc>,
        scope: &mut ConversionScope,
        walk: &mut Walk,
    ) -> String {
        if walk.depth >= self.limits.max_depth {
            return format!(
                "*Not opened: nesting limit of {} reached*\n",
                self.limits.max_depth
            );
        }
        let digest = match digest_file(&member.local).await {
            Ok(digest) => digest,
            Err(e) => return format!("*Could not open: {}*\n", e),
        };
        if walk.ancestors.contains(&digest) {
            warn!(entry = %member.path, "Archive contains a copy of an enclosing archive");
            return "*Not opened: same content as an enclosing archive*\n".to_string();
        }

        walk.ancestors.insert(digest.clone());
        walk.depth += 1;
        walk.deepest = walk.deepest.max(walk.depth);
        walk.nested += 1;
        let result = self
            .index(kind, &member.local, modified_at, scope, walk)
            .await;
        walk.depth -= 1;
        walk.ancestors.remove(&digest);

        match result {
            Ok(inner) => embed(&inner.body, usize::MAX),
            Err(e) => format!("*Could not open: {}*\n", e),
        }
    }

    async fn unpack(
        &self,
        kind: ArchiveKind,
        source: &Path,
        dest: &Path,
        budget: u64,
    ) -> Result<Unpacked> {
        tokio::fs::create_dir_all(dest).await?;

        if kind.is_external() {
            let args = vec![
                "x".to_string(),
                "-y".to_string(),
                format!("-o{}", dest.display()),
                source.display().to_string(),
            ];
            run_tool(self.runner.as_ref(), &self.sevenzip, &args).await?;
            let dest = dest.to_path_buf();
            return blocking(move || trim_to_budget(collect_files(&dest)?, budget)).await;
        }

        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        blocking(move || {
            let file = std::fs::File::open(&source)?;
            match kind {
                ArchiveKind::Zip => unpack_zip(file, &dest, budget),
                ArchiveKind::Tar => unpack_tar(file, &dest, budget),
                ArchiveKind::TarGz => unpack_tar(flate2::read::GzDecoder::new(file), &dest, budget),
                ArchiveKind::Gzip => unpack_gzip(file, &source, &dest, budget),
                ArchiveKind::SevenZip | ArchiveKind::Rar => {
                    Err(ConversionError::Unsupported(kind.to_string()))
                }
            }
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConversionError::Io(io::Error::other(e)))?
}

async fn digest_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
}

fn malformed(e: impl fmt::Display) -> ConversionError {
    ConversionError::Malformed(format!("unreadable archive: {}", e))
}

fn unpack_zip(file: std::fs::File, dest: &Path, budget: u64) -> Result<Unpacked> {
    let mut archive = zip::ZipArchive::new(file).map_err(malformed)?;
    let mut out = Unpacked::default();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(malformed)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name() else {
            out.skipped.push(name);
            continue;
        };
        let remaining = budget.saturating_sub(out.bytes);
        if entry.size() > remaining {
            out.skipped.push(name);
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = std::fs::File::create(&target)?;
        let written = io::copy(&mut (&mut entry).take(remaining), &mut writer).map_err(malformed)?;
        out.bytes += written;
        out.members.push(Member {
            path: slash_path(&relative),
            local: target,
            size: written,
        });
    }
    Ok(out)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path, budget: u64) -> Result<Unpacked> {
    let mut archive = tar::Archive::new(reader);
    let mut out = Unpacked::default();

    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let relative = entry.path().map_err(malformed)?.into_owned();
        let name = slash_path(&relative);
        let size = entry.size();
        if size > budget.saturating_sub(out.bytes) {
            out.skipped.push(name);
            continue;
        }
        // `unpack_in` refuses paths escaping `dest`
        if !entry.unpack_in(dest).map_err(malformed)? {
            out.skipped.push(name);
            continue;
        }
        out.bytes += size;
        out.members.push(Member {
            path: name,
            local: dest.join(&relative),
            size,
        });
    }
    Ok(out)
}

fn unpack_gzip(file: std::fs::File, source: &Path, dest: &Path, budget: u64) -> Result<Unpacked> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("content.gz");
    let inner = match name.len().checked_sub(3) {
        Some(end) if name.to_ascii_lowercase().ends_with(".gz") && end > 0 => &name[..end],
        _ => "content",
    };

    let target = dest.join(inner);
    let mut writer = std::fs::File::create(&target)?;
    let mut decoder = flate2::read::GzDecoder::new(file).take(budget);
    let written = io::copy(&mut decoder, &mut writer).map_err(malformed)?;
    Ok(Unpacked {
        members: vec![Member {
            path: inner.to_string(),
            local: target,
            size: written,
        }],
        skipped: Vec::new(),
        bytes: written,
    })
}

/// Regular files under `root`, sorted by archive path. Symlinks are ignored.
fn collect_files(root: &Path) -> Result<Vec<Member>> {
    let mut members = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = slash_path(path.strip_prefix(root).unwrap_or(path.as_path()));
                members.push(Member {
                    path: relative,
                    size: entry.metadata()?.len(),
                    local: path,
                });
            }
        }
    }
    members.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(members)
}

/// Keep members while they fit the byte bound; delete the rest
fn trim_to_budget(members: Vec<Member>, budget: u64) -> Result<Unpacked> {
    let mut out = Unpacked::default();
    for member in members {
        if member.size > budget.saturating_sub(out.bytes) {
            std::fs::remove_file(&member.local)?;
            out.skipped.push(member.path);
        } else {
            out.bytes += member.size;
            out.members.push(member);
        }
    }
    Ok(out)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_type(path: &str) -> String {
    if ArchiveKind::from_name(path).is_some() {
        return "archive".to_string();
    }
    FileCategory::from_path(Path::new(path)).to_string()
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Demote headings by two levels and clip to `max_chars`, closing a code
/// fence left open by the cut.
fn embed(body: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(body.len().min(max_chars) + 32);
    let mut fence: Option<String> = None;
    let mut used = 0usize;

    for line in body.lines() {
        let cost = line.chars().count() + 1;
        if used.saturating_add(cost) > max_chars {
            if let Some(open) = &fence {
                out.push_str(open);
                out.push('\n');
            }
            out.push_str("\n*Text truncated*\n");
            return out;
        }
        used += cost;

        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            let ticks: String = trimmed.chars().take_while(|c| *c == '`').collect();
            match &fence {
                None => fence = Some(ticks),
                Some(open) if ticks.len() >= open.len() && trimmed.trim_end() == ticks => {
                    fence = None
                }
                Some(_) => {}
            }
        } else if fence.is_none() && line.starts_with('#') {
            out.push_str("##");
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}
