//! Office documents and PDFs through external extractors.
//!
//! PDFs go through `pdftotext -layout`, everything else through
//! `pandoc -t gfm`. Both write to stdout.
//!
//! Pandoc cannot read the legacy binary formats (`doc`, `ppt`). Those are
//! first re-saved as `docx`/`pptx` by headless LibreOffice into the
//! conversion workspace, and pandoc reads the re-saved copy.

use super::run_tool;
use crate::artifact::{dotted_extension, title_for, TextArtifact, CONVERTED_BY};
use crate::config::ToolPaths;
use crate::scope::ConversionScope;
use crate::{ConversionError, Result};
use bridge_traits::{CommandRunner, RemoteFileDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Modern format LibreOffice re-saves a legacy one as
pub fn legacy_target(ext: &str) -> Option<&'static str> {
    match ext {
        "doc" => Some("docx"),
        "ppt" => Some("pptx"),
        _ => None,
    }
}

pub struct DocumentConverter {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
    pdf_max_pages: u32,
}

impl DocumentConverter {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths, pdf_max_pages: u32) -> Self {
        Self {
            runner,
            tools,
            pdf_max_pages,
        }
    }

    /// Program and arguments used for a given extension
    pub fn command_for(&self, ext: &str, source: &Path) -> (String, Vec<String>) {
        let source = source.display().to_string();
        if ext == "pdf" {
            (
                self.tools.pdftotext.clone(),
                vec![
                    "-layout".to_string(),
                    "-enc".to_string(),
                    "UTF-8".to_string(),
                    "-l".to_string(),
                    self.pdf_max_pages.to_string(),
                    source,
                    "-".to_string(),
                ],
            )
        } else {
            (
                self.tools.pandoc.clone(),
                vec![
                    source,
                    "-t".to_string(),
                    "gfm".to_string(),
                    "--wrap=none".to_string(),
                ],
            )
        }
    }

    /// LibreOffice invocation re-saving `source` as `target` into `out_dir`.
    ///
    /// Each call gets its own profile directory so concurrent conversions
    /// do not fight over the user installation lock.
    pub fn resave_command(&self, target: &str, source: &Path, out_dir: &Path) -> (String, Vec<String>) {
        let profile = out_dir.join("lo-profile");
        (
            self.tools.soffice.clone(),
            vec![
                format!("-env:UserInstallation=file://{}", profile.display()),
                "--headless".to_string(),
                "--convert-to".to_string(),
                target.to_string(),
                "--outdir".to_string(),
                out_dir.display().to_string(),
                source.display().to_string(),
            ],
        )
    }

    /// Re-save a legacy document into the workspace, returning the new path
    async fn resave(&self, target: &str, source: &Path, scope: &ConversionScope) -> Result<PathBuf> {
        let (program, args) = self.resave_command(target, source, scope.path());
        run_tool(self.runner.as_ref(), &program, &args).await?;

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let resaved = scope.file(&format!("{}.{}", stem, target));
        if !tokio::fs::try_exists(&resaved).await? {
            return Err(ConversionError::Malformed(format!(
                "{} produced no {} output",
                program_name(&program),
                target
            )));
        }
        debug!(resaved = %resaved.display(), "Legacy document re-saved");
        Ok(resaved)
    }

    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
        scope: &ConversionScope,
    ) -> Result<TextArtifact> {
        let ext = descriptor.extension().unwrap_or_default();
        let (program, args) = match legacy_target(&ext) {
            Some(target) => {
                let resaved = self.resave(target, source, scope).await?;
                self.command_for(target, &resaved)
            }
            None => self.command_for(&ext, source),
        };
        let output = run_tool(self.runner.as_ref(), &program, &args).await?;

        // pdftotext separates pages with form feeds
        let text = output.stdout_lossy().replace('\u{c}', "\n\n");
        let text = text.trim();
        let body = if text.is_empty() {
            "## Extracted text\n\n*No extractable text*\n".to_string()
        } else {
            format!("## Extracted text\n\n{}\n", text)
        };

        let name = descriptor.name();
        Ok(TextArtifact::new(title_for(name))
            .with_field("source_file", name)
            .with_field("original_format", dotted_extension(name).as_str())
            .with_field("extractor", program_name(&program))
            .with_field("size_bytes", descriptor.size)
            .with_field("converted_by", CONVERTED_BY)
            .with_body(body))
    }
}

fn program_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::CommandOutput;
    use chrono::Utc;
    use mockall::mock;
    use std::sync::Mutex;

    mock! {
        Runner {}

        #[async_trait::async_trait]
        impl CommandRunner for Runner {
            async fn run(
                &self,
                program: &str,
                args: &[String],
            ) -> bridge_traits::error::Result<CommandOutput>;
        }
    }

    fn converter() -> DocumentConverter {
        struct Unused;
        #[async_trait::async_trait]
        impl CommandRunner for Unused {
            async fn run(
                &self,
                _program: &str,
                _args: &[String],
            ) -> bridge_traits::error::Result<bridge_traits::CommandOutput> {
                unreachable!()
            }
        }
        DocumentConverter::new(Arc::new(Unused), ToolPaths::default(), 50)
    }

    #[test]
    fn test_pdf_command() {
        let (program, args) = converter().command_for("pdf", Path::new("/tmp/a.pdf"));
        assert_eq!(program, "pdftotext");
        assert_eq!(
            args,
            vec!["-layout", "-enc", "UTF-8", "-l", "50", "/tmp/a.pdf", "-"]
        );
    }

    #[test]
    fn test_office_command() {
        let (program, args) = converter().command_for("docx", Path::new("/tmp/a.docx"));
        assert_eq!(program, "pandoc");
        assert_eq!(args, vec!["/tmp/a.docx", "-t", "gfm", "--wrap=none"]);
    }

    #[test]
    fn test_legacy_formats_are_resaved_first() {
        assert_eq!(legacy_target("doc"), Some("docx"));
        assert_eq!(legacy_target("ppt"), Some("pptx"));
        assert_eq!(legacy_target("docx"), None);

        let (program, args) = converter().resave_command(
            "docx",
            Path::new("/mirror/old.doc"),
            Path::new("/tmp/ws"),
        );
        assert_eq!(program, "soffice");
        assert_eq!(
            args,
            vec![
                "-env:UserInstallation=file:///tmp/ws/lo-profile",
                "--headless",
                "--convert-to",
                "docx",
                "--outdir",
                "/tmp/ws",
                "/mirror/old.doc",
            ]
        );
    }

    #[tokio::test]
    async fn test_doc_goes_through_libreoffice_then_pandoc() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut runner = MockRunner::new();
        let seen = calls.clone();
        runner.expect_run().returning(move |program, args| {
            seen.lock().unwrap().push(program.to_string());
            if program == "soffice" {
                // --outdir <dir> precedes the source
                let out_dir = PathBuf::from(&args[args.len() - 2]);
                std::fs::write(out_dir.join("minutes.docx"), b"PK").unwrap();
                return Ok(CommandOutput::success(Vec::new()));
            }
            assert!(args[0].ends_with("minutes.docx"));
            Ok(CommandOutput::success(b"Board minutes".to_vec()))
        });

        let converter = DocumentConverter::new(Arc::new(runner), ToolPaths::default(), 50);
        let descriptor = RemoteFileDescriptor::file("/board/minutes.doc", 2_048, Utc::now());
        let scope = ConversionScope::new().unwrap();
        let artifact = converter
            .convert(&descriptor, Path::new("/mirror/board/minutes.doc"), &scope)
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["soffice", "pandoc"]);
        assert_eq!(artifact.field("extractor"), Some("pandoc"));
        assert_eq!(artifact.field("original_format"), Some(".doc"));
        assert!(artifact.body.contains("Board minutes"));
        scope.release().await;
    }

    #[tokio::test]
    async fn test_missing_resaved_copy_is_malformed() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::success(Vec::new())));

        let converter = DocumentConverter::new(Arc::new(runner), ToolPaths::default(), 50);
        let descriptor = RemoteFileDescriptor::file("/deck.ppt", 10, Utc::now());
        let scope = ConversionScope::new().unwrap();
        let err = converter
            .convert(&descriptor, Path::new("/mirror/deck.ppt"), &scope)
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::Malformed(ref m) if m.contains("pptx")));
        scope.release().await;
    }

    #[test]
    fn test_program_name() {
        assert_eq!(program_name("/usr/local/bin/pdftotext"), "pdftotext");
        assert_eq!(program_name("pandoc"), "pandoc");
    }
}
