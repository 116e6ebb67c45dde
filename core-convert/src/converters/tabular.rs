//! # Tabular Converter
//!
//! Renders delimited text and spreadsheets as Markdown tables.
//!
//! CSV/TSV files are decoded (see [`decode_text`]) and parsed with the `csv`
//! crate. Workbooks are first split into one CSV per sheet by `xlsx2csv`
//! inside the conversion workspace, then rendered sheet by sheet.

use super::encoding::decode_text;
use super::run_tool;
use crate::artifact::{dotted_extension, title_for, TextArtifact, CONVERTED_BY};
use crate::config::{TableLimits, ToolPaths};
use crate::scope::ConversionScope;
use crate::{ConversionError, Result};
use bridge_traits::{CommandRunner, RemoteFileDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A parsed and rendered table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTable {
    pub markdown: String,
    /// Data rows in the source, header excluded
    pub rows: usize,
    pub columns: usize,
    pub truncated: bool,
}

pub struct TabularConverter {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
    limits: TableLimits,
}

impl TabularConverter {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths, limits: TableLimits) -> Self {
        Self {
            runner,
            tools,
            limits,
        }
    }

    pub async fn convert(
        &self,
        descriptor: &RemoteFileDescriptor,
        source: &Path,
        scope: &mut ConversionScope,
    ) -> Result<TextArtifact> {
        let name = descriptor.name();
        let ext = descriptor.extension().unwrap_or_default();

        let sheets = match ext.as_str() {
            "csv" | "tsv" => {
                let bytes = tokio::fs::read(source).await?;
                let decoded = decode_text(&bytes);
                debug!(file = name, encoding = decoded.encoding, "Decoded table");
                let delimiter = if ext == "tsv" {
                    b'\t'
                } else {
                    sniff_delimiter(&decoded.text)
                };
                vec![(None, parse_delimited(&decoded.text, delimiter)?)]
            }
            _ => self.split_workbook(source, scope).await?,
        };

        Ok(self.render(name, &ext, sheets))
    }

    /// Run `xlsx2csv --all` into the workspace and parse every sheet
    async fn split_workbook(
        &self,
        source: &Path,
        scope: &ConversionScope,
    ) -> Result<Vec<(Option<String>, Vec<Vec<String>>)>> {
        let out_dir = scope.file("sheets");
        tokio::fs::create_dir_all(&out_dir).await?;

        let args = vec![
            "--all".to_string(),
            "--delimiter".to_string(),
            ",".to_string(),
            source.display().to_string(),
            out_dir.display().to_string(),
        ];
        run_tool(self.runner.as_ref(), &self.tools.xlsx2csv, &args).await?;

        let mut files: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(&out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "csv") {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(ConversionError::Malformed(
                "workbook contains no sheets".to_string(),
            ));
        }

        let limit = self.limits.max_sheets.unwrap_or(usize::MAX);
        let mut sheets = Vec::new();
        for path in files.into_iter().take(limit) {
            let sheet_name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = tokio::fs::read(&path).await?;
            let text = decode_text(&bytes).text;
            sheets.push((Some(sheet_name), parse_delimited(&text, b',')?));
        }
        Ok(sheets)
    }

    fn render(
        &self,
        file_name: &str,
        ext: &str,
        sheets: Vec<(Option<String>, Vec<Vec<String>>)>,
    ) -> TextArtifact {
        let mut body = String::new();
        let mut total_rows = 0;
        let mut max_columns = 0;
        let mut truncated = false;
        let sheet_count = sheets.len();

        for (sheet, records) in sheets {
            let table = render_table(&records, &self.limits);
            total_rows += table.rows;
            max_columns = max_columns.max(table.columns);
            truncated |= table.truncated;

            if let Some(sheet) = sheet {
                body.push_str(&format!("## {}\n\n", sheet));
            }
            body.push_str(&format!(
                "**Data size:** {} rows × {} columns\n\n",
                table.rows, table.columns
            ));
            body.push_str(&table.markdown);
            body.push('\n');
        }

        let mut artifact = TextArtifact::new(title_for(file_name))
            .with_field("source_file", file_name)
            .with_field("original_format", dotted_extension(file_name).as_str());
        if ext != "csv" && ext != "tsv" {
            artifact = artifact.with_field("sheets", sheet_count);
        }
        artifact
            .with_field("rows", total_rows)
            .with_field("columns", max_columns)
            .with_field("truncated", truncated)
            .with_field("converted_by", CONVERTED_BY)
            .with_body(body)
    }
}

/// Pick the most frequent of `,` `;` `\t` on the first line
pub fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .map(|d| (d, first.bytes().filter(|&b| b == d).count()))
        .filter(|&(_, n)| n > 0)
        .max_by_key(|&(d, n)| (n, d == b','))
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

pub fn parse_delimited(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| ConversionError::Malformed(format!("CSV parse error: {}", e)))
        })
        .collect()
}

/// Render records (first record is the header) as a Markdown table
pub fn render_table(records: &[Vec<String>], limits: &TableLimits) -> RenderedTable {
    let columns = records.iter().map(Vec::len).max().unwrap_or(0);
    let rows = records.len().saturating_sub(1);
    if columns == 0 {
        return RenderedTable {
            markdown: "*Empty table*\n".to_string(),
            rows: 0,
            columns: 0,
            truncated: false,
        };
    }

    let shown_columns = limits.max_columns.map_or(columns, |m| m.min(columns));
    let shown_rows = limits.max_rows.map_or(rows, |m| m.min(rows));
    let truncated = shown_columns < columns || shown_rows < rows;

    let mut markdown = String::new();
    let row_line = |record: &[String]| -> String {
        let cells: Vec<String> = (0..shown_columns)
            .map(|i| escape_cell(record.get(i).map(String::as_str).unwrap_or("")))
            .collect();
        format!("| {} |\n", cells.join(" | "))
    };

    markdown.push_str(&row_line(records[0].as_slice()));
    markdown.push_str(&format!("|{}\n", "---|".repeat(shown_columns)));
    for record in records.iter().skip(1).take(shown_rows) {
        markdown.push_str(&row_line(record.as_slice()));
    }

    if shown_rows < rows {
        markdown.push_str(&format!(
            "\n*Showing first {} of {} rows*\n",
            shown_rows, rows
        ));
    }
    if shown_columns < columns {
        markdown.push_str(&format!(
            "\n*Showing first {} of {} columns*\n",
            shown_columns, columns
        ));
    }

    RenderedTable {
        markdown,
        rows,
        columns,
        truncated,
    }
}

fn escape_cell(cell: &str) -> String {
    cell.trim()
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace(['\n', '\r'], "<br>")
}
