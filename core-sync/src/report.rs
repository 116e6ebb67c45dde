//! Failed-paths report written at the end of a run.
//!
//! One line per failure: `category<TAB>path<TAB>message`. Tabs and newlines
//! inside messages are flattened to spaces so every failure stays on a line.
//! A run without failures removes a stale report from an earlier run.

use crate::stats::SyncStatistics;
use crate::Result;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Write (or remove) the report for `stats`. Returns the number of lines written.
pub async fn write_failed_report(path: &Path, stats: &SyncStatistics) -> Result<usize> {
    if stats.failed == 0 {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed stale failed-paths report"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(0);
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut contents = String::new();
    let mut lines = 0;
    for (category, item) in stats.failures() {
        contents.push_str(category.as_str());
        contents.push('\t');
        contents.push_str(&flatten(&item.path));
        contents.push('\t');
        contents.push_str(&flatten(&item.message));
        contents.push('\n');
        lines += 1;
    }

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;

    info!(path = %path.display(), failures = lines, "Wrote failed-paths report");
    Ok(lines)
}

fn flatten(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::stats::ItemOutcome;

    fn failed(stats: &mut SyncStatistics, path: &str, category: ErrorCategory, message: &str) {
        stats.apply(
            path,
            ItemOutcome::Failed {
                category,
                message: message.to_string(),
                bytes: 0,
            },
        );
    }

    #[tokio::test]
    async fn test_report_lists_failures_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/failed.tsv");

        let mut stats = SyncStatistics::new("run");
        failed(&mut stats, "/a.pdf", ErrorCategory::TerminalInput, "bad\npdf");
        failed(&mut stats, "/b.mp4", ErrorCategory::TransientIo, "503\tbusy");

        assert_eq!(write_failed_report(&path, &stats).await.unwrap(), 2);
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            written,
            "transient_io\t/b.mp4\t503 busy\nterminal_input\t/a.pdf\tbad pdf\n"
        );
    }

    #[tokio::test]
    async fn test_clean_run_removes_stale_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.tsv");
        tokio::fs::write(&path, "old").await.unwrap();

        let stats = SyncStatistics::new("run");
        assert_eq!(write_failed_report(&path, &stats).await.unwrap(), 0);
        assert!(!path.exists());

        // Nothing to remove the second time
        assert_eq!(write_failed_report(&path, &stats).await.unwrap(), 0);
    }
}
