//! Page-by-page extraction through poppler-utils.
//!
//! `pdfinfo` supplies the page count, then `pdftotext -f N -l M` runs over
//! batches of pages. `pdftotext` ends every page with a form feed, which is
//! where the batch output is split back into pages. Commands run through
//! `tokio::process` with a per-command timeout, and the whole extraction is
//! bounded by a separate deadline.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use super::{PdfError, PdfExtractor};

/// Per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Deadline for extracting a whole document.
pub const DEFAULT_TOTAL_TIMEOUT_SECS: u64 = 180;

/// Pages handed to a single `pdftotext` run.
pub const PAGE_BATCH: usize = 50;

const PAGE_BREAK: char = '\u{c}';

/// Extractor shelling out to `pdfinfo` and `pdftotext`.
#[derive(Debug, Clone)]
pub struct PopplerExtractor {
    timeout_secs: u64,
    total_timeout_secs: u64,
}

impl Default for PopplerExtractor {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            total_timeout_secs: DEFAULT_TOTAL_TIMEOUT_SECS,
        }
    }
}

impl PopplerExtractor {
    pub fn new(timeout_secs: u64, total_timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            total_timeout_secs,
        }
    }

    /// Whether `pdftotext` is installed.
    pub async fn is_available(&self) -> bool {
        match Command::new("pdftotext").arg("-v").output().await {
            // Older poppler builds exit 99 on -v.
            Ok(output) => output.status.success() || output.status.code() == Some(99),
            Err(_) => false,
        }
    }

    async fn run(&self, cmd: &mut Command) -> Result<String, PdfError> {
        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| PdfError::Timeout(self.timeout_secs))?
            .map_err(|e| PdfError::Extraction(format!("failed to run extractor: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PdfError::Extraction(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn page_count(&self, path: &Path) -> Result<usize, PdfError> {
        let info = self.run(Command::new("pdfinfo").arg(path)).await?;
        parse_page_count(&info)
            .ok_or_else(|| PdfError::Extraction("could not determine page count".to_string()))
    }

    /// Text of pages `first..=last`, exactly one entry per page.
    async fn batch_text(
        &self,
        path: &Path,
        first: usize,
        last: usize,
    ) -> Result<Vec<Option<String>>, PdfError> {
        let (first_arg, last_arg) = (first.to_string(), last.to_string());
        let raw = self
            .run(
                Command::new("pdftotext")
                    .args(["-enc", "UTF-8", "-f", first_arg.as_str(), "-l", last_arg.as_str()])
                    .arg(path)
                    .arg("-"),
            )
            .await?;

        let mut pages = split_pages(&raw);
        pages.resize(last - first + 1, None);
        Ok(pages)
    }

    async fn extract_all(&self, path: &Path) -> Result<Vec<Option<String>>, PdfError> {
        let pages = self.page_count(path).await?;
        debug!(pages, batch = PAGE_BATCH, "Extracting PDF text");

        let mut texts = Vec::with_capacity(pages);
        let mut first = 1;
        while first <= pages {
            let last = (first + PAGE_BATCH - 1).min(pages);
            texts.extend(self.batch_text(path, first, last).await?);
            first = last + 1;
        }
        Ok(texts)
    }
}

#[async_trait]
impl PdfExtractor for PopplerExtractor {
    async fn extract_pages(&self, data: &[u8]) -> Result<Vec<Option<String>>, PdfError> {
        let mut tmpfile = NamedTempFile::new()
            .map_err(|e| PdfError::Extraction(format!("failed to create temp file: {e}")))?;
        tmpfile
            .write_all(data)
            .map_err(|e| PdfError::Extraction(format!("failed to write temp file: {e}")))?;

        let deadline = Duration::from_secs(self.total_timeout_secs);
        tokio::time::timeout(deadline, self.extract_all(tmpfile.path()))
            .await
            .map_err(|_| PdfError::Timeout(self.total_timeout_secs))?
    }
}

/// Read `Pages:` from `pdfinfo` output.
fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Pages")
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Split `pdftotext` output into pages. Every page is terminated by a form
/// feed; whatever follows the last one is not a page.
fn split_pages(raw: &str) -> Vec<Option<String>> {
    let mut segments: Vec<&str> = raw.split(PAGE_BREAK).collect();
    if segments.len() > 1 {
        segments.pop();
    }
    segments.into_iter().map(clean_page).collect()
}

/// Drop trailing blank space. A page with nothing left has no text layer.
fn clean_page(raw: &str) -> Option<String> {
    let text = raw.trim_end_matches([PAGE_BREAK, '\n', '\r', ' ', '\t']);
    (!text.trim().is_empty()).then(|| text.to_string())
}
