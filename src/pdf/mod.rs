//! PDF text extraction.
//!
//! - [`poppler`]: Extractor backed by the `pdfinfo`/`pdftotext` tools
//!
//! Extractors report text per page; [`extract_text`] validates the upload
//! and joins pages with `\n`, so a page without a text layer still occupies
//! its own (empty) line.

pub mod poppler;

use async_trait::async_trait;
use thiserror::Error;

pub use poppler::PopplerExtractor;

/// Reasons a document could not be turned into text.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("uploaded file is empty")]
    Empty,

    #[error("file is not a PDF (missing %PDF header)")]
    NotPdf,

    #[error("{0}")]
    Extraction(String),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),
}

/// Turns PDF bytes into per-page text.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    /// Text of every page in order. `None` marks a page with no text layer.
    async fn extract_pages(&self, data: &[u8]) -> Result<Vec<Option<String>>, PdfError>;
}

/// Validate an upload and extract its text, one line group per page.
pub async fn extract_text(extractor: &dyn PdfExtractor, data: &[u8]) -> Result<String, PdfError> {
    if data.is_empty() {
        return Err(PdfError::Empty);
    }
    if !data.starts_with(b"%PDF") {
        return Err(PdfError::NotPdf);
    }

    let pages = extractor.extract_pages(data).await?;
    Ok(join_pages(pages))
}

/// Join page texts with newlines; missing text becomes an empty segment.
pub fn join_pages<I>(pages: I) -> String
where
    I: IntoIterator<Item = Option<String>>,
{
    pages
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect::<Vec<_>>()
        .join("\n")
}
