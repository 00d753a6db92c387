//! PDF text extraction.
//!
//! Pages are read in ascending order `1..=N`. Each page contributes a
//! boundary marker carrying its 1-based number, followed by the page text
//! exactly as the PDF reader reports it. Any unreadable page fails the whole
//! document.

use crate::error::{Error, Result};
use async_trait::async_trait;
use lopdf::content::Content;
use lopdf::{Document, ObjectId};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, info, instrument};

/// Anything that can turn a fetched document into linear text.
#[async_trait]
pub trait TextExtract: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String>;
}

/// The boundary marker written before page `n`.
pub fn page_marker(n: u32) -> String {
    format!("\n--- Page {n} ---\n")
}

/// Extracts text from PDFs with `lopdf` on the blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction of an already loaded document.
    ///
    /// # Arguments
    ///
    /// * `doc` - The loaded document
    /// * `path` - Where it was loaded from, for error reporting
    ///
    /// # Returns
    ///
    /// One marker plus text per page, pages in ascending order. A document
    /// with no pages yields an empty string.
    ///
    /// # Errors
    ///
    /// [`Error::Format`] if any page's content cannot be resolved, decoded
    /// or read.
    pub fn extract_document(doc: &Document, path: &Path) -> Result<String> {
        let pages = doc.get_pages();
        let mut text = String::new();

        for (&n, &page_id) in &pages {
            Self::check_page_content(doc, page_id)
                .map_err(|e| Error::format(path, format!("page {n}: {e}")))?;
            let page_text = doc
                .extract_text(&[n])
                .map_err(|e| Error::format(path, format!("page {n}: {e}")))?;
            text.push_str(&page_marker(n));
            text.push_str(&page_text);
        }

        debug!(pages = pages.len(), chars = text.chars().count(), "Extracted pages");
        Ok(text)
    }

    /// Resolve and decode every content stream of a page.
    ///
    /// `extract_text` skips streams it cannot resolve, which would turn a
    /// broken page into an empty one.
    fn check_page_content(doc: &Document, page_id: ObjectId) -> lopdf::Result<()> {
        for stream_id in doc.get_page_contents(page_id) {
            let stream = doc.get_object(stream_id)?.as_stream()?;
            let raw = if stream.dict.get(b"Filter").is_ok() {
                stream.decompressed_content()?
            } else {
                stream.content.clone()
            };
            let _: Content = Content::decode(&raw)?;
        }
        Ok(())
    }

    fn extract_blocking(path: &Path) -> Result<String> {
        let doc = Document::load(path).map_err(|e| Error::format(path, e))?;
        Self::extract_document(&doc, path)
    }
}

#[async_trait]
impl TextExtract for PdfExtractor {
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    async fn extract(&self, path: &Path) -> Result<String> {
        let t0 = Instant::now();
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Err(Error::NotFound(path.to_path_buf()));
        }

        let owned: PathBuf = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || Self::extract_blocking(&owned))
            .await
            .map_err(|e| Error::format(path, format!("extraction task failed: {e}")))??;

        info!(
            bytes = text.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Extracted document text"
        );
        Ok(text)
    }
}
