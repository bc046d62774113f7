//! The page-source seam: anything that can hand out page images.
//!
//! The orchestrator only knows this trait. [`crate::pipeline::render::PdfiumSource`]
//! is the production implementation; tests use in-memory doubles.

use crate::error::QaError;
use async_trait::async_trait;
use edgequake_llm::ImageData;

/// A document whose pages can be rendered one at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Stable identity of the document, stored in the checkpoint
    /// (absolute path or URL).
    fn source_id(&self) -> &str;

    /// Number of pages in the document.
    async fn page_count(&self) -> Result<usize, QaError>;

    /// Render 1-indexed `page` as an image ready for a vision model.
    async fn render_page(&self, page: usize) -> Result<ImageData, QaError>;
}
