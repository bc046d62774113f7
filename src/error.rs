//! Error types for the edgequake-pdf2qa library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`QaError`] — **Fatal**: the extraction cannot make forward progress
//!   (unreadable input, wrong password, provider not configured, rejected
//!   credentials, corrupt checkpoint). Returned as `Err(QaError)` from the
//!   top-level `extract*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be read by the
//!   model (timeout, exhausted retries). The page is recorded as empty, the
//!   run continues, and the error is kept in
//!   [`crate::output::ExtractionStats::failed_pages`] for the post-run report.
//!
//! Recoverable conditions that are *expected* — malformed model JSON, a
//! continuation with no match on the next page, a reference whose source
//! cannot be inferred — never become errors at all. They are absorbed by the
//! component that detects them and turned into data (empty results, report
//! counters, `could_not_resolve` flags).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2qa library.
#[derive(Debug, Error)]
pub enum QaError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Requested page number exceeds the document's page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error and every retry was exhausted.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The provider rejected the credentials (401/403). Never retried.
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// A model call exceeded the per-call timeout.
    #[error("API call timed out after {elapsed_ms}ms ({context})")]
    ApiTimeout { context: String, elapsed_ms: u64 },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// The checkpoint on disk is unreadable or violates its invariants.
    ///
    /// Resuming from it is unsafe; the caller should offer a restart instead.
    #[error(
        "Checkpoint '{path}' cannot be resumed: {detail}\n\
Re-run with --force-restart to discard it and start from page 1."
    )]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// The checkpoint could not be written or removed.
    #[error("Checkpoint I/O failed for '{path}': {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, or install libpdfium where the\n\
system loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QaError {
    /// Whether this error must abort the run even when failed pages are
    /// configured to be skipped.
    pub fn is_fatal_for_page(&self) -> bool {
        !matches!(self, QaError::LlmApiError { .. } | QaError::ApiTimeout { .. })
    }
}

/// A non-fatal error for a single page.
///
/// The page is stored as an empty [`crate::model::PageResult`] and the
/// error itself lands in the run statistics.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Model call failed after retries.
    #[error("Page {page}: model call failed: {detail}")]
    LlmFailed { page: usize, detail: String },

    /// Model call timed out.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// 1-indexed page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::LlmFailed { page, .. } | PageError::Timeout { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_corrupt_suggests_restart() {
        let e = QaError::CheckpointCorrupt {
            path: PathBuf::from("out/.checkpoint.json"),
            detail: "2 page results recorded but last_processed_page is 3".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("--force-restart"), "got: {msg}");
        assert!(msg.contains("last_processed_page is 3"));
    }

    #[test]
    fn auth_error_display() {
        let e = QaError::AuthError {
            provider: "anthropic".into(),
            detail: "invalid key".into(),
        };
        assert!(e.to_string().contains("anthropic"));
        assert!(e.to_string().contains("invalid key"));
    }

    #[test]
    fn api_timeout_display() {
        let e = QaError::ApiTimeout {
            context: "page 3".into(),
            elapsed_ms: 5000,
        };
        assert!(e.to_string().contains("5000ms"));
        assert!(e.to_string().contains("page 3"));
    }

    #[test]
    fn transient_errors_are_skippable() {
        assert!(!QaError::LlmApiError { message: "503".into() }.is_fatal_for_page());
        assert!(!QaError::ApiTimeout {
            context: "page 1".into(),
            elapsed_ms: 10
        }
        .is_fatal_for_page());
        assert!(QaError::AuthError {
            provider: "openai".into(),
            detail: "401".into()
        }
        .is_fatal_for_page());
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::Timeout { page: 7, secs: 60 };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().contains("60s"));
    }
}
