//! Progress-callback trait for per-page and per-item extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator reads pages and the resolver rewrites items.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2qa::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     questions: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, questions: usize) {
//!         self.questions.fetch_add(questions, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} questions", page_num, total_pages, questions);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { questions: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it advances.
///
/// Pages and items are processed strictly one at a time, so events arrive in
/// order. Implementations must still be `Send + Sync` because the pipeline
/// runs on a multi-threaded runtime. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first page is read.
    ///
    /// # Arguments
    /// * `total_pages` — pages in the document
    /// * `start_page`  — first page this run will read (greater than 1 when
    ///   resuming from a checkpoint)
    fn on_extraction_start(&self, total_pages: usize, start_page: usize) {
        let _ = (total_pages, start_page);
    }

    /// Called just before a page is rendered and sent to the model.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been read and checkpointed.
    ///
    /// # Arguments
    /// * `questions` — questions found on the page (0 for blank or
    ///   unparsable pages)
    fn on_page_complete(&self, page_num: usize, total_pages: usize, questions: usize) {
        let _ = (page_num, total_pages, questions);
    }

    /// Called when a page's model call failed and the page was recorded empty.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once before reference resolution starts.
    fn on_resolution_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called after each item has been through detect/resolve.
    ///
    /// # Arguments
    /// * `index`   — 1-indexed position of the item
    /// * `item_id` — id of the item just processed
    /// * `changed` — whether the item text was rewritten
    fn on_item_resolved(&self, index: usize, total_items: usize, item_id: &str, changed: bool) {
        let _ = (index, total_items, item_id, changed);
    }

    /// Called once after the final item list is sorted.
    fn on_extraction_complete(&self, total_items: usize, failed_pages: usize) {
        let _ = (total_items, failed_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// The configured callback, or the no-op one.
pub(crate) fn resolve_callback(cb: Option<&ProgressCallback>) -> ProgressCallback {
    cb.cloned()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback) as ProgressCallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        pages: AtomicUsize,
        errors: AtomicUsize,
        resolved: Mutex<Vec<String>>,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _questions: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_resolved(&self, _index: usize, _total: usize, item_id: &str, _changed: bool) {
            self.resolved.lock().unwrap().push(item_id.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(5, 1);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, 3);
        cb.on_page_error(2, 5, "some error");
        cb.on_resolution_start(3);
        cb.on_item_resolved(1, 3, "1.1", false);
        cb.on_extraction_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_complete(1, 2, 4);
        tracker.on_page_error(2, 2, "timeout");
        tracker.on_item_resolved(1, 2, "2.5", true);
        tracker.on_item_resolved(2, 2, "2.6", false);

        assert_eq!(tracker.pages.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.resolved.lock().unwrap(), vec!["2.5", "2.6"]);
    }

    #[test]
    fn missing_callback_resolves_to_noop() {
        let cb = resolve_callback(None);
        cb.on_extraction_start(10, 4);
        cb.on_page_complete(4, 10, 0);
    }
}
