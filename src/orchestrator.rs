//! Sequential page loop with cross-page context and crash-safe checkpoints.
//!
//! ```text
//!            ┌──────────── previous_page_context ─────────────┐
//!            ▼                                                │
//! page k ─▶ render ─▶ extract ─▶ PageResult ─▶ PageContext ───┘
//!                                   │
//!                                   └─▶ checkpoint (pages 1..=k)
//! ```
//!
//! Page k+1 is never started before page k's context is computed and its
//! checkpoint is on disk, so a crash at any point loses at most the page in
//! flight. The loop itself keeps no state outside the [`CheckpointRecord`]
//! it accumulates into; resuming is just loading that record.

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::{ExtractionConfig, ResumePolicy};
use crate::error::{PageError, QaError};
use crate::model::{PageContext, PageResult};
use crate::pipeline::extract::extract_page;
use crate::pipeline::llm::VisionModel;
use crate::pipeline::source::PageSource;
use crate::progress::resolve_callback;
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use chrono::Utc;
use tracing::{info, warn};

/// Where the loop starts and what it starts with.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeState {
    /// First page to read (1-indexed).
    pub start_page: usize,
    pub results: Vec<PageResult>,
    pub context: Option<PageContext>,
}

impl ResumeState {
    pub fn fresh() -> Self {
        Self {
            start_page: 1,
            results: Vec::new(),
            context: None,
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.start_page > 1
    }
}

/// Decide how to start given the checkpoint in `store`.
///
/// - no checkpoint: fresh start
/// - [`ResumePolicy::Restart`]: checkpoint deleted, fresh start
/// - checkpoint for another document: ignored (it will be overwritten)
/// - page count differs from `total_pages`: [`QaError::CheckpointCorrupt`]
/// - otherwise: continue after `last_processed_page`
pub fn prepare_resume(
    store: &CheckpointStore,
    source_id: &str,
    total_pages: usize,
    policy: ResumePolicy,
) -> Result<ResumeState, QaError> {
    if policy == ResumePolicy::Restart {
        if store.exists() {
            info!("Discarding checkpoint {}", store.path().display());
        }
        store.delete()?;
        return Ok(ResumeState::fresh());
    }

    let Some(record) = store.load()? else {
        return Ok(ResumeState::fresh());
    };

    if record.source_path != source_id {
        warn!(
            "Ignoring checkpoint for a different document ({} ≠ {})",
            record.source_path, source_id
        );
        return Ok(ResumeState::fresh());
    }

    if record.total_pages != total_pages {
        return Err(QaError::CheckpointCorrupt {
            path: store.path().to_path_buf(),
            detail: format!(
                "checkpoint expects {} pages but the document has {}",
                record.total_pages, total_pages
            ),
        });
    }

    info!(
        "Resuming from checkpoint: {}/{} pages done",
        record.last_processed_page, record.total_pages
    );
    Ok(ResumeState {
        start_page: record.last_processed_page + 1,
        results: record.all_page_results,
        context: record.previous_page_context,
    })
}

/// Result of a completed page loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRun {
    /// One result per page, `1..=total_pages`, in order.
    pub pages: Vec<PageResult>,
    pub total_pages: usize,
    /// Pages restored from a checkpoint rather than read in this run.
    pub resumed_pages: usize,
    /// Pages recorded empty because their model call failed.
    pub failed_pages: Vec<PageError>,
}

/// Drives pages through the vision model in order.
pub struct PageOrchestrator<'a> {
    source: &'a dyn PageSource,
    model: &'a dyn VisionModel,
    store: Option<&'a CheckpointStore>,
    config: &'a ExtractionConfig,
}

impl<'a> PageOrchestrator<'a> {
    /// `store` is `None` when checkpointing is disabled.
    pub fn new(
        source: &'a dyn PageSource,
        model: &'a dyn VisionModel,
        store: Option<&'a CheckpointStore>,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self {
            source,
            model,
            store,
            config,
        }
    }

    /// Read every remaining page.
    ///
    /// # Errors
    /// Render failures, authentication failures, checkpoint I/O and (when
    /// `skip_failed_pages` is off) any model-call failure abort the loop.
    /// Pages completed before the error stay in the checkpoint.
    pub async fn run(&self) -> Result<PageRun, QaError> {
        let total_pages = self.source.page_count().await?;
        let state = match self.store {
            Some(store) => prepare_resume(
                store,
                self.source.source_id(),
                total_pages,
                self.config.resume,
            )?,
            None => ResumeState::fresh(),
        };
        let resumed_pages = state.start_page - 1;

        let mut record = CheckpointRecord {
            source_path: self.source.source_id().to_string(),
            total_pages,
            last_processed_page: resumed_pages,
            timestamp: Utc::now(),
            resolve_references: self.config.resolve_references,
            previous_page_context: state.context,
            all_page_results: state.results,
        };

        let callback = resolve_callback(self.config.progress_callback.as_ref());
        callback.on_extraction_start(total_pages, state.start_page);

        let template = self
            .config
            .extraction_prompt
            .as_deref()
            .unwrap_or(DEFAULT_EXTRACTION_PROMPT);
        let mut failed_pages = Vec::new();

        for page in state.start_page..=total_pages {
            callback.on_page_start(page, total_pages);

            let image = self.source.render_page(page).await?;
            let result = match extract_page(
                self.model,
                image,
                page,
                template,
                record.previous_page_context.as_ref(),
            )
            .await
            {
                Ok(result) => result,
                Err(e) if self.config.skip_failed_pages && !e.is_fatal_for_page() => {
                    warn!("Page {}: skipped after model failure: {}", page, e);
                    let page_error = self.page_error(page, &e);
                    callback.on_page_error(page, total_pages, &page_error.to_string());
                    failed_pages.push(page_error);
                    PageResult::empty(page)
                }
                Err(e) => return Err(e),
            };

            let questions = result.questions.len();
            record.previous_page_context = PageContext::from_page(&result);
            record.all_page_results.push(result);
            record.last_processed_page = page;
            record.timestamp = Utc::now();

            if let Some(store) = self.store {
                store.save(&record)?;
            }

            info!("Page {}/{}: {} questions", page, total_pages, questions);
            callback.on_page_complete(page, total_pages, questions);
        }

        Ok(PageRun {
            pages: record.all_page_results,
            total_pages,
            resumed_pages,
            failed_pages,
        })
    }

    fn page_error(&self, page: usize, err: &QaError) -> PageError {
        match err {
            QaError::ApiTimeout { .. } => PageError::Timeout {
                page,
                secs: self.config.api_timeout_secs,
            },
            other => PageError::LlmFailed {
                page,
                detail: other.to_string(),
            },
        }
    }
}
