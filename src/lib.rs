//! # edgequake-pdf2qa
//!
//! Extract self-contained question/answer pairs from scanned exercise books
//! using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! OCR of worked-solution books fails in two places that a per-page VLM call
//! does not fix on its own: solutions that run across a page break, and items
//! that only make sense next to another ("by Remark 2.2"). This crate reads
//! pages one at a time with the previous page's context, stitches split parts
//! back together, and rewrites items so each one stands alone.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Pages    render → VLM → JSON, one page at a time, checkpointed
//!  ├─ 3. Stitch   merge parts split across page breaks
//!  ├─ 4. Resolve  detect/resolve cross-references (two text calls per item)
//!  ├─ 5. Sort     canonical id order: 2.18 < 2.18a < 2.18b < 2.19
//!  └─ 6. Output   extracted_qas.json + resolution_results.json
//! ```
//!
//! A run that dies part-way (network, quota, Ctrl-C) resumes from
//! `.checkpoint.json` in the output directory at the first unread page.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2qa::{extract_document, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract_document("exercises.pdf", "out/", &config).await?;
//!     for item in &output.items {
//!         println!("{}: {}", item.id, item.question_text);
//!     }
//!     eprintln!("{} unresolved references", output.stats.references_unresolved);
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a model
//!
//! The core depends only on three traits: [`PageSource`], [`VisionModel`]
//! and [`TextModel`]. [`extract_with`] and [`run_pipeline`] accept any
//! implementation, so the whole pipeline runs against in-memory doubles.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2qa` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod resolve;
pub mod sort;
pub mod stitch;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::{CheckpointRecord, CheckpointStore};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, ResumePolicy};
pub use error::{PageError, QaError};
pub use extract::{extract_document, extract_document_sync, extract_with, run_pipeline, write_outputs};
pub use model::{Figure, Item, PageContext, PageRange, PageResult, Question, QuestionPart};
pub use orchestrator::{prepare_resume, PageOrchestrator, PageRun, ResumeState};
pub use output::{ExtractionMetadata, ExtractionOutput, ExtractionStats, QaDocument};
pub use pipeline::llm::{LlmClient, TextModel, VisionModel};
pub use pipeline::source::PageSource;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use resolve::{Detection, DetectedReference, ReferenceResolver, ResolutionOutput, ResolutionResult};
pub use stitch::{stitch_pages, StitchReport, Stitched};
