//! Pipeline stages for question/answer extraction.
//!
//! Each submodule implements exactly one step. The two trait seams
//! ([`source::PageSource`], [`llm::VisionModel`] / [`llm::TextModel`]) are
//! what the orchestrator and resolver depend on; the rest are their
//! production implementations and the per-page glue.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render+encode ──▶ extract ──▶ llm ──▶ parse
//! (URL/path)  (PageSource)     (prompt)   (VLM)   (JSON → PageResult)
//! ```
//!
//! 1. [`input`]   — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]  — rasterise one page via pdfium in `spawn_blocking`
//! 3. [`encode`]  — PNG-encode and base64-wrap the page image
//! 4. [`extract`] — build the page prompt (with previous-page context) and
//!    call the vision model
//! 5. [`llm`]     — model seams plus the retrying `edgequake-llm` client; the
//!    only stage with network I/O besides URL download
//! 6. [`parse`]   — deterministic cleanup of model output into typed JSON

pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
pub mod source;
