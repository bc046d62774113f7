//! Full-document extraction entry points.
//!
//! ```text
//! PageOrchestrator ─▶ stitch_pages ─▶ flatten ─▶ ReferenceResolver ─▶ sort_items ─▶ audit
//!   (checkpointed)      (fresh list)              (optional, chained)
//! ```
//!
//! [`extract_document`] wires the production collaborators (pdfium source,
//! `edgequake-llm` client) into [`extract_with`], which owns the run
//! lifecycle: pipeline, artifact writes, checkpoint removal. [`run_pipeline`]
//! is the pure data path and writes nothing but checkpoints.

use crate::audit::audit_items;
use crate::checkpoint::CheckpointStore;
use crate::config::ExtractionConfig;
use crate::error::QaError;
use crate::model::flatten;
use crate::orchestrator::PageOrchestrator;
use crate::output::{write_json_atomic, ExtractionMetadata, ExtractionOutput, ExtractionStats};
use crate::pipeline::input;
use crate::pipeline::llm::{LlmClient, TextModel, VisionModel};
use crate::pipeline::render::PdfiumSource;
use crate::pipeline::source::PageSource;
use crate::progress::resolve_callback;
use crate::resolve::{tracking_record, ReferenceResolver};
use crate::sort::sort_items;
use crate::stitch::stitch_pages;
use chrono::Utc;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// File name of the question/answer artifact.
pub const QAS_FILE_NAME: &str = "extracted_qas.json";

/// File name of the resolution-tracking artifact.
pub const RESOLUTIONS_FILE_NAME: &str = "resolution_results.json";

/// Extract question/answer pairs from a PDF file or URL into `output_dir`.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ExtractionOutput)` on success, even if some pages failed
/// (check `output.stats.failed_pages`). Both artifacts have been written
/// and the checkpoint removed.
///
/// # Errors
/// Returns `Err(QaError)` only for fatal errors: unreadable input, provider
/// not configured or rejecting credentials, corrupt checkpoint, I/O failures.
/// Progress up to the failure stays in `output_dir/.checkpoint.json`.
pub async fn extract_document(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, QaError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Get/create provider ──────────────────────────────────────
    let (provider, label) = resolve_provider(config)?;
    let client = LlmClient::new(provider, label.clone(), config);

    // ── Step 3: Open the document ────────────────────────────────────────
    let source = PdfiumSource::open(resolved.path(), resolved.source_id(), config).await?;

    // ── Step 4: Run, write, clean up ─────────────────────────────────────
    let mut output = extract_with(&source, &client, &client, output_dir.as_ref(), config, &label).await?;

    let usage = client.usage();
    output.stats.total_calls = usage.calls;
    output.stats.total_input_tokens = usage.input_tokens;
    output.stats.total_output_tokens = usage.output_tokens;
    output.metadata.document_title = source.title().map(str::to_string);

    info!(
        "Extraction complete: {} items from {} pages, {} calls, {} in / {} out tokens",
        output.items.len(),
        output.stats.total_pages,
        usage.calls,
        usage.input_tokens,
        usage.output_tokens
    );
    Ok(output)
}

/// Synchronous wrapper around [`extract_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_document_sync(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, QaError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| QaError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_document(input_str, output_dir, config))
}

/// Run the pipeline with caller-supplied collaborators, write the artifacts
/// into `output_dir` and remove the checkpoint.
pub async fn extract_with(
    source: &dyn PageSource,
    vision: &dyn VisionModel,
    text: &dyn TextModel,
    output_dir: &Path,
    config: &ExtractionConfig,
    model_used: &str,
) -> Result<ExtractionOutput, QaError> {
    let store = config
        .enable_checkpoints
        .then(|| CheckpointStore::in_dir(output_dir));

    let output = run_pipeline(source, vision, text, store.as_ref(), config, model_used).await?;
    write_outputs(output_dir, &output)?;

    if let Some(store) = &store {
        store.delete()?;
    }
    Ok(output)
}

/// Pages → stitched → flattened → resolved → sorted items.
pub async fn run_pipeline(
    source: &dyn PageSource,
    vision: &dyn VisionModel,
    text: &dyn TextModel,
    store: Option<&CheckpointStore>,
    config: &ExtractionConfig,
    model_used: &str,
) -> Result<ExtractionOutput, QaError> {
    let total_start = Instant::now();
    let callback = resolve_callback(config.progress_callback.as_ref());

    // ── Pages ────────────────────────────────────────────────────────────
    let extraction_start = Instant::now();
    let run = PageOrchestrator::new(source, vision, store, config).run().await?;
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

    if !run.failed_pages.is_empty() {
        warn!(
            "{} page(s) failed and were recorded empty: {:?}",
            run.failed_pages.len(),
            run.failed_pages.iter().map(|e| e.page()).collect::<Vec<_>>()
        );
    }

    // ── Stitch + flatten ─────────────────────────────────────────────────
    let stitched = stitch_pages(&run.pages);
    info!(
        "Stitched page breaks: {} merged, {} unmatched, {} ambiguous",
        stitched.report.merged, stitched.report.unmatched, stitched.report.ambiguous
    );
    let items = flatten(&stitched.pages);

    // ── Resolve ──────────────────────────────────────────────────────────
    let resolution_start = Instant::now();
    let (mut items, resolutions) = if config.resolve_references {
        ReferenceResolver::new(text)
            .with_progress(callback.as_ref())
            .resolve_all(items)
            .await?
    } else {
        (items, Vec::new())
    };
    let resolution_duration_ms = resolution_start.elapsed().as_millis() as u64;

    // ── Order + audit ────────────────────────────────────────────────────
    sort_items(&mut items);
    let audit = audit_items(&items);
    if audit.items_flagged() > 0 {
        info!(
            "{} item(s) still contain reference-like phrases",
            audit.items_flagged()
        );
    }

    let mut stats = ExtractionStats {
        total_pages: run.total_pages,
        processed_pages: run.pages.len() - run.resumed_pages,
        resumed_pages: run.resumed_pages,
        failed_pages: run.failed_pages,
        total_items: items.len(),
        stitch: stitched.report,
        remaining_references: audit.total_references(),
        extraction_duration_ms,
        resolution_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        ..Default::default()
    };
    stats.record_resolutions(&resolutions);

    callback.on_extraction_complete(items.len(), stats.failed_pages.len());

    Ok(ExtractionOutput {
        metadata: ExtractionMetadata {
            source: source.source_id().to_string(),
            extraction_date: Utc::now(),
            total_questions: items.len(),
            total_pages: run.total_pages,
            model_used: model_used.to_string(),
            document_title: None,
        },
        items,
        resolutions,
        resolution_ran: config.resolve_references,
        audit,
        stats,
    })
}

/// Write `extracted_qas.json` and, when resolution ran,
/// `resolution_results.json` into `output_dir`. Returns the written paths.
pub fn write_outputs(output_dir: &Path, output: &ExtractionOutput) -> Result<Vec<PathBuf>, QaError> {
    let mut written = Vec::new();

    let qas_path = output_dir.join(QAS_FILE_NAME);
    write_json_atomic(&qas_path, &output.document())?;
    written.push(qas_path);

    if output.resolution_ran {
        let path = output_dir.join(RESOLUTIONS_FILE_NAME);
        write_json_atomic(&path, &tracking_record(&output.resolutions))?;
        written.push(path);
    }

    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(written)
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<(Arc<dyn LLMProvider>, String), QaError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        QaError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok((provider, format!("{provider_name}/{model}")))
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), created through
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key** (`OPENAI_API_KEY`), preferred when several keys are set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Returns the provider and a `provider/model` label for output metadata.
fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<(Arc<dyn LLMProvider>, String), QaError> {
    if let Some(ref provider) = config.provider {
        let label = config.model.clone().unwrap_or_else(|| "custom".to_string());
        return Ok((Arc::clone(provider), label));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let model = config.model.clone().unwrap_or(model);
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| QaError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}
