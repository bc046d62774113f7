//! Configuration types for question/answer extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is passed explicitly to
//! every driver (orchestrator, resolver, output writer); nothing reads global
//! state except the provider auto-detection in [`crate::extract`].
//!
//! # Design choice: builder over constructor
//! Most callers only touch the model and the output directory. The builder
//! lets them set those and rely on documented defaults for the rest.

use crate::error::QaError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What to do with an existing checkpoint for the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Continue after the last checkpointed page (default).
    #[default]
    Resume,
    /// Discard the checkpoint and start from page 1.
    Restart,
}

/// Configuration for one extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2qa::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .model("gpt-4.1")
///     .resolve_references(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI for each page. Range: 72–400. Default: 150.
    ///
    /// Sub- and superscripts in dense mathematics are the first thing a
    /// vision model misreads; raise this for small print.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Applied after the DPI scale, so a large page never exceeds
    /// `max_rendered_pixels` on its longest edge.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for every model call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 8192.
    ///
    /// A page of worked solutions in LaTeX is far longer than its prose
    /// equivalent; a truncated response is unparsable and the page is lost.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient API failure. Default: 3.
    ///
    /// Authentication failures are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom page-extraction prompt. If None, uses
    /// [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    ///
    /// A replacement must still ask for the JSON shape that
    /// [`crate::pipeline::parse::parse_page`] decodes.
    pub extraction_prompt: Option<String>,

    /// Run the two-phase reference resolver after stitching. Default: true.
    pub resolve_references: bool,

    /// Write `.checkpoint.json` after every page. Default: true.
    pub enable_checkpoints: bool,

    /// Record an empty page instead of aborting when a page's model call
    /// fails after retries. Default: true.
    pub skip_failed_pages: bool,

    /// Handling of an existing matching checkpoint. Default: [`ResumePolicy::Resume`].
    pub resume: ResumePolicy,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Receives per-page and per-phase events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            password: None,
            extraction_prompt: None,
            resolve_references: true,
            enable_checkpoints: true,
            skip_failed_pages: true,
            resume: ResumePolicy::default(),
            download_timeout_secs: 120,
            api_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("extraction_prompt", &self.extraction_prompt.as_ref().map(|p| p.len()))
            .field("resolve_references", &self.resolve_references)
            .field("enable_checkpoints", &self.enable_checkpoints)
            .field("skip_failed_pages", &self.skip_failed_pages)
            .field("resume", &self.resume)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn resolve_references(mut self, v: bool) -> Self {
        self.config.resolve_references = v;
        self
    }

    pub fn enable_checkpoints(mut self, v: bool) -> Self {
        self.config.enable_checkpoints = v;
        self
    }

    pub fn skip_failed_pages(mut self, v: bool) -> Self {
        self.config.skip_failed_pages = v;
        self
    }

    pub fn resume(mut self, policy: ResumePolicy) -> Self {
        self.config.resume = policy;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, QaError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(QaError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(QaError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(QaError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if let Some(prompt) = &c.extraction_prompt {
            if prompt.trim().is_empty() {
                return Err(QaError::InvalidConfig(
                    "extraction prompt must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.dpi, 150);
        assert!(c.resolve_references);
        assert!(c.enable_checkpoints);
        assert!(c.skip_failed_pages);
        assert_eq!(c.resume, ResumePolicy::Resume);
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = ExtractionConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
        let c = ExtractionConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, QaError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_blank_prompt() {
        assert!(ExtractionConfig::builder()
            .extraction_prompt("   ")
            .build()
            .is_err());
    }

    #[test]
    fn debug_hides_provider_and_prompt_text() {
        let c = ExtractionConfig::builder()
            .extraction_prompt("secret prompt body")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret prompt body"));
        assert!(dbg.contains("ExtractionConfig"));
    }
}
