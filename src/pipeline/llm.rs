//! Model interaction: the vision/text seams and their `edgequake-llm` client.
//!
//! The orchestrator and resolver depend only on [`VisionModel`] and
//! [`TextModel`]. [`LlmClient`] implements both over any
//! [`edgequake_llm::LLMProvider`] and owns every transport concern: per-call
//! timeout, retry with backoff, credential-error classification and token
//! accounting. Prompt text lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent on long runs.
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`) with a 500 ms base
//! and 3 retries waits 500 ms → 1 s → 2 s before giving up on a call.
//! Rejected credentials (401/403) are never retried: every later call would
//! fail the same way, so they surface at once as [`QaError::AuthError`].

use crate::config::ExtractionConfig;
use crate::error::QaError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A 401/403 status next to "status", "HTTP" or "code", or followed by its
/// reason phrase. Bare digits elsewhere (request ids, delays) never match.
static RE_AUTH_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:status|http|code)\b[\s:=/]*(?:code[\s:=]*)?40[13]\b|\b40[13]\s+(?:unauthorized|forbidden)\b",
    )
    .unwrap()
});

/// Image + prompt → text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn read_image(&self, image: ImageData, prompt: &str) -> Result<String, QaError>;
}

/// Prompt → text.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, QaError>;
}

/// Token totals across every call made by one [`LlmClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// [`VisionModel`] and [`TextModel`] over an `edgequake-llm` provider.
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    provider_label: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout: Duration,
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl LlmClient {
    /// Wrap `provider` with the call settings from `config`.
    ///
    /// `provider_label` names the provider in auth errors and in the output
    /// metadata.
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        provider_label: impl Into<String>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            provider,
            provider_label: provider_label.into(),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout: Duration::from_secs(config.api_timeout_secs),
            calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn provider_label(&self) -> &str {
        &self.provider_label
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }

    /// Send `messages`, retrying transient failures.
    async fn chat_with_retry(
        &self,
        messages: &[ChatMessage],
        context: &str,
    ) -> Result<String, QaError> {
        let start = Instant::now();
        let mut last_err: Option<QaError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    context, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.api_timeout, self.provider.chat(messages, Some(&self.options))).await
            {
                Ok(Ok(response)) => {
                    self.calls.fetch_add(1, Ordering::Relaxed);
                    self.input_tokens
                        .fetch_add(response.prompt_tokens as u64, Ordering::Relaxed);
                    self.output_tokens
                        .fetch_add(response.completion_tokens as u64, Ordering::Relaxed);
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        context,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    let detail = e.to_string();
                    if is_auth_failure(&e) {
                        return Err(QaError::AuthError {
                            provider: self.provider_label.clone(),
                            detail,
                        });
                    }
                    warn!("{}: attempt {} failed: {}", context, attempt + 1, detail);
                    last_err = Some(QaError::LlmApiError { message: detail });
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        context,
                        attempt + 1,
                        self.api_timeout.as_secs()
                    );
                    last_err = Some(QaError::ApiTimeout {
                        context: context.to_string(),
                        elapsed_ms: self.api_timeout.as_millis() as u64,
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| QaError::LlmApiError {
            message: format!("{context}: no attempt was made"),
        }))
    }
}

#[async_trait]
impl VisionModel for LlmClient {
    /// The prompt goes in the system turn; the user turn carries only the
    /// page image, which holds all the content.
    async fn read_image(&self, image: ImageData, prompt: &str) -> Result<String, QaError> {
        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images("", vec![image]),
        ];
        self.chat_with_retry(&messages, "vision call").await
    }
}

#[async_trait]
impl TextModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, QaError> {
        let messages = vec![ChatMessage::user(prompt)];
        self.chat_with_retry(&messages, "text call").await
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Delay before retry number `attempt` (1-based), saturating on overflow.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

/// Whether a provider error means the credentials were rejected.
fn is_auth_failure(err: &LlmError) -> bool {
    match err {
        LlmError::AuthError(_) => true,
        LlmError::ApiError(msg) | LlmError::ProviderError(msg) | LlmError::Unknown(msg) => {
            is_auth_message(msg)
        }
        _ => false,
    }
}

/// Untyped provider messages that still say the key was rejected.
fn is_auth_message(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    RE_AUTH_STATUS.is_match(detail)
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("invalid_api_key")
        || lower.contains("authentication")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[test]
    fn auth_failures_are_recognised() {
        assert!(is_auth_failure(&LlmError::AuthError("bad key".into())));
        assert!(is_auth_message("HTTP 401 Unauthorized"));
        assert!(is_auth_message("status 403: forbidden"));
        assert!(is_auth_message("status code: 401"));
        assert!(is_auth_message("Invalid API key provided"));
        assert!(is_auth_message("authentication_error: bad token"));
        assert!(is_auth_failure(&LlmError::ApiError("HTTP 401 Unauthorized".into())));
    }

    #[test]
    fn transient_errors_with_stray_digits_are_not_auth() {
        assert!(!is_auth_message("HTTP 429 Too Many Requests: rate limit reached, retry after 4015ms"));
        assert!(!is_auth_message("503 Service Unavailable (request id req_4031a9)"));
        assert!(!is_auth_message("used 1401 tokens, limit 4030"));
        assert!(!is_auth_failure(&LlmError::RateLimited("retry after 401s".into())));
        assert!(!is_auth_failure(&LlmError::Timeout));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 64), u64::MAX);
        assert_eq!(backoff_ms(500, u32::MAX), u64::MAX);
    }
}
