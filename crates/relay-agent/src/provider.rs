//! Narrow capability set every LLM provider implements — `spec.md` §9's
//! "model as a narrow capability set" re-architecture guidance applied to
//! the teacher's `LlmProvider` trait.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::prompt::SystemPrompt;
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

/// Tool definition sent to the provider as part of the request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One turn's worth of request state. `raw_messages` carries the full
/// Anthropic-shaped content-block array (including prior `tool_use` /
/// `tool_result` blocks and re-emitted thinking blocks) — it is always set
/// by the Prompt Composer; `ChatRequest` has no separate plain-message path.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: SystemPrompt,
    pub raw_messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub thinking: Option<ThinkingLevel>,
    pub tools: Vec<ToolDefinition>,
}

/// Common interface for all LLM providers. Concrete providers are tagged
/// variants behind this trait rather than a class hierarchy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Stream one turn's events through `tx`. Must observe `cancel` at
    /// every suspension point (the event-read loop) and stop promptly,
    /// sending nothing further once it fires.
    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;

    /// Cheap token-count estimate for cache-tier sizing (§4.D). Does not
    /// need to match the provider's tokenizer exactly — only needs to be
    /// stable enough to decide whether a block clears `cache_min_tokens`.
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() as u32).div_ceil(4)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context window exceeded")]
    ContextWindowExceeded,

    #[error("request refused by the model")]
    Refusal,

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures retried with exponential backoff by the
    /// orchestrator (§4.E). Provider-logic failures (context window,
    /// refusal) and malformed-stream parse errors are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Http(_) | ProviderError::RateLimited { .. }
        )
    }
}
