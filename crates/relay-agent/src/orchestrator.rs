//! Streaming Orchestrator (`spec.md` §4.E) — drives the bounded tool-use
//! loop against the provider, multiplexing streamed events into the Display
//! and dispatching tools through the registry.
//!
//! Grounded on the teacher's `skynet-agent::tools::tool_loop::run_tool_loop`,
//! generalized from a non-streaming `provider.send()`/`ChatResponse` loop to
//! one that streams through `Display` as events arrive, and threads a
//! `CancellationToken` the teacher's loop never accepted even though its own
//! caller tried to pass one — version skew in the reference material that
//! this orchestrator resolves by actually wiring cancellation through.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{RelayError, UserId};
use relay_store::TokenUsage;

use crate::billing::Billing;
use crate::display::{BlockKind, Display};
use crate::prompt::SystemPrompt;
use crate::provider::{ChatRequest, LlmProvider, ProviderError};
use crate::registry::{ToolContext, ToolRegistry};
use crate::stream::StreamEvent;
use crate::thinking::{ThinkingBlock, ThinkingLevel};

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    StopCommand,
    NewMessage,
    MaxIterations,
    Error,
}

pub struct StreamResult {
    pub final_text: String,
    pub thinking_blocks: Vec<ThinkingBlock>,
    pub usage: TokenUsage,
    pub stop_reason: String,
    pub was_cancelled: bool,
    pub cancellation_reason: Option<CancellationReason>,
    pub tool_call_count: u32,
}

#[allow(clippy::too_many_arguments)]
pub struct OrchestratorRequest<'a> {
    pub provider: &'a dyn LlmProvider,
    pub registry: &'a ToolRegistry,
    pub billing: &'a Billing<'a>,
    pub model: String,
    pub system_prompt: SystemPrompt,
    pub raw_messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub thinking: Option<ThinkingLevel>,
    pub max_iterations: u32,
    pub thread_id: i64,
    pub message_id: Option<i64>,
    pub user_id: UserId,
}

/// Run the bounded tool-use loop, rendering through `display` as events
/// arrive. Returns once the model stops requesting tools, the iteration
/// bound is hit, or `cancel` fires.
pub async fn run(
    req: OrchestratorRequest<'_>,
    display: &mut Display<'_>,
    cancel: &CancellationToken,
) -> Result<StreamResult, RelayError> {
    let mut raw_messages = req.raw_messages;
    let mut usage = TokenUsage::default();
    let mut stop_reason = String::new();
    let mut thinking_blocks: Vec<ThinkingBlock> = Vec::new();
    let mut tool_call_count: u32 = 0;
    let ctx = ToolContext { thread_id: req.thread_id, user_id: req.user_id, store: req.billing.store() };

    for iteration in 0..req.max_iterations {
        if cancel.is_cancelled() {
            return Ok(finish_cancelled(display, thinking_blocks, usage, CancellationReason::StopCommand).await);
        }

        debug!(iteration, "orchestrator iteration");

        let chat_req = ChatRequest {
            model: req.model.clone(),
            system_prompt: req.system_prompt.clone(),
            raw_messages: raw_messages.clone(),
            max_tokens: req.max_tokens,
            thinking: req.thinking,
            tools: req.registry.definitions(),
        };

        let events = match stream_with_retry(req.provider, &chat_req, cancel).await {
            Ok(events) => events,
            Err(ProviderError::Cancelled) => {
                return Ok(finish_cancelled(display, thinking_blocks, usage, CancellationReason::StopCommand).await);
            }
            Err(ProviderError::ContextWindowExceeded) => {
                return Err(RelayError::LlmProvider("context window exceeded".into()));
            }
            Err(ProviderError::Refusal) => {
                return Err(RelayError::LlmProvider("request refused by the model".into()));
            }
            Err(e) => return Err(RelayError::LlmProvider(e.to_string())),
        };

        let mut tool_uses: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut assistant_text = String::new();
        let mut pending_thinking: Vec<ThinkingBlock> = Vec::new();

        for event in events {
            if cancel.is_cancelled() {
                return Ok(finish_cancelled(display, thinking_blocks, usage, CancellationReason::StopCommand).await);
            }
            match event {
                StreamEvent::TextDelta { text } => {
                    assistant_text.push_str(&text);
                    display.append(BlockKind::Text, &text);
                    display.maybe_flush().await;
                }
                StreamEvent::Thinking { text } => {
                    display.append(BlockKind::Thinking, &text);
                    display.maybe_flush().await;
                }
                StreamEvent::ThinkingDone { text, signature } => {
                    pending_thinking.push(ThinkingBlock { text, signature });
                }
                StreamEvent::ToolUse { id, name, input } => {
                    tool_uses.push((id, name, input));
                }
                StreamEvent::Compaction { summary } => {
                    info!(%summary, "conversation compacted by provider");
                }
                StreamEvent::Done {
                    tokens_in,
                    tokens_out,
                    cache_read_tokens,
                    cache_write_tokens,
                    stop_reason: sr,
                    ..
                } => {
                    usage.input_tokens += tokens_in;
                    usage.output_tokens += tokens_out;
                    usage.cache_read_tokens += cache_read_tokens;
                    usage.cache_write_tokens += cache_write_tokens;
                    stop_reason = sr;
                }
                StreamEvent::Error { message } => {
                    return Err(RelayError::LlmProvider(message));
                }
            }
        }

        thinking_blocks.extend(pending_thinking.iter().cloned());

        if tool_uses.is_empty() || stop_reason != "tool_use" {
            display.commit().await;
            display.flush_deferred_files().await;
            return Ok(StreamResult {
                final_text: display.final_text(),
                thinking_blocks,
                usage,
                stop_reason,
                was_cancelled: false,
                cancellation_reason: None,
                tool_call_count,
            });
        }

        // Append the assistant turn: re-emitted thinking blocks, text, then tool_use blocks.
        let mut assistant_content: Vec<serde_json::Value> =
            crate::thinking::reemit_thinking_blocks(&pending_thinking);
        if !assistant_text.is_empty() {
            assistant_content.push(serde_json::json!({ "type": "text", "text": assistant_text }));
        }
        for (id, name, input) in &tool_uses {
            assistant_content.push(serde_json::json!({
                "type": "tool_use", "id": id, "name": name, "input": input,
            }));
        }
        raw_messages.push(serde_json::json!({ "role": "assistant", "content": assistant_content }));

        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();

        for (id, name, input) in &tool_uses {
            if cancel.is_cancelled() {
                return Ok(finish_cancelled(display, thinking_blocks, usage, CancellationReason::StopCommand).await);
            }

            tool_call_count += 1;
            let mut result = dispatch_tool(&req, &ctx, id, name, input.clone()).await;

            if let Some(file) = result.file_delivery.take() {
                let split = file.deliver_before_response;
                if split {
                    display.commit().await;
                }
                display.deliver_file(file).await;
                if split {
                    display.clear();
                }
            }

            tool_result_content.push(result.to_provider_block(id));
        }

        raw_messages.push(serde_json::json!({ "role": "user", "content": tool_result_content }));

        if iteration + 1 == req.max_iterations {
            display.append(BlockKind::Text, "\n\n_[reached maximum tool-use iterations]_");
            display.commit().await;
            display.flush_deferred_files().await;
            return Ok(StreamResult {
                final_text: display.final_text(),
                thinking_blocks,
                usage,
                stop_reason: "max_iterations".to_string(),
                was_cancelled: true,
                cancellation_reason: Some(CancellationReason::MaxIterations),
                tool_call_count,
            });
        }
    }

    display.commit().await;
    display.flush_deferred_files().await;
    Ok(StreamResult {
        final_text: display.final_text(),
        thinking_blocks,
        usage,
        stop_reason: "max_iterations".to_string(),
        was_cancelled: true,
        cancellation_reason: Some(CancellationReason::MaxIterations),
        tool_call_count,
    })
}

async fn dispatch_tool(
    req: &OrchestratorRequest<'_>,
    ctx: &ToolContext<'_>,
    tool_use_id: &str,
    name: &str,
    input: serde_json::Value,
) -> crate::registry::ToolResult {
    let Some(config) = req.registry.get(name) else {
        return crate::registry::ToolResult::error(format!("unknown tool: {name}"));
    };

    if config.paid {
        let affordable = req.billing.can_afford(req.user_id).unwrap_or(false);
        let clears_floor = config.min_balance_usd <= 0.0
            || req
                .billing
                .store()
                .get_balance(req.user_id)
                .map(|b| b.credits_usd >= config.min_balance_usd)
                .unwrap_or(false);
        if !affordable || !clears_floor {
            return crate::registry::ToolResult::error("insufficient_balance");
        }
    }

    let started = std::time::Instant::now();
    let result = config.tool.execute(input.clone(), ctx).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    if config.paid {
        let cost = config.cost_estimator.estimate(&input).unwrap_or(0.0);
        if let Err(e) = req.billing.record_tool_call(
            req.thread_id,
            req.message_id,
            req.user_id,
            tool_use_id,
            name,
            &req.model,
            TokenUsage::default(),
            cost,
            Some(duration_ms),
            !result.is_error,
            if result.is_error { Some(result.content.as_str()) } else { None },
        ) {
            warn!(error = %e, tool = name, "failed to record tool call");
        }
    }

    result
}

async fn finish_cancelled(
    display: &mut Display<'_>,
    thinking_blocks: Vec<ThinkingBlock>,
    usage: TokenUsage,
    reason: CancellationReason,
) -> StreamResult {
    display.append_interrupted_marker();
    display.commit().await;
    display.flush_deferred_files().await;
    StreamResult {
        final_text: display.final_text(),
        thinking_blocks,
        usage,
        stop_reason: "cancelled".to_string(),
        was_cancelled: true,
        cancellation_reason: Some(reason),
        tool_call_count: 0,
    }
}

/// Stream one turn, retrying transient provider errors with exponential
/// backoff (base 1s, cap 10s, 3 attempts) per `spec.md` §4.E. Collects the
/// whole event sequence into memory rather than re-streaming to the Display
/// live per attempt, so a retry never double-renders a partial response.
async fn stream_with_retry(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    cancel: &CancellationToken,
) -> Result<Vec<StreamEvent>, ProviderError> {
    let mut attempt = 0;
    loop {
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let result = provider.stream(req, tx, cancel).await;
        // `provider.stream` has already returned by this point, which drops
        // its `tx` — every event it sent is already buffered, so draining
        // here never blocks on the provider itself.
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        match result {
            Ok(()) => return Ok(events),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = retry_after(&e).unwrap_or_else(|| backoff_delay(attempt));
                warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying provider call");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn retry_after(err: &ProviderError) -> Option<Duration> {
    match err {
        ProviderError::RateLimited { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
        _ => None,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let millis = RETRY_BASE_DELAY.as_millis() as u64 * 2u64.pow(attempt.saturating_sub(1));
    Duration::from_millis(millis).min(RETRY_MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_max_delay() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(10), RETRY_MAX_DELAY);
    }
}
