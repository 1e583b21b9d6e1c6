//! `deep_think` — lets the model request a bounded extended-thinking pass on
//! a sub-problem and fold the reasoning back into its main response.
//!
//! Grounded on `original_source/bot/core/tools/extended_think.py` /
//! `extended_thinking.py`: "Uses CURRENT user's model ... No balance
//! requirement (included in normal usage) ... Returns reasoning for Claude
//! to incorporate into response." Unlike `self_critique` this makes one
//! single-turn call with no tools of its own — it is not PAID (per
//! `cost_estimator.py`, `deep_think`'s token cost rides on the surrounding
//! message's accounting, same as the teacher charges for any other
//! follow-up completion).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::prompt::SystemPrompt;
use crate::provider::{ChatRequest, LlmProvider};
use crate::registry::{Tool, ToolContext, ToolResult};
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

pub struct ExtendedThinkingTool {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ExtendedThinkingTool {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

#[async_trait]
impl Tool for ExtendedThinkingTool {
    fn name(&self) -> &str {
        "deep_think"
    }

    fn description(&self) -> &str {
        "Reason deeply about a specific sub-problem before continuing the response. \
         Use for complex reasoning steps the default response pace would rush."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "problem": { "type": "string", "description": "The sub-problem to think through" },
            },
            "required": ["problem"],
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext<'_>) -> ToolResult {
        let Some(problem) = input.get("problem").and_then(Value::as_str) else {
            return ToolResult::error("missing required param: problem");
        };

        let req = ChatRequest {
            model: self.model.clone(),
            system_prompt: SystemPrompt {
                global: "Think step by step about the following problem.".to_string(),
                custom: None,
                files_context: None,
                custom_cacheable: false,
            },
            raw_messages: vec![serde_json::json!({
                "role": "user",
                "content": [{ "type": "text", "text": problem }],
            })],
            max_tokens: 4096,
            thinking: Some(ThinkingLevel::High),
            tools: Vec::new(),
        };

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        if let Err(e) = self.provider.stream(&req, tx, &cancel).await {
            return ToolResult::error(format!("deep_think failed: {e}"));
        }

        let mut reasoning = String::new();
        let mut answer = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Thinking { text } => reasoning.push_str(&text),
                StreamEvent::TextDelta { text } => answer.push_str(&text),
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => return ToolResult::error(message),
                _ => {}
            }
        }

        let combined = if reasoning.is_empty() {
            answer
        } else {
            format!("{reasoning}\n\n{answer}")
        };
        ToolResult::success(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::UserId;
    use relay_store::Store;

    #[tokio::test]
    async fn missing_problem_is_error() {
        struct Noop;
        #[async_trait]
        impl LlmProvider for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            async fn stream(
                &self,
                _req: &ChatRequest,
                _tx: mpsc::Sender<StreamEvent>,
                _cancel: &CancellationToken,
            ) -> Result<(), crate::provider::ProviderError> {
                Ok(())
            }
        }
        let tool = ExtendedThinkingTool::new(Arc::new(Noop), "claude-sonnet-4-6");
        let store = Store::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let result = tool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }
}
