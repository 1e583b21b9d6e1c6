//! `web_fetch` — reads the full content of a web page. Free per
//! `original_source/bot/core/tools/cost_estimator.py`'s comment ("server-side,
//! no external API") — unlike `web_search`, this is a plain outbound GET this
//! workspace makes directly rather than a provider-managed server tool.

use async_trait::async_trait;
use serde_json::Value;

use crate::registry::{Tool, ToolContext, ToolResult};

const MAX_RESPONSE_CHARS: usize = 50_000;

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch the text content of a web page by URL."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch" },
            },
            "required": ["url"],
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext<'_>) -> ToolResult {
        let Some(url) = input.get("url").and_then(Value::as_str) else {
            return ToolResult::error("missing required param: url");
        };

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return ToolResult::error(format!("unsupported URL scheme: {url}"));
        }

        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(mut text) => {
                    if text.len() > MAX_RESPONSE_CHARS {
                        text.truncate(MAX_RESPONSE_CHARS);
                        text.push_str("\n[truncated]");
                    }
                    ToolResult::success(text)
                }
                Err(e) => ToolResult::error(format!("web_fetch body read failed: {e}")),
            },
            Ok(resp) => ToolResult::error(format!("web_fetch: {} returned {}", url, resp.status())),
            Err(e) => ToolResult::error(format!("web_fetch request failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::UserId;
    use relay_store::Store;

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let store = Store::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let tool = WebFetchTool::new(reqwest::Client::new());
        let result = tool.execute(serde_json::json!({"url": "file:///etc/passwd"}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn missing_url_is_error() {
        let store = Store::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let tool = WebFetchTool::new(reqwest::Client::new());
        let result = tool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }
}
