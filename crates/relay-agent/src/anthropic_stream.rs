//! SSE stream processor for the Anthropic Messages API, extended from the
//! teacher's `skynet-agent::anthropic_stream` with cache-token accounting,
//! thinking-block signature capture, and cooperative cancellation.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use serde::Deserialize;

use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Parse an Anthropic streaming response body and emit `StreamEvent`s.
/// Returns once the stream ends, the connection drops, or `cancel` fires —
/// cancellation is checked once per chunk, matching the orchestrator's
/// "every suspension point" rule (`spec.md` §5).
pub async fn process_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) {
    use futures_util::StreamExt;

    let mut st = StreamState::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("anthropic stream cancelled");
                return;
            }
            next = byte_stream.next() => next,
        };

        let chunk = match chunk {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                return;
            }
            None => break,
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(parsed) = parse_sse_line(line) {
                match parsed {
                    SseParsed::Event(ev) => st.current_event = ev,
                    SseParsed::Data(data) => {
                        if let Some(event) = st.handle_data(&data) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Done {
            model: st.model,
            tokens_in: st.tokens_in,
            tokens_out: st.tokens_out,
            cache_read_tokens: st.cache_read_tokens,
            cache_write_tokens: st.cache_write_tokens,
            stop_reason: st.stop_reason,
        })
        .await;
}

#[derive(Default)]
struct StreamState {
    current_event: String,
    current_block_type: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    thinking_text: String,
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    cache_read_tokens: u32,
    cache_write_tokens: u32,
    stop_reason: String,
}

impl StreamState {
    fn handle_data(&mut self, data: &str) -> Option<StreamEvent> {
        match self.current_event.as_str() {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                    self.model = msg.message.model;
                    self.tokens_in = msg.message.usage.input_tokens;
                    self.cache_read_tokens = msg.message.usage.cache_read_input_tokens.unwrap_or(0);
                    self.cache_write_tokens =
                        msg.message.usage.cache_creation_input_tokens.unwrap_or(0);
                }
                None
            }

            "content_block_start" => {
                if let Ok(block_start) = serde_json::from_str::<ContentBlockStart>(data) {
                    self.current_block_type = block_start.content_block.block_type.clone();
                    if block_start.content_block.block_type == "tool_use" {
                        self.tool_use_id = block_start.content_block.id.unwrap_or_default();
                        self.tool_use_name = block_start.content_block.name.unwrap_or_default();
                        self.tool_use_input_json.clear();
                    }
                    if block_start.content_block.block_type == "thinking" {
                        self.thinking_text.clear();
                    }
                }
                None
            }

            "content_block_delta" => {
                let delta = serde_json::from_str::<ContentBlockDelta>(data).ok()?;
                match delta.delta.delta_type.as_str() {
                    "text_delta" => delta.delta.text.map(|text| StreamEvent::TextDelta { text }),
                    "thinking_delta" => {
                        let text = delta.delta.thinking?;
                        self.thinking_text.push_str(&text);
                        Some(StreamEvent::Thinking { text })
                    }
                    "signature_delta" => {
                        // Closes the thinking block with its verification signature.
                        let signature = delta.delta.signature.unwrap_or_default();
                        Some(StreamEvent::ThinkingDone {
                            text: std::mem::take(&mut self.thinking_text),
                            signature,
                        })
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            self.tool_use_input_json.push_str(&partial);
                        }
                        None
                    }
                    other => {
                        debug!(delta_type = other, "unhandled delta type");
                        None
                    }
                }
            }

            "content_block_stop" => {
                if self.current_block_type == "tool_use" {
                    let input = serde_json::from_str::<serde_json::Value>(
                        self.tool_use_input_json.as_str(),
                    )
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                    let event = StreamEvent::ToolUse {
                        id: std::mem::take(&mut self.tool_use_id),
                        name: std::mem::take(&mut self.tool_use_name),
                        input,
                    };
                    self.tool_use_input_json.clear();
                    self.current_block_type.clear();
                    return Some(event);
                }
                self.current_block_type.clear();
                None
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                    self.tokens_out = delta.usage.output_tokens;
                    if let Some(reason) = delta.delta.stop_reason {
                        self.stop_reason = reason;
                    }
                }
                None
            }

            "context_management" => {
                serde_json::from_str::<ContextManagement>(data)
                    .ok()
                    .map(|cm| StreamEvent::Compaction { summary: cm.summary })
            }

            "error" => {
                warn!(data, "anthropic stream error");
                Some(StreamEvent::Error { message: data.to_string() })
            }

            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    thinking: Option<String>,
    signature: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ContextManagement {
    summary: String,
}
