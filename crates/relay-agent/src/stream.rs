/// Events emitted during LLM streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental visible text content from the model.
    TextDelta { text: String },

    /// Incremental extended-thinking content. Surfaced to the Display
    /// Manager as a collapsible block — never folded into the visible
    /// response text.
    Thinking { text: String },

    /// A complete thinking block, closed out with its signature. Persisted
    /// verbatim to the Message's `thinking` column and re-sent unchanged on
    /// the next turn — the API rejects a thinking block whose signature
    /// doesn't match its text.
    ThinkingDone { text: String, signature: String },

    /// Model wants to call a tool.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The provider compacted the conversation and returned a summary that
    /// supersedes everything before it. Stored on the assistant message;
    /// future conversation builds start at that message.
    Compaction { summary: String },

    /// Stream completed successfully.
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
        cache_read_tokens: u32,
        cache_write_tokens: u32,
        stop_reason: String,
    },

    /// Error during streaming.
    Error { message: String },
}

/// Parse a single SSE line from Anthropic's streaming API.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}
