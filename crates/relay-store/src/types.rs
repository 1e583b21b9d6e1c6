use relay_core::{ChatId, FileKind, FileSource, Role, TopicId, UserId};
use serde::{Deserialize, Serialize};

/// A persisted conversational Thread: `(chat_id, user_id, topic_id?)`
/// identity, owning an ordered list of Messages. Never deleted by the core —
/// only ever marked cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub cleared: bool,
    pub model_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Reference to a file attached to a message — resolved against
/// `UserFile` rows at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub user_file_id: i64,
}

/// Per-turn token-usage record, carried alongside a Message so Cost &
/// Billing can reconstruct historical spend without re-querying the
/// provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

/// A persisted turn. Created once per turn, never mutated except for
/// edit-tracking (`content` may be rewritten when the user edits a sent
/// message; everything else is immutable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: i64,
    pub role: Role,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
    /// Serialized thinking-block list, opaque to the store, carried verbatim
    /// turn to turn so the provider can verify signature continuity.
    pub thinking: Option<serde_json::Value>,
    pub token_usage: Option<TokenUsage>,
    /// If set, the Prompt Composer starts the conversation array at this
    /// message and ignores everything earlier.
    pub compaction_summary: Option<String>,
    pub created_at: String,
}

/// Handle to an externally hosted blob (the provider's file store). Files
/// are ephemeral — `expires_at` tracks when the upstream blob expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFile {
    pub id: i64,
    pub owner_thread_id: i64,
    pub file_type: FileKind,
    pub blob_ref: String,
    pub mime: String,
    pub expires_at: Option<String>,
    pub upload_context: Option<String>,
    pub source: FileSource,
    pub created_at: String,
}

/// Audit row for a single tool invocation, written by Cost & Billing inside
/// the same transaction as the balance debit. Field-for-field match with the
/// original bot's `tool_calls` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: i64,
    pub thread_id: i64,
    pub message_id: Option<i64>,
    pub user_id: UserId,
    pub operation_id: String,
    pub tool_name: String,
    pub model_id: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
    pub cost_usd: f64,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// Current spendable balance for a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub credits_usd: f64,
}
