//! Prompt Composer (`spec.md` §4.D) — builds the multi-block system prompt
//! and the conversation content-block array handed to the provider.
//!
//! Three cache tiers exactly as the teacher's `skynet-agent::prompt::
//! SystemPrompt{static_tier,user_tier,volatile_tier}`, plus a fourth,
//! never-cached files-context block. Divergence from the teacher: the
//! teacher caches `user_tier` unconditionally whenever it's non-empty; here
//! it only receives a `cache_control` breakpoint when its estimated token
//! count clears `cache_min_tokens` — the cache-shaping invariant `spec.md`
//! §8 calls for.

use relay_store::{AttachmentRef, Message, TokenUsage, UserFile};

use crate::thinking::{reemit_thinking_blocks, ThinkingBlock};

/// The system prompt as an ordered list of blocks. Order is fixed — it is
/// also the provider's cache-key prefix, so block 1 never moves.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    /// Block 1: global system text. Always cacheable, identical for all
    /// users and sessions.
    pub global: String,
    /// Block 2: the user's custom personality text, if any. Cacheable only
    /// when its estimated size clears `cache_min_tokens`.
    pub custom: Option<String>,
    /// Block 3: the available-files-context listing. Never cacheable —
    /// changes on every request that has attachments in play.
    pub files_context: Option<String>,
    /// Whether block 2 is long enough to receive a cache breakpoint.
    pub custom_cacheable: bool,
}

impl SystemPrompt {
    /// Flatten to plain text, for providers without block-level caching.
    pub fn to_plain_text(&self) -> String {
        let mut out = self.global.clone();
        if let Some(c) = &self.custom {
            out.push_str("\n\n");
            out.push_str(c);
        }
        if let Some(f) = &self.files_context {
            out.push_str("\n\n");
            out.push_str(f);
        }
        out
    }

    /// Anthropic-shaped content blocks with `cache_control` breakpoints on
    /// block 1 always, block 2 only when `custom_cacheable`, block 3 never.
    pub fn to_anthropic_blocks(&self) -> Vec<serde_json::Value> {
        let mut blocks = Vec::with_capacity(3);

        blocks.push(serde_json::json!({
            "type": "text",
            "text": self.global,
            "cache_control": { "type": "ephemeral" },
        }));

        if let Some(c) = &self.custom {
            if self.custom_cacheable {
                blocks.push(serde_json::json!({
                    "type": "text",
                    "text": c,
                    "cache_control": { "type": "ephemeral" },
                }));
            } else {
                blocks.push(serde_json::json!({ "type": "text", "text": c }));
            }
        }

        if let Some(f) = &self.files_context {
            blocks.push(serde_json::json!({ "type": "text", "text": f }));
        }

        blocks
    }
}

/// Builds both the system prompt and the conversation array. `estimate_tokens`
/// is supplied by the caller (the configured `LlmProvider`) so the composer
/// stays provider-agnostic.
pub struct PromptComposer {
    pub cache_min_tokens: u32,
}

impl PromptComposer {
    pub fn new(cache_min_tokens: u32) -> Self {
        Self { cache_min_tokens }
    }

    pub fn build_system_prompt(
        &self,
        global: String,
        custom: Option<String>,
        files_context: Option<String>,
        estimate_tokens: impl Fn(&str) -> u32,
    ) -> SystemPrompt {
        let custom_cacheable = custom
            .as_deref()
            .map(|c| estimate_tokens(c) >= self.cache_min_tokens)
            .unwrap_or(false);
        SystemPrompt {
            global,
            custom,
            files_context,
            custom_cacheable,
        }
    }

    /// Render an available-files listing (system-prompt block 3) from the
    /// UserFiles currently attached to this thread's conversation.
    pub fn render_files_context(files: &[UserFile]) -> Option<String> {
        if files.is_empty() {
            return None;
        }
        let mut out = String::from("## Available files\n");
        for f in files {
            out.push_str(&format!(
                "- [{}] {} ({}){}\n",
                f.id,
                f.file_type,
                f.mime,
                f.upload_context
                    .as_ref()
                    .map(|c| format!(" — {c}"))
                    .unwrap_or_default(),
            ));
        }
        Some(out)
    }

    /// Build the provider-shaped conversation array: persisted messages in
    /// chronological order starting after the most recent compaction marker
    /// (inclusive of the summary itself), followed by the new batch's
    /// content blocks.
    ///
    /// `resolve_file` looks up a UserFile by id to build its file-reference
    /// block; attachments the resolver can't find are skipped rather than
    /// failing the whole turn.
    pub fn build_conversation(
        history: &[Message],
        batch_content: Vec<serde_json::Value>,
        resolve_file: impl Fn(i64) -> Option<UserFile>,
    ) -> Vec<serde_json::Value> {
        let start = compaction_start_index(history);
        let mut out = Vec::with_capacity(history.len() - start + 1);

        for (i, msg) in history.iter().enumerate().skip(start) {
            out.push(message_to_block(msg, i == start, &resolve_file));
        }

        if !batch_content.is_empty() {
            out.push(serde_json::json!({
                "role": "user",
                "content": batch_content,
            }));
        }

        out
    }
}

/// Index of the earliest message the conversation should include: the most
/// recent message carrying a `compaction_summary`, or 0 if none. Invariant
/// (`spec.md` §8 #9): no emitted message is dated earlier than this one.
fn compaction_start_index(history: &[Message]) -> usize {
    history
        .iter()
        .rposition(|m| m.compaction_summary.is_some())
        .unwrap_or(0)
}

fn message_to_block(
    msg: &Message,
    is_compaction_root: bool,
    resolve_file: &impl Fn(i64) -> Option<UserFile>,
) -> serde_json::Value {
    let role = msg.role.to_string();
    let text = if is_compaction_root {
        msg.compaction_summary.clone().unwrap_or(msg.content.clone())
    } else {
        msg.content.clone()
    };

    let mut content: Vec<serde_json::Value> = Vec::new();

    if let Some(thinking) = &msg.thinking {
        if let Ok(blocks) = serde_json::from_value::<Vec<ThinkingBlock>>(thinking.clone()) {
            content.extend(reemit_thinking_blocks(&blocks));
        }
    }

    if !text.is_empty() {
        content.push(serde_json::json!({ "type": "text", "text": text }));
    }

    if !is_compaction_root {
        content.extend(attachments_to_blocks(&msg.attachments, resolve_file));
    }

    serde_json::json!({ "role": role, "content": content })
}

fn attachments_to_blocks(
    attachments: &[AttachmentRef],
    resolve_file: &impl Fn(i64) -> Option<UserFile>,
) -> Vec<serde_json::Value> {
    attachments
        .iter()
        .filter_map(|a| resolve_file(a.user_file_id))
        .map(|f| {
            serde_json::json!({
                "type": "document",
                "source": { "type": "file", "file_id": f.blob_ref },
            })
        })
        .collect()
}

/// Estimate whether per-turn usage should be recorded — a no-op helper kept
/// alongside the composer since both live in the same request path.
pub fn usage_from_counts(
    input_tokens: u32,
    output_tokens: u32,
    cache_read_tokens: u32,
    cache_write_tokens: u32,
) -> TokenUsage {
    TokenUsage {
        input_tokens,
        output_tokens,
        cache_read_tokens,
        cache_write_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Role;

    fn msg(id: i64, role: Role, content: &str, compaction: Option<&str>) -> Message {
        Message {
            id,
            thread_id: 1,
            role,
            content: content.to_string(),
            attachments: vec![],
            thinking: None,
            token_usage: None,
            compaction_summary: compaction.map(str::to_string),
            created_at: format!("2026-01-0{id}T00:00:00Z"),
        }
    }

    #[test]
    fn cacheable_only_above_threshold() {
        let composer = PromptComposer::new(1024);
        let short = composer.build_system_prompt(
            "global".into(),
            Some("short custom prompt".into()),
            None,
            |s| (s.len() as u32) / 4,
        );
        assert!(!short.custom_cacheable);

        let long = composer.build_system_prompt(
            "global".into(),
            Some("x".repeat(8000)),
            None,
            |s| (s.len() as u32) / 4,
        );
        assert!(long.custom_cacheable);
    }

    #[test]
    fn global_block_always_has_cache_control() {
        let composer = PromptComposer::new(1024);
        let prompt = composer.build_system_prompt("global".into(), None, None, |_| 0);
        let blocks = prompt.to_anthropic_blocks();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0]["cache_control"].is_object());
    }

    #[test]
    fn files_context_block_never_cached() {
        let composer = PromptComposer::new(1024);
        let prompt = composer.build_system_prompt(
            "global".into(),
            None,
            Some("## Available files\n".into()),
            |_| 0,
        );
        let blocks = prompt.to_anthropic_blocks();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1]["cache_control"].is_null());
    }

    #[test]
    fn conversation_skips_messages_before_compaction() {
        let history = vec![
            msg(1, Role::User, "first", None),
            msg(2, Role::Assistant, "reply", None),
            msg(3, Role::User, "second", None),
            msg(4, Role::Assistant, "compacted summary text", Some("compacted summary text")),
            msg(5, Role::User, "after compaction", None),
        ];
        let conv = PromptComposer::build_conversation(&history, vec![], |_| None);
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[0]["role"], "assistant");
        assert_eq!(conv[1]["role"], "user");
    }

    #[test]
    fn conversation_includes_everything_without_compaction() {
        let history = vec![
            msg(1, Role::User, "first", None),
            msg(2, Role::Assistant, "reply", None),
        ];
        let conv = PromptComposer::build_conversation(&history, vec![], |_| None);
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn new_batch_content_appended_last() {
        let history = vec![msg(1, Role::User, "first", None)];
        let batch = vec![serde_json::json!({ "type": "text", "text": "second turn" })];
        let conv = PromptComposer::build_conversation(&history, batch, |_| None);
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[1]["role"], "user");
    }
}
