//! `PlatformRenderer` implementation for Telegram — the only
//! platform-specific pieces the Display Manager needs: MarkdownV2 escaping,
//! the 4096-character message cap, and the teloxide calls that actually
//! send/edit/deliver a message. Splitting and throttling policy live in
//! `relay_agent::display::Display`; this module only renders what it's
//! handed.
//!
//! Grounded on the teacher's `skynet-telegram::send::{split_chunks_smart,
//! escape_markdown_v2}` — the escape table is lifted verbatim; the chunking
//! constant (4090) is kept as `max_chunk_len()` instead of a private
//! `CHUNK_MAX`, since the Display Manager owns the split now.

use std::sync::Mutex;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ParseMode};
use tracing::warn;

use relay_core::RelayError;
use relay_agent::{FileDelivery, MessageHandle, PlatformRenderer};

/// Telegram's hard message limit is 4096 characters; 4090 leaves headroom
/// for the platform's own formatting overhead.
const CHUNK_MAX: usize = 4090;

/// One Telegram chat's renderer. Built fresh per inbound message — it only
/// needs the `Bot` handle and the destination `ChatId`.
pub struct TelegramRenderer {
    bot: Bot,
    chat_id: ChatId,
    /// teloxide needs the numeric `MessageId` to edit a message in place;
    /// `MessageHandle` only carries an opaque string, so edits resolve
    /// through this side table instead of parsing it back out.
    sent_ids: Mutex<Vec<MessageId>>,
}

impl TelegramRenderer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self {
            bot,
            chat_id,
            sent_ids: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl PlatformRenderer for TelegramRenderer {
    fn max_chunk_len(&self) -> usize {
        CHUNK_MAX
    }

    fn escape(&self, text: &str) -> String {
        escape_markdown_v2(text)
    }

    async fn send(&self, text: &str) -> Result<MessageHandle, RelayError> {
        let sent = self
            .bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::MarkdownV2)
            .await;

        let message = match sent {
            Ok(m) => m,
            Err(_) => {
                // MarkdownV2 rejected (e.g. an escape slipped through) — retry plain.
                self.bot
                    .send_message(self.chat_id, text)
                    .await
                    .map_err(|e| RelayError::Channel { channel: "telegram".into(), reason: e.to_string() })?
            }
        };

        self.sent_ids.lock().unwrap().push(message.id);
        Ok(MessageHandle(message.id.0.to_string()))
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), RelayError> {
        let raw_id: i32 = handle
            .0
            .parse()
            .map_err(|_| RelayError::Channel { channel: "telegram".into(), reason: "bad message handle".into() })?;
        let message_id = MessageId(raw_id);

        let result = self
            .bot
            .edit_message_text(self.chat_id, message_id, text)
            .parse_mode(ParseMode::MarkdownV2)
            .await;

        if result.is_err() {
            self.bot
                .edit_message_text(self.chat_id, message_id, text)
                .await
                .map_err(|e| RelayError::Channel { channel: "telegram".into(), reason: e.to_string() })?;
        }
        Ok(())
    }

    async fn send_file(&self, delivery: &FileDelivery) -> Result<(), RelayError> {
        let file = InputFile::memory(delivery.content_bytes.clone()).file_name(delivery.filename.clone());
        if delivery.mime.starts_with("image/") {
            self.bot
                .send_photo(self.chat_id, file)
                .await
                .map_err(|e| RelayError::Channel { channel: "telegram".into(), reason: e.to_string() })?;
        } else {
            self.bot
                .send_document(self.chat_id, file)
                .await
                .map_err(|e| RelayError::Channel { channel: "telegram".into(), reason: e.to_string() })?;
        }
        Ok(())
    }

    async fn show_action(&self, phase: &str) {
        let action = match phase {
            "upload_photo" => ChatAction::UploadPhoto,
            "upload_document" => ChatAction::UploadDocument,
            _ => ChatAction::Typing,
        };
        if let Err(e) = self.bot.send_chat_action(self.chat_id, action).await {
            warn!(error = %e, "Telegram: send_chat_action failed");
        }
    }
}

/// Escape special characters for Telegram MarkdownV2.
///
/// MarkdownV2 requires escaping: `_ * [ ] ( ) ~ \` # + - = | { } . !`
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|' | '{' | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_specials() {
        let input = "Hello. World! (test) [link] ~strike~";
        let escaped = escape_markdown_v2(input);
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\!"));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\)"));
        assert!(escaped.contains("\\["));
        assert!(escaped.contains("\\]"));
        assert!(escaped.contains("\\~"));
    }

    #[test]
    fn leaves_normal_chars() {
        let input = "Hello world 123 abc";
        assert_eq!(escape_markdown_v2(input), input);
    }
}
