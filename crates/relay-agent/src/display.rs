//! Display Manager (`spec.md` §4.F) — the incremental user-visible message.
//!
//! Generalizes the teacher's `skynet-telegram::send::{split_chunks_smart,
//! escape_markdown_v2}` behind a `PlatformRenderer` trait so the
//! splitting/escaping logic — which `spec.md`'s Non-goals explicitly keep
//! in-core ("safe escaping and length splitting") — lives here, and only
//! the platform-specific escape table lives in the channel adapter crate.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use relay_core::RelayError;

/// Typed chunk of visible output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Thinking,
    Text,
}

#[derive(Debug, Clone)]
pub struct DisplayBlock {
    pub kind: BlockKind,
    pub text: String,
}

/// An opaque handle to one platform message — a Display may span several
/// when its rendered text exceeds `max_chunk_len`.
#[derive(Debug, Clone)]
pub struct MessageHandle(pub String);

/// A bytes-bearing tool result delivered to the user as an attachment.
#[derive(Debug, Clone)]
pub struct FileDelivery {
    pub filename: String,
    pub content_bytes: Vec<u8>,
    pub mime: String,
    pub source_tool: String,
    /// When true, the current Display is committed and cleared before this
    /// file is sent, splitting the response around the delivery.
    pub deliver_before_response: bool,
}

/// Platform-facing trait the Display Manager renders through. Channel
/// adapters (e.g. `relay-telegram`) implement this; the splitting and
/// throttling policy above it is platform-agnostic.
#[async_trait]
pub trait PlatformRenderer: Send + Sync {
    /// Maximum characters per platform message.
    fn max_chunk_len(&self) -> usize;
    /// Escape `text` for the platform's markup dialect.
    fn escape(&self, text: &str) -> String;
    /// Send a new message, returning a handle for later edits.
    async fn send(&self, text: &str) -> Result<MessageHandle, RelayError>;
    /// Edit a previously sent message in place.
    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), RelayError>;
    /// Deliver a file as an attachment.
    async fn send_file(&self, delivery: &FileDelivery) -> Result<(), RelayError>;
    /// Show a typing/upload-action indicator appropriate to `phase`.
    async fn show_action(&self, phase: &str);
}

/// Ordered sequence of `DisplayBlock`s, owned by one Streaming Orchestrator
/// invocation — its lifetime equals one user-visible response.
///
/// Invariants upheld by `append`/`commit`:
/// - block order never changes
/// - consecutive same-kind appends merge into one block
/// - the visible message is split at `max_chunk_len`, paragraph boundary
///   first, else newline, else hard cut
/// - THINKING blocks never appear in `final_text()`
pub struct Display<'r> {
    renderer: &'r dyn PlatformRenderer,
    blocks: Vec<DisplayBlock>,
    sent: Vec<MessageHandle>,
    last_edit_at: Option<Instant>,
    last_edit_len: usize,
    edit_interval: Duration,
    edit_chars: usize,
    deferred_files: Vec<FileDelivery>,
}

impl<'r> Display<'r> {
    pub fn new(renderer: &'r dyn PlatformRenderer, edit_interval: Duration, edit_chars: usize) -> Self {
        Self {
            renderer,
            blocks: Vec::new(),
            sent: Vec::new(),
            last_edit_at: None,
            last_edit_len: 0,
            edit_interval,
            edit_chars,
            deferred_files: Vec::new(),
        }
    }

    /// Append text to the Display, merging into the trailing block when its
    /// kind matches.
    pub fn append(&mut self, kind: BlockKind, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.blocks.last_mut() {
            Some(b) if b.kind == kind => b.text.push_str(text),
            _ => self.blocks.push(DisplayBlock { kind, text: text.to_string() }),
        }
    }

    pub fn has_text_content(&self) -> bool {
        self.blocks.iter().any(|b| b.kind == BlockKind::Text && !b.text.is_empty())
    }

    /// Visible text only — THINKING blocks are excluded entirely (folded
    /// into an expandable region is a platform presentation choice the
    /// channel adapter may layer on top; the core guarantee is exclusion
    /// from the committed text).
    pub fn final_text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Text)
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Throttled edit: flush only if `edit_interval` has elapsed or the
    /// visible text has grown by at least `edit_chars` since the last edit.
    /// The caller is expected to call this after every delta; the final
    /// flush must go through `commit()` instead, which is unconditional.
    pub async fn maybe_flush(&mut self) {
        let text = self.final_text();
        let due_by_time = self
            .last_edit_at
            .map(|t| t.elapsed() >= self.edit_interval)
            .unwrap_or(true);
        let due_by_size = text.len().saturating_sub(self.last_edit_len) >= self.edit_chars;
        if due_by_time || due_by_size {
            self.flush(&text).await;
        }
    }

    /// Unconditional flush — always called at the end of a turn, a tool
    /// delivery boundary, or cancellation.
    pub async fn commit(&mut self) {
        let text = self.final_text();
        self.flush(&text).await;
    }

    async fn flush(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let chunks = split_chunks_smart(text, self.renderer.max_chunk_len());
        for (i, chunk) in chunks.iter().enumerate() {
            let escaped = self.renderer.escape(chunk);
            if let Some(handle) = self.sent.get(i) {
                let _ = self.renderer.edit(handle, &escaped).await;
            } else if let Ok(handle) = self.renderer.send(&escaped).await {
                self.sent.push(handle);
            }
        }
        self.last_edit_at = Some(Instant::now());
        self.last_edit_len = text.len();
    }

    /// Route a tool's `FileDelivery` through the renderer. `deliver_before_response`
    /// deliveries are sent immediately, interrupting the response around them;
    /// the rest queue until `flush_deferred_files` runs at the end of the turn.
    pub async fn deliver_file(&mut self, delivery: FileDelivery) {
        if delivery.deliver_before_response {
            if let Err(e) = self.renderer.send_file(&delivery).await {
                warn!(error = %e, tool = %delivery.source_tool, "failed to send file delivery");
            }
        } else {
            self.deferred_files.push(delivery);
        }
    }

    /// Send every file queued by a non-`deliver_before_response` delivery.
    /// Called once the final text has been committed.
    pub async fn flush_deferred_files(&mut self) {
        for delivery in self.deferred_files.drain(..) {
            if let Err(e) = self.renderer.send_file(&delivery).await {
                warn!(error = %e, tool = %delivery.source_tool, "failed to send file delivery");
            }
        }
    }

    /// Reset for a new iteration after a mid-stream file delivery — the
    /// next turn's text starts a fresh set of platform messages.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.sent.clear();
        self.last_edit_at = None;
        self.last_edit_len = 0;
    }

    pub fn append_interrupted_marker(&mut self) {
        self.append(BlockKind::Text, "\n\n_[interrupted]_");
    }
}

/// Split `text` into chunks no longer than `max_len`, preferring a
/// paragraph boundary, then a newline, then a hard cut.
pub fn split_chunks_smart(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > max_len {
        let window = &remaining[..max_len];
        let split_at = window
            .rfind("\n\n")
            .map(|i| i + 2)
            .or_else(|| window.rfind('\n').map(|i| i + 1))
            .or_else(|| window.rfind(' ').map(|i| i + 1))
            .unwrap_or(max_len);
        let split_at = split_at.max(1);
        chunks.push(remaining[..split_at].trim_end().to_string());
        remaining = remaining[split_at..].trim_start();
    }
    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRenderer;
    #[async_trait]
    impl PlatformRenderer for NullRenderer {
        fn max_chunk_len(&self) -> usize {
            20
        }
        fn escape(&self, text: &str) -> String {
            text.to_string()
        }
        async fn send(&self, _text: &str) -> Result<MessageHandle, RelayError> {
            Ok(MessageHandle("1".into()))
        }
        async fn edit(&self, _handle: &MessageHandle, _text: &str) -> Result<(), RelayError> {
            Ok(())
        }
        async fn send_file(&self, _delivery: &FileDelivery) -> Result<(), RelayError> {
            Ok(())
        }
        async fn show_action(&self, _phase: &str) {}
    }

    #[test]
    fn consecutive_same_kind_merges() {
        let r = NullRenderer;
        let mut d = Display::new(&r, Duration::from_secs(1), 100);
        d.append(BlockKind::Text, "hello ");
        d.append(BlockKind::Text, "world");
        assert_eq!(d.blocks.len(), 1);
        assert_eq!(d.final_text(), "hello world");
    }

    #[test]
    fn thinking_excluded_from_final_text() {
        let r = NullRenderer;
        let mut d = Display::new(&r, Duration::from_secs(1), 100);
        d.append(BlockKind::Thinking, "reasoning");
        d.append(BlockKind::Text, "answer");
        assert_eq!(d.blocks.len(), 2);
        assert_eq!(d.final_text(), "answer");
    }

    #[test]
    fn interleaved_kinds_each_get_own_block() {
        let r = NullRenderer;
        let mut d = Display::new(&r, Duration::from_secs(1), 100);
        d.append(BlockKind::Thinking, "a");
        d.append(BlockKind::Text, "b");
        d.append(BlockKind::Thinking, "c");
        assert_eq!(d.blocks.len(), 3);
    }

    struct RecordingRenderer {
        sent_files: std::sync::Mutex<Vec<String>>,
    }
    impl RecordingRenderer {
        fn new() -> Self {
            Self { sent_files: std::sync::Mutex::new(Vec::new()) }
        }
    }
    #[async_trait]
    impl PlatformRenderer for RecordingRenderer {
        fn max_chunk_len(&self) -> usize {
            20
        }
        fn escape(&self, text: &str) -> String {
            text.to_string()
        }
        async fn send(&self, _text: &str) -> Result<MessageHandle, RelayError> {
            Ok(MessageHandle("1".into()))
        }
        async fn edit(&self, _handle: &MessageHandle, _text: &str) -> Result<(), RelayError> {
            Ok(())
        }
        async fn send_file(&self, delivery: &FileDelivery) -> Result<(), RelayError> {
            self.sent_files.lock().unwrap().push(delivery.filename.clone());
            Ok(())
        }
        async fn show_action(&self, _phase: &str) {}
    }

    fn file(name: &str, deliver_before_response: bool) -> FileDelivery {
        FileDelivery {
            filename: name.to_string(),
            content_bytes: vec![1, 2, 3],
            mime: "application/octet-stream".to_string(),
            source_tool: "test_tool".to_string(),
            deliver_before_response,
        }
    }

    #[tokio::test]
    async fn deferred_file_waits_for_flush() {
        let r = RecordingRenderer::new();
        let mut d = Display::new(&r, Duration::from_secs(1), 100);
        d.deliver_file(file("a.txt", false)).await;
        assert!(r.sent_files.lock().unwrap().is_empty(), "non-interrupting delivery must not send immediately");
        d.flush_deferred_files().await;
        assert_eq!(*r.sent_files.lock().unwrap(), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn interrupting_file_sends_immediately() {
        let r = RecordingRenderer::new();
        let mut d = Display::new(&r, Duration::from_secs(1), 100);
        d.deliver_file(file("b.txt", true)).await;
        assert_eq!(*r.sent_files.lock().unwrap(), vec!["b.txt".to_string()]);
    }

    #[test]
    fn split_chunks_respects_max_len() {
        let text = "word ".repeat(20);
        let chunks = split_chunks_smart(&text, 30);
        for c in &chunks {
            assert!(c.len() <= 30, "chunk too long: {} ({})", c, c.len());
        }
    }

    #[test]
    fn split_chunks_short_text_single_chunk() {
        let chunks = split_chunks_smart("hi", 30);
        assert_eq!(chunks, vec!["hi".to_string()]);
    }
}
