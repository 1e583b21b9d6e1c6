//! `preview_file` — generalizes the teacher's `skynet-agent::tools::read_file`
//! from a local filesystem path to a `UserFile` id, since this workspace's
//! files live in the provider's hosted file store rather than on disk.
//!
//! Per `original_source/bot/core/tools/cost_estimator.py`, `preview_file` is
//! in the PAID set ("Claude Vision API for images/PDF (free for text)").
//! `spec.md`'s `ToolConfig` has no per-call text-vs-binary cost split, so
//! this workspace simplifies to uniformly paid, priced by token usage after
//! the call completes like the other vision/PDF tools (see DESIGN.md).

use async_trait::async_trait;
use serde_json::Value;

use crate::registry::{Tool, ToolContext, ToolResult};

pub struct PreviewFileTool;

#[async_trait]
impl Tool for PreviewFileTool {
    fn name(&self) -> &str {
        "preview_file"
    }

    fn description(&self) -> &str {
        "Preview a previously uploaded file by id: its type, size, and a short content summary."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_id": { "type": "integer", "description": "The UserFile id to preview" },
            },
            "required": ["file_id"],
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext<'_>) -> ToolResult {
        let Some(file_id) = input.get("file_id").and_then(Value::as_i64) else {
            return ToolResult::error("missing required param: file_id");
        };

        match ctx.store.get_user_file(file_id) {
            Ok(Some(file)) if file.owner_thread_id == ctx.thread_id => ToolResult::success(format!(
                "file #{} — type={} mime={} uploaded_by={}{}",
                file.id,
                file.file_type,
                file.mime,
                file.source,
                file.upload_context.map(|c| format!(" context={c}")).unwrap_or_default(),
            )),
            Ok(Some(_)) => ToolResult::error(format!("file {file_id} does not belong to this thread")),
            Ok(None) => ToolResult::error(format!("no such file: {file_id}")),
            Err(e) => ToolResult::error(format!("preview_file lookup failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{FileKind, FileSource, UserId};
    use relay_store::Store;

    fn store() -> Store {
        Store::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn missing_param_is_error() {
        let store = store();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let result = PreviewFileTool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn file_outside_thread_is_rejected() {
        let store = store();
        let file = store
            .insert_user_file(99, FileKind::Image, "blob", "image/png", None, None, FileSource::User)
            .unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let result = PreviewFileTool.execute(serde_json::json!({"file_id": file.id}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn existing_file_in_thread_previews() {
        let store = store();
        let file = store
            .insert_user_file(1, FileKind::Image, "blob", "image/png", None, Some("screenshot"), FileSource::User)
            .unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let result = PreviewFileTool.execute(serde_json::json!({"file_id": file.id}), &ctx).await;
        assert!(!result.is_error);
        assert!(result.content.contains("image/png"));
    }
}
