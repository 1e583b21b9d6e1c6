use std::sync::Mutex;

use chrono::Utc;
use relay_core::{ChatId, FileKind, FileSource, Role, ThreadKey, TopicId, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{AttachmentRef, Balance, Message, Thread, TokenUsage, ToolCallRecord, UserFile};

/// Synchronous SQLite store behind a `Mutex`, in the teacher's idiom —
/// rusqlite is used directly from async call sites rather than spawned onto
/// a blocking pool, since every call here is a single small, indexed query.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch the Thread for `(chat_id, user_id, topic_id)`, creating it (with
    /// `cleared = false`) if this is its first message.
    pub fn get_or_create_thread(&self, key: &ThreadKey, default_model: &str) -> Result<Thread> {
        let conn = self.conn.lock().unwrap();
        let existing = query_thread(&conn, key)?;
        if let Some(t) = existing {
            return Ok(t);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO threads (chat_id, user_id, topic_id, cleared, model_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)",
            params![
                key.chat_id.0,
                key.user_id.0,
                key.topic_id,
                default_model,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(thread_id = id, %key, "thread created");

        Ok(Thread {
            id,
            chat_id: key.chat_id,
            user_id: key.user_id,
            topic_id: key.topic_id,
            cleared: false,
            model_id: default_model.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_thread(&self, thread_id: i64) -> Result<Option<Thread>> {
        let conn = self.conn.lock().unwrap();
        let thread = conn
            .query_row(
                "SELECT id, chat_id, user_id, topic_id, cleared, model_id, created_at, updated_at
                 FROM threads WHERE id = ?1",
                params![thread_id],
                row_to_thread,
            )
            .optional()?;
        Ok(thread)
    }

    /// Mark a thread cleared — history is retained, never deleted.
    pub fn set_thread_cleared(&self, thread_id: i64, cleared: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE threads SET cleared = ?1, updated_at = ?2 WHERE id = ?3",
            params![cleared as i64, Utc::now().to_rfc3339(), thread_id],
        )?;
        Ok(())
    }

    pub fn set_thread_model(&self, thread_id: i64, model_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE threads SET model_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![model_id, Utc::now().to_rfc3339(), thread_id],
        )?;
        Ok(())
    }

    /// Append a persisted turn. Called once per turn by the Streaming
    /// Orchestrator for the user's batch and again for the assistant's
    /// final response.
    #[allow(clippy::too_many_arguments)]
    pub fn append_message(
        &self,
        thread_id: i64,
        role: Role,
        content: &str,
        attachments: &[AttachmentRef],
        thinking: Option<&serde_json::Value>,
        token_usage: Option<TokenUsage>,
        compaction_summary: Option<&str>,
    ) -> Result<Message> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let attachments_json = serde_json::to_string(attachments)?;
        let thinking_json = thinking.map(serde_json::to_string).transpose()?;
        let usage_json = token_usage
            .map(|u| serde_json::to_string(&u))
            .transpose()?;

        conn.execute(
            "INSERT INTO messages
             (thread_id, role, content, attachments_json, thinking_json,
              token_usage_json, compaction_summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                thread_id,
                role.to_string(),
                content,
                attachments_json,
                thinking_json,
                usage_json,
                compaction_summary,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![now, thread_id],
        )?;

        Ok(Message {
            id,
            thread_id,
            role,
            content: content.to_string(),
            attachments: attachments.to_vec(),
            thinking: thinking.cloned(),
            token_usage,
            compaction_summary: compaction_summary.map(str::to_string),
            created_at: now,
        })
    }

    /// All messages for a thread, oldest first — the Prompt Composer trims
    /// this to the post-compaction tail itself.
    pub fn get_thread_messages(&self, thread_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, role, content, attachments_json, thinking_json,
                    token_usage_json, compaction_summary, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![thread_id], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Rewrite a message's content — the only mutation allowed on a Message
    /// after creation, used for mid-generation user-edit handling.
    pub fn edit_message_content(&self, message_id: i64, new_content: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET content = ?1 WHERE id = ?2",
            params![new_content, message_id],
        )?;
        Ok(())
    }

    /// Stamp a compaction-summary marker onto a message: the Prompt Composer
    /// will ignore everything before it on every future turn.
    pub fn set_compaction_summary(&self, message_id: i64, summary: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET compaction_summary = ?1 WHERE id = ?2",
            params![summary, message_id],
        )?;
        Ok(())
    }

    pub fn insert_user_file(
        &self,
        owner_thread_id: i64,
        file_type: FileKind,
        blob_ref: &str,
        mime: &str,
        expires_at: Option<&str>,
        upload_context: Option<&str>,
        source: FileSource,
    ) -> Result<UserFile> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO user_files
             (owner_thread_id, file_type, blob_ref, mime, expires_at, upload_context, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                owner_thread_id,
                file_type.to_string(),
                blob_ref,
                mime,
                expires_at,
                upload_context,
                source.to_string(),
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(UserFile {
            id,
            owner_thread_id,
            file_type,
            blob_ref: blob_ref.to_string(),
            mime: mime.to_string(),
            expires_at: expires_at.map(str::to_string),
            upload_context: upload_context.map(str::to_string),
            source,
            created_at: now,
        })
    }

    pub fn get_user_file(&self, id: i64) -> Result<Option<UserFile>> {
        let conn = self.conn.lock().unwrap();
        let file = conn
            .query_row(
                "SELECT id, owner_thread_id, file_type, blob_ref, mime, expires_at,
                        upload_context, source, created_at
                 FROM user_files WHERE id = ?1",
                params![id],
                row_to_user_file,
            )
            .optional()?;
        Ok(file)
    }

    /// All files currently attached to a thread, oldest first — the Prompt
    /// Composer's files-context block (§4.D block 3) is rendered from this.
    pub fn list_user_files(&self, owner_thread_id: i64) -> Result<Vec<UserFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_thread_id, file_type, blob_ref, mime, expires_at,
                    upload_context, source, created_at
             FROM user_files WHERE owner_thread_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![owner_thread_id], row_to_user_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_balance(&self, user_id: UserId) -> Result<Balance> {
        let conn = self.conn.lock().unwrap();
        get_or_init_balance(&conn, user_id)
    }

    /// Unconditional ledger credit (e.g. a top-up). Debits for tool calls go
    /// through [`Self::debit_for_tool_call`] instead, which is atomic with
    /// the audit row.
    pub fn credit_balance(&self, user_id: UserId, delta_usd: f64, reason: &str) -> Result<Balance> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let balance = apply_balance_delta(&tx, user_id, delta_usd, reason, None)?;
        tx.commit()?;
        Ok(balance)
    }

    /// The Cost & Billing atomic operation: insert the `tool_calls` audit
    /// row and debit the user's balance in a single transaction. The debit
    /// always applies in full, even past zero — `spec.md` §4.H (c): actual
    /// cost is debited after the call completes regardless of the pre-call
    /// balance check, and a resulting negative balance is exactly what gates
    /// the user's *next* paid-tool call, not this one.
    ///
    /// Idempotent on `(user_id, operation_id)`: a retried call with the same
    /// pair returns the row already written instead of debiting twice.
    #[allow(clippy::too_many_arguments)]
    pub fn debit_for_tool_call(
        &self,
        thread_id: i64,
        message_id: Option<i64>,
        user_id: UserId,
        operation_id: &str,
        tool_name: &str,
        model_id: &str,
        usage: TokenUsage,
        cost_usd: f64,
        duration_ms: Option<u64>,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<ToolCallRecord> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if let Some(existing) = query_tool_call_by_operation(&tx, user_id, operation_id)? {
            debug!(user_id = user_id.0, operation_id, "debit already applied, skipping");
            tx.commit()?;
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO tool_calls
             (thread_id, message_id, user_id, operation_id, tool_name, model_id, input_tokens,
              output_tokens, cache_read_tokens, cache_write_tokens, cost_usd, duration_ms,
              success, error_message, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                thread_id,
                message_id,
                user_id.0,
                operation_id,
                tool_name,
                model_id,
                usage.input_tokens,
                usage.output_tokens,
                usage.cache_read_tokens,
                usage.cache_write_tokens,
                cost_usd,
                duration_ms.map(|d| d as i64),
                success as i64,
                error_message,
                now,
            ],
        )?;
        let tool_call_id = tx.last_insert_rowid();

        if cost_usd > 0.0 {
            apply_balance_delta(
                &tx,
                user_id,
                -cost_usd,
                &format!("tool:{tool_name}"),
                Some(tool_call_id),
            )?;
        }

        tx.commit()?;

        Ok(ToolCallRecord {
            id: tool_call_id,
            thread_id,
            message_id,
            user_id,
            operation_id: operation_id.to_string(),
            tool_name: tool_name.to_string(),
            model_id: model_id.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            cost_usd,
            duration_ms,
            success,
            error_message: error_message.map(str::to_string),
            created_at: now,
        })
    }
}

fn query_tool_call_by_operation(
    tx: &rusqlite::Transaction<'_>,
    user_id: UserId,
    operation_id: &str,
) -> Result<Option<ToolCallRecord>> {
    let record = tx
        .query_row(
            "SELECT id, thread_id, message_id, user_id, operation_id, tool_name, model_id,
                    input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
                    cost_usd, duration_ms, success, error_message, created_at
             FROM tool_calls WHERE user_id = ?1 AND operation_id = ?2",
            params![user_id.0, operation_id],
            row_to_tool_call,
        )
        .optional()?;
    Ok(record)
}

fn row_to_tool_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolCallRecord> {
    Ok(ToolCallRecord {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        message_id: row.get(2)?,
        user_id: UserId(row.get(3)?),
        operation_id: row.get(4)?,
        tool_name: row.get(5)?,
        model_id: row.get(6)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        cache_read_tokens: row.get(9)?,
        cache_write_tokens: row.get(10)?,
        cost_usd: row.get(11)?,
        duration_ms: row.get::<_, Option<i64>>(12)?.map(|d| d as u64),
        success: row.get::<_, i64>(13)? != 0,
        error_message: row.get(14)?,
        created_at: row.get(15)?,
    })
}

fn apply_balance_delta(
    tx: &rusqlite::Transaction<'_>,
    user_id: UserId,
    delta_usd: f64,
    reason: &str,
    tool_call_id: Option<i64>,
) -> Result<Balance> {
    let now = Utc::now().to_rfc3339();
    let current: f64 = tx
        .query_row(
            "SELECT credits_usd FROM balances WHERE user_id = ?1",
            params![user_id.0],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0.0);

    // `spec.md` §3: Balance is a signed decimal. A debit is free to push it
    // negative — that's what later gates PAID tools, not this call; the gate
    // lives at the call site (`Billing::can_afford`), checked before a paid
    // tool runs, never here.
    let updated = current + delta_usd;

    tx.execute(
        "INSERT INTO balances (user_id, credits_usd, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET credits_usd = ?2, updated_at = ?3",
        params![user_id.0, updated, now],
    )?;
    tx.execute(
        "INSERT INTO balance_ops (user_id, delta_usd, reason, tool_call_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id.0, delta_usd, reason, tool_call_id, now],
    )?;

    Ok(Balance {
        user_id,
        credits_usd: updated,
    })
}

fn get_or_init_balance(conn: &Connection, user_id: UserId) -> Result<Balance> {
    let credits: Option<f64> = conn
        .query_row(
            "SELECT credits_usd FROM balances WHERE user_id = ?1",
            params![user_id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(Balance {
        user_id,
        credits_usd: credits.unwrap_or(0.0),
    })
}

fn query_thread(conn: &Connection, key: &ThreadKey) -> Result<Option<Thread>> {
    let thread = conn
        .query_row(
            "SELECT id, chat_id, user_id, topic_id, cleared, model_id, created_at, updated_at
             FROM threads WHERE chat_id = ?1 AND user_id = ?2 AND topic_id IS ?3",
            params![key.chat_id.0, key.user_id.0, key.topic_id],
            row_to_thread,
        )
        .optional()?;
    Ok(thread)
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        chat_id: ChatId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        topic_id: row.get::<_, Option<i64>>(3)?,
        cleared: row.get::<_, i64>(4)? != 0,
        model_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let attachments_json: String = row.get(4)?;
    let thinking_json: Option<String> = row.get(5)?;
    let usage_json: Option<String> = row.get(6)?;

    let role = role_str.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let attachments: Vec<AttachmentRef> =
        serde_json::from_str(&attachments_json).unwrap_or_default();
    let thinking = thinking_json.and_then(|s| serde_json::from_str(&s).ok());
    let token_usage = usage_json.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Message {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        role,
        content: row.get(3)?,
        attachments,
        thinking,
        token_usage,
        compaction_summary: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_user_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserFile> {
    let kind_str: String = row.get(2)?;
    let source_str: String = row.get(7)?;
    Ok(UserFile {
        id: row.get(0)?,
        owner_thread_id: row.get(1)?,
        file_type: kind_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?,
        blob_ref: row.get(3)?,
        mime: row.get(4)?,
        expires_at: row.get(5)?,
        upload_context: row.get(6)?,
        source: source_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?,
        created_at: row.get(8)?,
    })
}
