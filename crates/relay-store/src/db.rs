use rusqlite::{Connection, Result};

/// Initialise all pipeline-persisted tables. Safe to call on every startup
/// (idempotent) — mirrors the teacher's `CREATE TABLE IF NOT EXISTS` idiom.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_threads_table(conn)?;
    create_messages_table(conn)?;
    create_user_files_table(conn)?;
    create_tool_calls_table(conn)?;
    create_balances_table(conn)?;
    create_balance_ops_table(conn)?;
    Ok(())
}

fn create_threads_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS threads (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL,
            user_id     INTEGER NOT NULL,
            topic_id    INTEGER,
            cleared     INTEGER NOT NULL DEFAULT 0,
            model_id    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(chat_id, user_id, topic_id)
        );
        CREATE INDEX IF NOT EXISTS idx_threads_chat_user
            ON threads(chat_id, user_id);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id           INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            role                TEXT NOT NULL,
            content             TEXT NOT NULL,
            attachments_json    TEXT NOT NULL DEFAULT '[]',
            thinking_json       TEXT,
            token_usage_json    TEXT,
            compaction_summary  TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id, created_at);",
    )
}

fn create_user_files_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_files (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            file_type       TEXT NOT NULL,
            blob_ref        TEXT NOT NULL,
            mime            TEXT NOT NULL,
            expires_at      TEXT,
            upload_context  TEXT,
            source          TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_files_thread
            ON user_files(owner_thread_id);",
    )
}

/// Mirrors the original bot's `tool_calls` table field-for-field — the audit
/// trail Cost & Billing writes to on every debit. `(user_id, operation_id)`
/// is unique so a retried debit for the same caller-assigned operation never
/// applies twice.
fn create_tool_calls_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_calls (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id               INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            message_id              INTEGER REFERENCES messages(id) ON DELETE SET NULL,
            user_id                 INTEGER NOT NULL,
            operation_id            TEXT NOT NULL,
            tool_name               TEXT NOT NULL,
            model_id                TEXT NOT NULL,
            input_tokens            INTEGER NOT NULL DEFAULT 0,
            output_tokens           INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens       INTEGER NOT NULL DEFAULT 0,
            cache_write_tokens      INTEGER NOT NULL DEFAULT 0,
            cost_usd                REAL NOT NULL,
            duration_ms             INTEGER,
            success                 INTEGER NOT NULL DEFAULT 1,
            error_message           TEXT,
            created_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_calls_thread
            ON tool_calls(thread_id);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_name
            ON tool_calls(tool_name);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tool_calls_user_operation
            ON tool_calls(user_id, operation_id);",
    )
}

fn create_balances_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS balances (
            user_id     INTEGER PRIMARY KEY,
            credits_usd REAL NOT NULL DEFAULT 0,
            updated_at  TEXT NOT NULL
        );",
    )
}

/// Append-only ledger of every balance mutation — adapted from the original
/// bot's payment-repository pattern to a generic debit/credit ledger, since
/// payment processing itself stays an external collaborator here.
fn create_balance_ops_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS balance_ops (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            delta_usd       REAL NOT NULL,
            reason          TEXT NOT NULL,
            tool_call_id    INTEGER REFERENCES tool_calls(id) ON DELETE SET NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_balance_ops_user
            ON balance_ops(user_id, created_at DESC);",
    )
}
