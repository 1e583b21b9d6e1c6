use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error(
        "Insufficient balance for user {user_id}: needs ${required_usd:.4}, has ${available_usd:.4}"
    )]
    InsufficientBalance {
        user_id: i64,
        required_usd: f64,
        available_usd: f64,
    },

    #[error("Tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short error code, stable across releases — logged and surfaced to
    /// admins, never shown verbatim to end users.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Database(_) => "DATABASE_ERROR",
            RelayError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            RelayError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            RelayError::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            RelayError::Cancelled => "CANCELLED",
            RelayError::Channel { .. } => "CHANNEL_ERROR",
            RelayError::Serialization(_) => "SERIALIZATION_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            RelayError::Timeout { .. } => "TIMEOUT",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
