use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Upper bound on how many tool-use turns the Streaming Orchestrator will
/// drive before forcing a final answer.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;
/// Default Message Batcher debounce window.
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 200;
/// Prompt Composer: minimum estimated token count before the user-tier
/// system-prompt block receives a cache breakpoint.
pub const DEFAULT_CACHE_MIN_TOKENS: u32 = 1024;

/// Top-level config (`relay.toml` + `RELAY_`-prefixed env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
            channels: ChannelsConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Endpoints for the external HTTPS APIs `spec.md`'s Non-goals describe
/// only at their interfaces (image generation, LaTeX rendering, web
/// search, sandboxed code execution) plus the file-store/transcription
/// collaborators Media Ingest needs. Any entry left `None` means that tool
/// or collaborator isn't registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    pub file_store_endpoint: Option<String>,
    #[serde(default)]
    pub file_store_api_key: String,
    pub transcriber_endpoint: Option<String>,
    #[serde(default)]
    pub transcriber_api_key: String,
    pub generate_image_endpoint: Option<String>,
    pub render_latex_endpoint: Option<String>,
    pub web_search_endpoint: Option<String>,
    pub execute_python_endpoint: Option<String>,
}

/// Streaming Orchestrator / Batcher / Prompt Composer tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub soul_path: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    #[serde(default = "default_cache_min_tokens")]
    pub cache_min_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            soul_path: None,
            max_iterations: default_max_iterations(),
            batch_window_ms: default_batch_window_ms(),
            cache_min_tokens: default_cache_min_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Deny-by-default allowlist: `"*"` wildcard, `@username`/bare username,
    /// or numeric Telegram user id. An empty list allows no one.
    #[serde(default)]
    pub allow_users: Vec<String>,
    /// Whether private DMs are served at all.
    #[serde(default = "default_true")]
    pub dm_allowed: bool,
    /// In groups/supergroups, only respond when the bot is `@mentioned`.
    #[serde(default = "default_true")]
    pub require_mention: bool,
    /// Largest inbound attachment this adapter will download, in bytes.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attachment_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
fn default_batch_window_ms() -> u64 {
    DEFAULT_BATCH_WINDOW_MS
}
fn default_cache_min_tokens() -> u32 {
    DEFAULT_CACHE_MIN_TOKENS
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.db", home)
}

impl RelayConfig {
    /// Load config from a TOML file with `RELAY_`-prefixed env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.relay/relay.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("_"))
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.toml", home)
}
