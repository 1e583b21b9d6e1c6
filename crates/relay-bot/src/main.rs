//! `relay-bot` — process entry point. Wires config, persistence, the tool
//! registry, and the Anthropic provider into a `BotContext`, then hands it
//! to the Telegram adapter's long-polling loop.
//!
//! Grounded on `skynet-gateway::main`'s startup shape (env-filtered tracing
//! init, config load with a `Default::default()` fallback, build state,
//! run) — simplified to one channel adapter instead of an axum router, per
//! `DESIGN.md`.

use std::sync::Arc;

use relay_agent::tools::extended_thinking::ExtendedThinkingTool;
use relay_agent::tools::file_preview::PreviewFileTool;
use relay_agent::tools::http_tool::HttpTool;
use relay_agent::tools::self_critique::SelfCritiqueTool;
use relay_agent::tools::web_fetch::WebFetchTool;
use relay_agent::{AnthropicProvider, LlmProvider, PricingTable, ThreadRegistry, ToolConfig, ToolRegistry};
use relay_core::config::RelayConfig;
use relay_store::Store;
use relay_telegram::adapter::BotContext;
use relay_telegram::stubs::{HttpFileStore, HttpTranscriber};
use relay_telegram::TelegramAdapter;

const GLOBAL_SYSTEM_PROMPT: &str = "You are a helpful assistant reachable over Telegram. \
Use the tools available to you when they would materially improve your answer; otherwise \
answer directly.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_bot=info".into()),
        )
        .init();

    let config_path = std::env::var("RELAY_CONFIG").ok();
    let config = RelayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        RelayConfig::default()
    });

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(&config.database.path)?;
    let store = Store::new(conn)?;

    let anthropic = config
        .providers
        .anthropic
        .clone()
        .ok_or_else(|| anyhow::anyhow!("providers.anthropic is required"))?;
    let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(anthropic.api_key, anthropic.base_url));

    let http_client = reqwest::Client::new();
    let registry = build_tool_registry(&config, http_client.clone(), provider.clone(), &config.agent.model);

    let telegram = config
        .channels
        .telegram
        .clone()
        .ok_or_else(|| anyhow::anyhow!("channels.telegram is required"))?;

    let file_store: Box<dyn relay_agent::FileStore> = match &config.tools.file_store_endpoint {
        Some(endpoint) => {
            Box::new(HttpFileStore::new(http_client.clone(), endpoint.clone(), config.tools.file_store_api_key.clone()))
        }
        None => Box::new(NullFileStore),
    };
    let transcriber: Box<dyn relay_agent::Transcriber> = match &config.tools.transcriber_endpoint {
        Some(endpoint) => {
            Box::new(HttpTranscriber::new(http_client.clone(), endpoint.clone(), config.tools.transcriber_api_key.clone()))
        }
        None => Box::new(NullTranscriber),
    };

    let ctx = Arc::new(BotContext {
        store,
        registry: ThreadRegistry::new(),
        tools: registry,
        pricing: PricingTable::with_defaults(),
        provider,
        file_store,
        transcriber,
        agent: config.agent.clone(),
        telegram,
        global_system_prompt: GLOBAL_SYSTEM_PROMPT.to_string(),
        custom_system_prompt: config.agent.soul_path.as_deref().and_then(|p| std::fs::read_to_string(p).ok()),
    });

    tracing::info!("relay-bot: starting Telegram adapter");
    TelegramAdapter::new(ctx).run().await;

    Ok(())
}

fn build_tool_registry(
    config: &RelayConfig,
    http_client: reqwest::Client,
    provider: Arc<dyn LlmProvider>,
    model: &str,
) -> ToolRegistry {
    use relay_agent::registry::CostEstimator;

    let mut registry = ToolRegistry::new();

    registry.register(ToolConfig::paid(Box::new(PreviewFileTool), CostEstimator::None));
    registry.register(ToolConfig::free(Box::new(WebFetchTool::new(http_client.clone()))));
    registry.register(ToolConfig::free(Box::new(ExtendedThinkingTool::new(provider.clone(), model))));
    registry.register(
        ToolConfig::paid(Box::new(SelfCritiqueTool::new(provider, "claude-opus-4-1")), CostEstimator::None)
            .with_min_balance(1.0),
    );

    if let Some(endpoint) = &config.tools.generate_image_endpoint {
        registry.register(ToolConfig::paid(
            Box::new(HttpTool::new(
                http_client.clone(),
                "generate_image",
                "Generate an image from a text prompt.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "prompt": { "type": "string" },
                        "resolution": { "type": "string", "enum": ["2k", "4k"], "description": "default 2k" },
                    },
                    "required": ["prompt"],
                }),
                endpoint.clone(),
            )),
            CostEstimator::Tiered { field: "resolution", tier_value: "4k", tier_usd: 0.240, default_usd: 0.134 },
        ));
    }
    if let Some(endpoint) = &config.tools.render_latex_endpoint {
        registry.register(ToolConfig::paid(
            Box::new(HttpTool::new(
                http_client.clone(),
                "render_latex",
                "Render a LaTeX expression to an image.",
                serde_json::json!({
                    "type": "object",
                    "properties": { "latex": { "type": "string" } },
                    "required": ["latex"],
                }),
                endpoint.clone(),
            )),
            CostEstimator::FlatUsd(0.01),
        ));
    }
    if let Some(endpoint) = &config.tools.web_search_endpoint {
        registry.register(ToolConfig::paid(
            Box::new(HttpTool::new(
                http_client.clone(),
                "web_search",
                "Search the web and return a summary of results.",
                serde_json::json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"],
                }),
                endpoint.clone(),
            )),
            CostEstimator::FlatUsd(0.01),
        ));
    }
    if let Some(endpoint) = &config.tools.execute_python_endpoint {
        registry.register(ToolConfig::paid(
            Box::new(HttpTool::new(
                http_client,
                "execute_python",
                "Execute a Python snippet in a sandboxed environment and return stdout/stderr.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "code": { "type": "string" },
                        "timeout": { "type": "number", "description": "Seconds, default 3600" },
                    },
                    "required": ["code"],
                }),
                endpoint.clone(),
            )),
            CostEstimator::PerSecond { rate_per_second: 0.000036, default_seconds: 3600.0 },
        ));
    }

    registry
}

/// No-op `FileStore` used when `tools.file_store_endpoint` isn't configured
/// — inbound attachments are still described to the model inline (raw
/// bytes/base64 for images, §3), they just can't be persisted as a
/// `UserFile` row for later `preview_file` lookups.
struct NullFileStore;

#[async_trait::async_trait]
impl relay_agent::FileStore for NullFileStore {
    async fn upload(
        &self,
        _bytes: &[u8],
        _mime: &str,
        _filename: Option<&str>,
    ) -> Result<relay_agent::UploadedFile, relay_core::RelayError> {
        Err(relay_core::RelayError::Channel {
            channel: "file_store".into(),
            reason: "no file store configured".into(),
        })
    }
}

struct NullTranscriber;

#[async_trait::async_trait]
impl relay_agent::Transcriber for NullTranscriber {
    async fn transcribe(&self, _bytes: &[u8], _mime: &str) -> Result<String, relay_core::RelayError> {
        Err(relay_core::RelayError::Channel {
            channel: "transcriber".into(),
            reason: "no transcriber configured".into(),
        })
    }
}
