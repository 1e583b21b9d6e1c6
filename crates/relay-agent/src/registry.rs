//! Tool Registry & Dispatcher (`spec.md` §4.G).
//!
//! Wraps the teacher's minimal `skynet-agent::tools::Tool` trait — name,
//! description, input schema, `execute` — in a richer `ToolConfig` carrying
//! everything the orchestrator's balance gate and file-delivery handling
//! need: whether the call is paid, a cheap pre-call cost estimator, a
//! file-delivery hint, a commutativity flag, and the MIME/file-id shape for
//! tools that consume a pre-uploaded file reference. The PAID set and flat
//! rates are grounded on `original_source/bot/core/tools/cost_estimator.py`'s
//! `PAID_TOOLS`/`estimate_tool_cost`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use relay_core::UserId;
use relay_store::Store;

use crate::provider::ToolDefinition;

/// Result of executing a tool — unchanged in shape from the teacher's
/// `ToolResult`, with an added optional `FileDelivery` per `spec.md` §3.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
    pub file_delivery: Option<crate::display::FileDelivery>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false, file_delivery: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { content: message.into(), is_error: true, file_delivery: None }
    }

    pub fn with_file(content: impl Into<String>, file: crate::display::FileDelivery) -> Self {
        Self { content: content.into(), is_error: false, file_delivery: Some(file) }
    }

    /// `spec.md` §4.E invariant #2: an empty error string is success, never
    /// `is_error = true`, in the payload sent back to the provider.
    pub fn to_provider_block(&self, tool_use_id: &str) -> Value {
        let is_error = self.is_error && !self.content.is_empty();
        serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": self.content,
            "is_error": is_error,
        })
    }
}

/// Per-thread/per-user handles a tool's `execute` needs. Tools that need
/// more than store access (an HTTP client, a provider handle) carry their
/// own dependencies from construction time instead of through this context,
/// since those are shared across every call rather than scoped per-turn.
pub struct ToolContext<'a> {
    pub thread_id: i64,
    pub user_id: UserId,
    pub store: &'a Store,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value, ctx: &ToolContext<'_>) -> ToolResult;
}

/// Flat-rate cost classes from `cost_estimator.py`'s `estimate_tool_cost`.
/// `TokenUsage` tools (vision/PDF/preview/deep-think) have no upfront
/// estimate — their cost is computed from the provider's token accounting
/// after the surrounding turn completes, same as the teacher.
#[derive(Debug, Clone, Copy)]
pub enum CostEstimator {
    FlatUsd(f64),
    /// Two flat rates selected by an input field (e.g. `generate_image`'s
    /// `resolution`: `"4k"` vs everything else).
    Tiered { field: &'static str, tier_value: &'static str, tier_usd: f64, default_usd: f64 },
    PerMinute { rate_per_minute: f64, default_minutes: f64 },
    PerSecond { rate_per_second: f64, default_seconds: f64 },
    None,
}

impl CostEstimator {
    pub fn estimate(&self, input: &Value) -> Option<f64> {
        match self {
            CostEstimator::FlatUsd(v) => Some(*v),
            CostEstimator::Tiered { field, tier_value, tier_usd, default_usd } => {
                let matches = input.get(*field).and_then(Value::as_str) == Some(*tier_value);
                Some(if matches { *tier_usd } else { *default_usd })
            }
            CostEstimator::PerMinute { rate_per_minute, default_minutes } => {
                let seconds = input.get("duration_seconds").and_then(Value::as_f64);
                let minutes = seconds.map(|s| s / 60.0).unwrap_or(*default_minutes);
                Some(minutes * rate_per_minute)
            }
            CostEstimator::PerSecond { rate_per_second, default_seconds } => {
                let timeout = input.get("timeout").and_then(Value::as_f64).unwrap_or(*default_seconds);
                Some(timeout * rate_per_second)
            }
            CostEstimator::None => None,
        }
    }
}

pub struct ToolConfig {
    pub tool: Box<dyn Tool>,
    pub paid: bool,
    pub cost_estimator: CostEstimator,
    /// Minimum balance (USD) required to invoke this tool at all, beyond the
    /// generic `balance >= 0` gate — `self_critique` requires $1.00 up front
    /// in the original bot.
    pub min_balance_usd: f64,
    pub is_commutative: bool,
    pub allowed_mime_prefixes: Vec<String>,
    pub file_id_param: Option<String>,
}

impl ToolConfig {
    pub fn free(tool: Box<dyn Tool>) -> Self {
        Self {
            tool,
            paid: false,
            cost_estimator: CostEstimator::None,
            min_balance_usd: 0.0,
            is_commutative: false,
            allowed_mime_prefixes: Vec::new(),
            file_id_param: None,
        }
    }

    pub fn paid(tool: Box<dyn Tool>, cost_estimator: CostEstimator) -> Self {
        Self {
            tool,
            paid: true,
            cost_estimator,
            min_balance_usd: 0.0,
            is_commutative: false,
            allowed_mime_prefixes: Vec::new(),
            file_id_param: None,
        }
    }

    pub fn with_min_balance(mut self, usd: f64) -> Self {
        self.min_balance_usd = usd;
        self
    }

    pub fn with_file_param(mut self, param: &str, mime_prefixes: &[&str]) -> Self {
        self.file_id_param = Some(param.to_string());
        self.allowed_mime_prefixes = mime_prefixes.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Static table keyed by tool name (`spec.md` §4.G). Built once at startup
/// from the tools this workspace ships, then shared read-only across every
/// thread's orchestrator run.
#[derive(Default)]
pub struct ToolRegistry {
    configs: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: ToolConfig) {
        let name = config.tool.name().to_string();
        self.configs.insert(name, config);
    }

    pub fn get(&self, name: &str) -> Option<&ToolConfig> {
        self.configs.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.configs
            .values()
            .map(|c| ToolDefinition {
                name: c.tool.name().to_string(),
                description: c.tool.description().to_string(),
                input_schema: c.tool.input_schema(),
            })
            .collect()
    }

    /// Dispatcher contract (`spec.md` §4.G): unknown name surfaces as a
    /// validation-error ToolResult, never raised to the caller.
    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext<'_>) -> ToolResult {
        match self.configs.get(name) {
            Some(config) => config.tool.execute(input, ctx).await,
            None => ToolResult::error(format!("unknown tool: {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(&self, input: Value, _ctx: &ToolContext<'_>) -> ToolResult {
            ToolResult::success(input.to_string())
        }
    }

    #[test]
    fn empty_error_string_is_not_is_error_in_payload() {
        let result = ToolResult { content: String::new(), is_error: true, file_delivery: None };
        let block = result.to_provider_block("tu_1");
        assert_eq!(block["is_error"], false);
    }

    #[test]
    fn nonempty_error_string_is_is_error() {
        let result = ToolResult::error("boom");
        let block = result.to_provider_block("tu_1");
        assert_eq!(block["is_error"], true);
    }

    #[test]
    fn per_second_estimator_uses_timeout_input() {
        let est = CostEstimator::PerSecond { rate_per_second: 0.000036, default_seconds: 3600.0 };
        let cost = est.estimate(&serde_json::json!({"timeout": 10})).unwrap();
        assert!((cost - 0.00036).abs() < 1e-9);
    }

    #[test]
    fn tiered_estimator_picks_rate_by_field() {
        let est = CostEstimator::Tiered { field: "resolution", tier_value: "4k", tier_usd: 0.240, default_usd: 0.134 };
        assert_eq!(est.estimate(&serde_json::json!({"resolution": "4k"})), Some(0.240));
        assert_eq!(est.estimate(&serde_json::json!({"resolution": "2k"})), Some(0.134));
        assert_eq!(est.estimate(&serde_json::json!({})), Some(0.134));
    }

    #[tokio::test]
    async fn unknown_tool_is_synthesized_error() {
        let registry = ToolRegistry::new();
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let store = Store::new(conn).unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let result = registry.execute("nonexistent", serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn registered_tool_dispatches() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolConfig::free(Box::new(Echo)));
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let store = Store::new(conn).unwrap();
        let ctx = ToolContext { thread_id: 1, user_id: UserId(1), store: &store };
        let result = registry.execute("echo", serde_json::json!({"a": 1}), &ctx).await;
        assert!(!result.is_error);
    }
}
