//! Cost & Billing (`spec.md` §4.H) — per-token cost accounting and the
//! balance gate paid tools must clear before they're allowed to run.
//!
//! The teacher has no billing concept at all: `skynet-agent::registry`
//! lists 30 OpenAI-compatible base URLs with no rates attached. The shape
//! of a per-token price table is grounded instead on
//! `querymt-querymt::pricing::types::{Pricing, ModelPricing}`, whose
//! `prompt`/`completion` fields are USD-per-token floats deserializable from
//! either a string or a float (OpenRouter's wire format does both); this
//! workspace only ever constructs pricing from static config, so the fields
//! are plain `f64` here.

use std::collections::HashMap;

use relay_core::{RelayError, UserId};
use relay_store::{Store, TokenUsage};

/// USD-per-token rates for one model. Cache reads are typically priced
/// lower than fresh input tokens; cache writes typically cost more, since
/// the provider has to materialize the cache entry.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl ModelPricing {
    pub fn cost_usd(&self, usage: &TokenUsage) -> f64 {
        usage.input_tokens as f64 * self.input
            + usage.output_tokens as f64 * self.output
            + usage.cache_read_tokens as f64 * self.cache_read
            + usage.cache_write_tokens as f64 * self.cache_write
    }
}

/// A small static table of known models — enough for the models `spec.md`
/// names. Rates are USD per token (i.e. already divided from a
/// per-million-token list price).
#[derive(Default)]
pub struct PricingTable {
    rates: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn with_defaults() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            "claude-sonnet-4-6".to_string(),
            ModelPricing {
                input: 3.0 / 1_000_000.0,
                output: 15.0 / 1_000_000.0,
                cache_read: 0.3 / 1_000_000.0,
                cache_write: 3.75 / 1_000_000.0,
            },
        );
        rates.insert(
            "claude-opus-4-1".to_string(),
            ModelPricing {
                input: 15.0 / 1_000_000.0,
                output: 75.0 / 1_000_000.0,
                cache_read: 1.5 / 1_000_000.0,
                cache_write: 18.75 / 1_000_000.0,
            },
        );
        rates.insert(
            "claude-haiku-4-5".to_string(),
            ModelPricing {
                input: 0.8 / 1_000_000.0,
                output: 4.0 / 1_000_000.0,
                cache_read: 0.08 / 1_000_000.0,
                cache_write: 1.0 / 1_000_000.0,
            },
        );
        Self { rates }
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.rates.insert(model.into(), pricing);
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.rates.get(model)
    }
}

/// Per-call cost quote a `ToolConfig::cost_estimator` produces ahead of
/// running a paid tool, so the balance gate can reject before the external
/// API call is made at all.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    pub estimated_usd: f64,
}

/// Billing gate for the Streaming Orchestrator's tool-dispatch loop. Holds
/// no state of its own beyond a `Store` handle — every check re-reads the
/// balance, since two tool calls for the same user can race across threads.
pub struct Billing<'a> {
    store: &'a Store,
    pricing: &'a PricingTable,
}

impl<'a> Billing<'a> {
    pub fn new(store: &'a Store, pricing: &'a PricingTable) -> Self {
        Self { store, pricing }
    }

    /// The underlying `Store`, for callers (the orchestrator's tool
    /// dispatcher) that need to read balances or thread state directly
    /// rather than through a `Billing` method.
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// `spec.md` §4.G: a paid tool is rejected before it ever makes an
    /// external call if the user's balance is already negative.
    pub fn can_afford(&self, user_id: UserId) -> Result<bool, RelayError> {
        let balance = self
            .store
            .get_balance(user_id)
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(balance.credits_usd >= 0.0)
    }

    pub fn cost_for_turn(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.pricing.get(model).map(|p| p.cost_usd(usage)).unwrap_or(0.0)
    }

    /// Debit the turn's provider-token cost, computed from whatever usage
    /// the Streaming Orchestrator reports — already prorated for a
    /// cancelled generation, since `StreamResult.usage` only ever reflects
    /// the iterations that actually completed (`spec.md` §4.H (c), §8 #8).
    /// A zero cost is a no-op: `Store::credit_balance` would otherwise write
    /// a zero-delta ledger row for every free turn.
    pub fn debit_turn_cost(&self, user_id: UserId, model: &str, usage: &TokenUsage) -> Result<(), RelayError> {
        let cost = self.cost_for_turn(model, usage);
        if cost <= 0.0 {
            return Ok(());
        }
        self.store
            .credit_balance(user_id, -cost, &format!("turn:{model}"))
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    /// Record a tool call and, if `cost_usd > 0.0`, debit the user's balance
    /// atomically with the audit row (`Store::debit_for_tool_call`).
    /// `operation_id` must be stable across retries of the same call so the
    /// debit is applied at most once per `(user_id, operation_id)`.
    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_call(
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
    ) -> Result<(), RelayError> {
        self.store
            .debit_for_tool_call(
                thread_id,
                message_id,
                user_id,
                operation_id,
                tool_name,
                model_id,
                usage,
                cost_usd,
                duration_ms,
                success,
                error_message,
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_proportional_to_usage() {
        let pricing = ModelPricing { input: 0.000003, output: 0.000015, cache_read: 0.0000003, cache_write: 0.00000375 };
        let usage = TokenUsage { input_tokens: 1000, output_tokens: 500, cache_read_tokens: 0, cache_write_tokens: 0 };
        let cost = pricing.cost_usd(&usage);
        assert!((cost - (1000.0 * 0.000003 + 500.0 * 0.000015)).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let table = PricingTable::with_defaults();
        assert!(table.get("unknown-model").is_none());
    }

    #[test]
    fn default_table_has_sonnet() {
        let table = PricingTable::with_defaults();
        assert!(table.get("claude-sonnet-4-6").is_some());
    }
}
