//! Telegram channel adapter — wraps a teloxide `Bot` + `Dispatcher` and
//! drives the long-polling event loop until the process exits.
//!
//! Grounded on the teacher's `skynet-telegram::adapter::TelegramAdapter`,
//! simplified: no proactive-reminder or cross-channel outbound delivery
//! tasks, since those belong to `skynet-scheduler`/`skynet-channels`, both
//! dropped from this scope (see `DESIGN.md`).

use std::sync::Arc;

use teloxide::dptree;
use teloxide::prelude::*;
use tracing::info;

use relay_core::config::{AgentConfig, TelegramConfig};
use relay_agent::{FileStore, LlmProvider, PricingTable, ThreadRegistry, ToolRegistry, Transcriber};
use relay_store::Store;

use crate::handler::handle_message;

/// Every dependency `handle_message` needs, shared across every update the
/// Dispatcher routes to it. One instance lives for the process's lifetime.
pub struct BotContext {
    pub store: Store,
    pub registry: ThreadRegistry,
    pub tools: ToolRegistry,
    pub pricing: PricingTable,
    pub provider: Arc<dyn LlmProvider>,
    pub file_store: Box<dyn FileStore>,
    pub transcriber: Box<dyn Transcriber>,
    pub agent: AgentConfig,
    pub telegram: TelegramConfig,
    /// System prompt block 1 (`spec.md` §4.D) — always cached.
    pub global_system_prompt: String,
    /// System prompt block 2 — cached only once it clears `cache_min_tokens`.
    pub custom_system_prompt: Option<String>,
}

pub struct TelegramAdapter {
    ctx: Arc<BotContext>,
}

impl TelegramAdapter {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }

    /// Connect to Telegram and drive the long-polling loop. Never returns —
    /// runs for the lifetime of the process.
    pub async fn run(self) {
        let bot = Bot::new(&self.ctx.telegram.bot_token);
        info!("Telegram: starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message);

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.ctx])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
