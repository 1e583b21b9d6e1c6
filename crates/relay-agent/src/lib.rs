//! The nine request-pipeline components: Thread Registry, Message Batcher,
//! Media Ingest, Prompt Composer, Streaming Orchestrator, Display Manager,
//! Tool Registry & Dispatcher, Cost & Billing, Generation Tracker — plus the
//! provider abstraction and its one concrete Anthropic-style implementation.
//!
//! Grounded on `skynet-agent` almost in full (see `DESIGN.md`); Generation
//! Tracker is folded into Thread Registry rather than kept as a separate
//! top-level type (both change together and share one lock per thread).

pub mod anthropic;
pub mod anthropic_stream;
pub mod batcher;
pub mod billing;
pub mod display;
pub mod media;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod thinking;
pub mod thread_registry;
pub mod tools;

pub use anthropic::AnthropicProvider;
pub use billing::{Billing, ModelPricing, PricingTable};
pub use display::{BlockKind, Display, DisplayBlock, FileDelivery, MessageHandle, PlatformRenderer};
pub use media::{kind_from_mime, FileStore, InboundMedia, MediaIngest, Transcriber, UploadedFile};
pub use orchestrator::{CancellationReason, OrchestratorRequest, StreamResult};
pub use prompt::{PromptComposer, SystemPrompt};
pub use provider::{ChatRequest, LlmProvider, ProviderError, ToolDefinition};
pub use registry::{CostEstimator, Tool, ToolConfig, ToolContext, ToolRegistry, ToolResult};
pub use stream::StreamEvent;
pub use thinking::{ThinkingBlock, ThinkingLevel};
pub use thread_registry::{GenerationGuard, ThreadRegistry, ThreadState};
