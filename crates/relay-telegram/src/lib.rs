//! The one concrete chat-platform adapter this workspace ships: Telegram,
//! via `teloxide`'s long-polling `Dispatcher`.
//!
//! Grounded on the teacher's `skynet-telegram` almost file-for-file (see
//! `DESIGN.md`) — the session-key/allowlist/chunking/escaping/typing-handle
//! shapes are all lifted directly. What changes is what the handler does
//! with an inbound message once it's admitted: instead of calling a
//! non-streaming pipeline function, it drives the Thread Registry, the
//! batcher's window, and the Streaming Orchestrator through a
//! `PlatformRenderer` implementation of its own.

pub mod adapter;
pub mod allow;
pub mod attach;
pub mod handler;
pub mod renderer;
pub mod stubs;
pub mod typing;

pub use adapter::TelegramAdapter;
pub use renderer::TelegramRenderer;
