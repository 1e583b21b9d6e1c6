//! Tool implementations (`spec.md` §4.G's individually-adapted entries).
//!
//! `spec.md`'s Non-goals keep the heavy lifting behind each of these
//! external (image generation, transcription, sandboxed code execution are
//! "described only at their interfaces") — what lives here is the thin
//! adapter that calls out to the external HTTPS API and shapes the result
//! into a `ToolResult`, grounded on the teacher's `skynet-agent::tools::*`
//! one-file-per-tool layout.

pub mod extended_thinking;
pub mod file_preview;
pub mod http_tool;
pub mod self_critique;
pub mod web_fetch;
