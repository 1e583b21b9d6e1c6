//! Extended-thinking budget levels and thinking-block re-emission.
//!
//! Divergence from the teacher: `skynet-agent::thinking::strip_thinking_blocks`
//! stripped thinking blocks from every assistant turn before re-sending to
//! the API, because that codebase's tool loop wasn't carrying provider
//! signatures and a stripped-but-unsigned thinking block is rejected anyway.
//! Here the conversation array re-emits thinking blocks **verbatim,
//! signature included** (`reemit_thinking_block` below) — `spec.md` §4.D
//! requires signature continuity so the provider can verify the reasoning
//! chain across turns. Stripping only happens for the user-visible Display
//! (`display::Display::final_text`, which filters THINKING blocks out),
//! and that filtered view never reaches the provider at all.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Controls how much token budget the model may spend on internal reasoning
/// before generating the visible response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// Thinking disabled — no reasoning block is sent to the API.
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingLevel {
    pub fn budget_tokens(&self) -> u32 {
        match self {
            ThinkingLevel::Off => 0,
            ThinkingLevel::Minimal => 1_024,
            ThinkingLevel::Low => 4_096,
            ThinkingLevel::Medium => 8_192,
            ThinkingLevel::High => 16_384,
            ThinkingLevel::XHigh => 32_768,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(ThinkingLevel::Off),
            "minimal" => Some(ThinkingLevel::Minimal),
            "low" => Some(ThinkingLevel::Low),
            "medium" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            "xhigh" => Some(ThinkingLevel::XHigh),
            _ => None,
        }
    }
}

impl Default for ThinkingLevel {
    fn default() -> Self {
        ThinkingLevel::Off
    }
}

impl fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Minimal => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
            ThinkingLevel::XHigh => "xhigh",
        };
        f.write_str(label)
    }
}

/// One signed thinking block, stored verbatim on an assistant Message and
/// re-emitted ahead of that message's text content the next time it enters
/// a conversation (`spec.md` §4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub text: String,
    pub signature: String,
}

/// Render the stored thinking blocks as Anthropic content blocks, to be
/// prepended to an assistant turn's content array. Omitting these when the
/// message carries them invalidates extended-thinking continuity.
pub fn reemit_thinking_blocks(blocks: &[ThinkingBlock]) -> Vec<serde_json::Value> {
    blocks
        .iter()
        .map(|b| {
            serde_json::json!({
                "type": "thinking",
                "thinking": b.text,
                "signature": b.signature,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_tokens_values() {
        assert_eq!(ThinkingLevel::Off.budget_tokens(), 0);
        assert_eq!(ThinkingLevel::Minimal.budget_tokens(), 1_024);
        assert_eq!(ThinkingLevel::XHigh.budget_tokens(), 32_768);
    }

    #[test]
    fn from_str_all_variants() {
        for (input, expected) in [
            ("off", ThinkingLevel::Off),
            ("HIGH", ThinkingLevel::High),
            ("xhigh", ThinkingLevel::XHigh),
        ] {
            assert_eq!(ThinkingLevel::parse(input), Some(expected), "input: {input}");
        }
        assert_eq!(ThinkingLevel::parse("unknown"), None);
    }

    #[test]
    fn reemit_preserves_signature() {
        let blocks = vec![ThinkingBlock {
            text: "reasoning...".into(),
            signature: "sig123".into(),
        }];
        let rendered = reemit_thinking_blocks(&blocks);
        assert_eq!(rendered[0]["type"], "thinking");
        assert_eq!(rendered[0]["signature"], "sig123");
        assert_eq!(rendered[0]["thinking"], "reasoning...");
    }
}
