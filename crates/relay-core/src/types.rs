use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram-style chat identifier (BigInteger on the platform side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Platform user identifier (BigInteger, globally unique, permanent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Forum-topic identifier. `None` means the chat's main thread.
pub type TopicId = Option<i64>;

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a Thread: `(chat_id, user_id, topic_id?)` — each user gets a
/// separate LLM context per forum topic. Doubles as the registry key for
/// batching, generation tracking, and cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub topic_id: TopicId,
}

impl ThreadKey {
    pub fn new(chat_id: ChatId, user_id: UserId, topic_id: TopicId) -> Self {
        Self {
            chat_id,
            user_id,
            topic_id,
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.topic_id {
            Some(t) => write!(f, "chat:{}:user:{}:topic:{}", self.chat_id, self.user_id, t),
            None => write!(f, "chat:{}:user:{}:main", self.chat_id, self.user_id),
        }
    }
}

/// Message role, shared between persistence, the prompt composer, and the
/// provider wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// File kind for a UserFile handle — mirrors the platform's media taxonomy
/// plus `Generated` for tool-produced output round-tripped back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Pdf,
    Document,
    Audio,
    Voice,
    Video,
    Generated,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileKind::Image => "image",
            FileKind::Pdf => "pdf",
            FileKind::Document => "document",
            FileKind::Audio => "audio",
            FileKind::Voice => "voice",
            FileKind::Video => "video",
            FileKind::Generated => "generated",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FileKind::Image),
            "pdf" => Ok(FileKind::Pdf),
            "document" => Ok(FileKind::Document),
            "audio" => Ok(FileKind::Audio),
            "voice" => Ok(FileKind::Voice),
            "video" => Ok(FileKind::Video),
            "generated" => Ok(FileKind::Generated),
            other => Err(format!("unknown file kind: {other}")),
        }
    }
}

/// Who attached a UserFile — the user uploaded it, or a tool produced it
/// (e.g. an image-generation tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    User,
    Assistant,
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::User => write!(f, "user"),
            FileSource::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for FileSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(FileSource::User),
            "assistant" => Ok(FileSource::Assistant),
            other => Err(format!("unknown file source: {other}")),
        }
    }
}
