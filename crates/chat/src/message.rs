use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One transcript entry.
///
/// `content` of an assistant message is the sanitized view of everything streamed into it
/// so far. Once `completed` is set the content never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub variant: Option<String>,
    pub completed: bool,
}

impl Message {
    /// Creates a finished user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            variant: None,
            completed: true,
        }
    }

    /// Creates an assistant message that is still receiving chunks.
    pub fn assistant_streaming(content: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            variant,
            completed: false,
        }
    }

    /// Creates a finished assistant message, used for seeded greetings.
    pub fn assistant_completed(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            variant: None,
            completed: true,
        }
    }

    /// Returns true for the one message that may still grow.
    pub fn is_streaming_assistant(&self) -> bool {
        self.role == Role::Assistant && !self.completed
    }
}

/// Prior-turn entry sent alongside a new user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            variant: message.variant.clone(),
        }
    }
}

/// Client-to-peer payload produced by an accepted submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    pub fn new<M: Borrow<Message>>(message: impl Into<String>, prior: &[M]) -> Self {
        Self {
            message: message.into(),
            history: prior
                .iter()
                .map(Borrow::<Message>::borrow)
                .map(HistoryEntry::from)
                .collect(),
        }
    }
}

/// Checks the tail invariant: at most one incomplete message, and only as an assistant tail.
pub fn transcript_is_well_formed<M: Borrow<Message>>(messages: &[M]) -> bool {
    let incomplete = messages
        .iter()
        .map(Borrow::<Message>::borrow)
        .enumerate()
        .filter(|(_, message)| !message.completed)
        .collect::<Vec<_>>();

    match incomplete.as_slice() {
        [] => true,
        [(index, message)] => *index + 1 == messages.len() && message.role == Role::Assistant,
        _ => false,
    }
}
