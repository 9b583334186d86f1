//! Client-facing stream events, one JSON object per SSE `data:` frame
use serde::{Deserialize, Serialize};

// Variant order matters for deserialization: untagged matching takes the
// first variant whose required fields are all present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatEvent {
    Done {
        done: bool,
        message_id: String,
        conversation_id: String,
    },
    Error {
        error: String,
    },
    Chunk {
        chunk: String,
    },
    ConversationCreated {
        conversation_id: String,
    },
}

impl ChatEvent {
    pub fn done(message_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        ChatEvent::Done {
            done: true,
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        ChatEvent::Chunk { chunk: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error { error: message.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"event encoding failed"}"#.to_string())
    }
}
