//! Splits a raw completion into the user-visible reply and the optional
//! memory-update block the model appends after it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

pub const MEMORY_UPDATE_START: &str = "---MEMORY_UPDATE---";
pub const MEMORY_UPDATE_END: &str = "---END_MEMORY_UPDATE---";

/// Typed contents of the trailing JSON block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    #[serde(default, deserialize_with = "present_text")]
    pub memory_update: Option<String>,
    #[serde(default, deserialize_with = "present_text")]
    pub episodic_update: Option<String>,
    #[serde(default, deserialize_with = "present_text")]
    pub summary_update: Option<String>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.memory_update.is_none() && self.episodic_update.is_none() && self.summary_update.is_none()
    }
}

/// A string field counts only when it carries text. JSON null, non-strings,
/// blanks and the words "null"/"none" all mean "no update".
fn present_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => {
            let text = text.trim();
            if text.is_empty() || text.eq_ignore_ascii_case("null") || text.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(text.to_string())
            }
        }
        _ => None,
    })
}

/// Reply text plus whatever memory update could be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredResponse {
    pub reply: String,
    pub update: Option<MemoryUpdate>,
}

impl StructuredResponse {
    fn plain(reply: &str) -> Self {
        Self { reply: reply.trim().to_string(), update: None }
    }

    pub fn assistant_reply(&self) -> &str {
        &self.reply
    }

    pub fn memory_update(&self) -> Option<&str> {
        self.update.as_ref().and_then(|u| u.memory_update.as_deref())
    }

    pub fn episodic_update(&self) -> Option<&str> {
        self.update.as_ref().and_then(|u| u.episodic_update.as_deref())
    }

    pub fn summary_update(&self) -> Option<&str> {
        self.update.as_ref().and_then(|u| u.summary_update.as_deref())
    }
}

/// Never fails: a malformed block only means there is no memory update this turn.
pub fn parse_structured_response(raw: &str) -> StructuredResponse {
    let Some(start) = raw.find(MEMORY_UPDATE_START) else {
        return StructuredResponse::plain(raw);
    };
    let reply = &raw[..start];
    let body_start = start + MEMORY_UPDATE_START.len();

    let Some(body_len) = raw[body_start..].find(MEMORY_UPDATE_END) else {
        debug!("Memory update block has no end delimiter; ignoring it");
        return StructuredResponse::plain(reply);
    };
    let body = strip_code_fence(&raw[body_start..body_start + body_len]);

    match serde_json::from_str::<MemoryUpdate>(body) {
        Ok(update) => StructuredResponse {
            reply: reply.trim().to_string(),
            update: Some(update).filter(|u| !u.is_empty()),
        },
        Err(e) => {
            debug!("Memory update block is not valid JSON: {}", e);
            StructuredResponse::plain(reply)
        }
    }
}

fn strip_code_fence(body: &str) -> &str {
    let body = body.trim();
    let Some(inner) = body.strip_prefix("```") else {
        return body;
    };
    // Drop the info string ("json") on the opening fence line
    let inner = match inner.find('\n') {
        Some(newline) => &inner[newline + 1..],
        None => inner,
    };
    inner.trim_end().strip_suffix("```").unwrap_or(inner).trim()
}
