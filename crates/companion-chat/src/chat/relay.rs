//! Forward-only token relay that keeps the memory-update block away from the client.
//!
//! Text is released as soon as it cannot be the beginning of the start
//! delimiter. At most a partial delimiter match (plus trailing whitespace) is
//! held back, and nothing after a complete delimiter is ever released.

use crate::prompt::MEMORY_UPDATE_START;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ReplyRelay {
    raw: String,
    /// Byte offset in `raw` up to which text has been released
    sent: usize,
    closed: bool,
}

impl ReplyRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token; returns the text that may be shown to the client now.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.raw.push_str(token);
        if self.closed {
            return None;
        }

        let pending = &self.raw[self.sent..];
        let limit = match pending.find(MEMORY_UPDATE_START) {
            Some(offset) => {
                self.closed = true;
                self.sent + offset
            }
            None => self.raw.len() - partial_delimiter_len(pending),
        };

        // Leading and trailing whitespace of the reply is trimmed on parse,
        // so it is never released early.
        let end = self.raw[..limit].trim_end().len();
        let start = self.sent.max(self.leading_whitespace());
        if end <= start {
            return None;
        }
        self.sent = end;
        Some(self.raw[start..end].to_string())
    }

    /// Everything the provider produced so far
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Text released to the client so far, concatenated
    pub fn relayed(&self) -> &str {
        let start = self.leading_whitespace().min(self.sent);
        &self.raw[start..self.sent]
    }

    /// Part of the parsed reply the client has not seen yet
    pub fn remainder(&self, reply: &str) -> Option<String> {
        match reply.strip_prefix(self.relayed()) {
            Some(rest) if !rest.is_empty() => Some(rest.to_string()),
            Some(_) => None,
            None => {
                debug!("Relayed text diverged from parsed reply; nothing to flush");
                None
            }
        }
    }

    fn leading_whitespace(&self) -> usize {
        self.raw.len() - self.raw.trim_start().len()
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the start delimiter
fn partial_delimiter_len(text: &str) -> usize {
    (1..MEMORY_UPDATE_START.len())
        .rev()
        .find(|&len| text.ends_with(&MEMORY_UPDATE_START[..len]))
        .unwrap_or(0)
}
