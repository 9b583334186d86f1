//! Completion provider seam. The pipeline only sees a stream of text tokens.
pub mod openai;

pub use openai::OpenAiCompatibleProvider;

use crate::memory_db::Role;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self { temperature: 0.4, max_tokens: 2000 }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming completion. Errors before the first token (transport,
    /// non-success status) come back as `Err`; later failures as stream items.
    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        params: &CompletionParams,
    ) -> anyhow::Result<TokenStream>;
}
