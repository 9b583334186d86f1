//! OpenAI-compatible streaming chat completions (DeepSeek by default)
use super::{ChatMessage, CompletionParams, CompletionProvider, TokenStream};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

/// One decoded `data:` line of the provider's event stream
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    Token(String),
    Finished,
    Done,
    Skip,
}

pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let Some(choice) = chunk.choices.into_iter().next() else {
                return SseLine::Skip;
            };
            match choice.delta.and_then(|d| d.content).filter(|c| !c.is_empty()) {
                Some(content) => SseLine::Token(content),
                None if choice.finish_reason.is_some() => SseLine::Finished,
                None => SseLine::Skip,
            }
        }
        Err(e) => {
            debug!("Skipping undecodable stream line: {}", e);
            SseLine::Skip
        }
    }
}

pub struct OpenAiCompatibleProvider {
    base_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        let model = model.into();
        info!("Completion provider initialized: {} ({})", base_url, model);
        Ok(Self { base_url, api_key: api_key.into(), model, http_client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        params: &CompletionParams,
    ) -> anyhow::Result<TokenStream> {
        debug!("Requesting streaming completion with {} messages", messages.len());
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream: true,
        };
        let response = self.http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Completion request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Completion provider returned {}: {}", status, body));
        }

        Ok(Box::pin(token_stream(response.bytes_stream())))
    }
}

/// Decode a provider byte stream into content tokens
fn token_stream<S>(byte_stream: S) -> impl Stream<Item = anyhow::Result<String>> + Send
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        // Lines are split on raw bytes so multi-byte characters spanning
        // network chunks are decoded whole.
        let mut buffer = BytesMut::new();
        futures_util::pin_mut!(byte_stream);
        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result
                .map_err(|e| anyhow::anyhow!("Stream read error: {}", e))?;
            buffer.extend_from_slice(&chunk);
            while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                let line = buffer.split_to(newline_pos + 1);
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(&line) {
                    SseLine::Token(token) => { yield token; }
                    SseLine::Done | SseLine::Finished => return,
                    SseLine::Skip => {}
                }
            }
        }
        if !buffer.is_empty() {
            if let SseLine::Token(token) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                yield token;
            }
        }
        warn!("Completion stream ended without a terminator");
    }
}
