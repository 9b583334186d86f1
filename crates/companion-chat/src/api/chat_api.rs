//! Streaming chat endpoint.
//!
//! POST /chat/send answers with an SSE stream once the user turn is
//! persisted. Everything after that point travels in-band as JSON frames.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;
use validator::Validate;

use crate::error::{ChatError, ChatResult};
use crate::memory_db::UserProfile;
use crate::shared_state::UnifiedAppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 32000, message = "content must be between 1 and 32000 characters"))]
    pub content: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl SendMessageRequest {
    fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

/// POST /chat/send
pub async fn send_message(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ChatResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(req) = payload?;
    req.validate().map_err(|e| ChatError::Validation(e.to_string()))?;
    if req.content.trim().is_empty() {
        return Err(ChatError::Validation("Message content must not be empty".to_string()));
    }

    let turn = state
        .pipeline
        .start_turn(&user, &req.content, req.conversation_id())
        .await?;
    info!(
        "Streaming reply for user {} in conversation {} (new: {})",
        user.id, turn.conversation_id, turn.created
    );

    // The pipeline task owns persistence; dropping its handle does not cancel it
    let stream = turn
        .events
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
