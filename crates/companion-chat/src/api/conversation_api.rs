//! Conversation management and history endpoints.
//!
//! Every lookup is scoped to the authenticated user; a conversation owned by
//! someone else is indistinguishable from a missing one.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::memory_db::{Conversation, Role, StoredMessage, UserProfile};
use crate::shared_state::UnifiedAppState;

pub const DEFAULT_TITLE: &str = "New conversation";
pub const HISTORY_LIMIT: usize = 2000;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ConversationResponse {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageResponse {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub conversation_id: Option<String>,
}

/// GET /chat/conversations
pub async fn list_conversations(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
) -> ChatResult<Json<Vec<ConversationResponse>>> {
    let user_id = user.id.clone();
    let conversations = state
        .database
        .run(move |db| db.conversations.list_conversations(&user_id))
        .await
        .map_err(ChatError::persistence)?;

    Ok(Json(conversations.into_iter().map(ConversationResponse::from).collect()))
}

/// POST /chat/conversations
pub async fn create_conversation(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
    body: Option<Json<CreateConversationRequest>>,
) -> ChatResult<(StatusCode, Json<ConversationResponse>)> {
    let title = body
        .and_then(|Json(req)| req.title)
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let user_id = user.id.clone();
    let conversation = state
        .database
        .run(move |db| db.conversations.create_conversation(&user_id, &title))
        .await
        .map_err(ChatError::persistence)?;

    Ok((StatusCode::CREATED, Json(conversation.into())))
}

/// PATCH /chat/conversations/:id
pub async fn rename_conversation(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
    Path(conversation_id): Path<String>,
    payload: Result<Json<RenameConversationRequest>, JsonRejection>,
) -> ChatResult<Json<ConversationResponse>> {
    let Json(req) = payload?;
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ChatError::Validation("Title cannot be empty".to_string()));
    }

    let user_id = user.id.clone();
    let id = conversation_id.clone();
    let renamed = state
        .database
        .run(move |db| db.conversations.rename_conversation(&user_id, &id, &title))
        .await
        .map_err(ChatError::persistence)?
        .ok_or_else(|| ChatError::NotFound(format!("Conversation not found: {}", conversation_id)))?;

    info!("Renamed conversation {}", renamed.id);
    Ok(Json(renamed.into()))
}

/// DELETE /chat/conversations/:id
pub async fn delete_conversation(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
    Path(conversation_id): Path<String>,
) -> ChatResult<StatusCode> {
    let user_id = user.id.clone();
    let id = conversation_id.clone();
    let deleted = state
        .database
        .run(move |db| db.conversations.delete_conversation(&user_id, &id))
        .await
        .map_err(ChatError::persistence)?;

    if !deleted {
        return Err(ChatError::NotFound(format!("Conversation not found: {}", conversation_id)));
    }
    info!("Deleted conversation {}", conversation_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /chat/history?conversation_id=
pub async fn get_history(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
    Query(query): Query<HistoryQuery>,
) -> ChatResult<Json<Vec<MessageResponse>>> {
    let Some(conversation_id) = query
        .conversation_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        return Ok(Json(Vec::new()));
    };
    if Uuid::parse_str(&conversation_id).is_err() {
        return Err(ChatError::Validation("conversation_id must be a UUID".to_string()));
    }

    let user_id = user.id.clone();
    let messages = state
        .database
        .run(move |db| db.conversations.list_messages(&user_id, &conversation_id, HISTORY_LIMIT))
        .await
        .map_err(ChatError::persistence)?;

    Ok(Json(visible_history(&state, messages)))
}

fn visible_history(state: &UnifiedAppState, messages: Vec<StoredMessage>) -> Vec<MessageResponse> {
    messages
        .into_iter()
        .filter(|message| message.role != Role::System)
        .map(|message| MessageResponse {
            content: state.codec.decrypt(&message.content),
            id: message.id,
            role: message.role,
            created_at: message.created_at,
        })
        .collect()
}
