//! API module - HTTP handlers for chat, conversations and identity

pub mod auth_api;
pub mod chat_api;
pub mod conversation_api;

pub use auth_api::{current_user, update_profile};
pub use chat_api::{send_message, SendMessageRequest};
pub use conversation_api::{
    create_conversation, delete_conversation, get_history, list_conversations, rename_conversation,
    ConversationResponse, MessageResponse,
};
