//! Conversation persistence as seen by the chat pipeline
use crate::memory_db::{Conversation, MemoryDatabase, Role, StoredMessage};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_conversation(&self, user_id: &str, title: &str) -> anyhow::Result<Conversation>;
    /// Bump `updated_at`; None when missing or owned by someone else
    async fn touch_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>>;
    async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<bool>;
    async fn append_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> anyhow::Result<StoredMessage>;
    /// Newest `limit` messages, oldest first
    async fn list_messages(&self, user_id: &str, conversation_id: &str, limit: usize) -> anyhow::Result<Vec<StoredMessage>>;
}

#[derive(Clone)]
pub struct DatabaseChatStore {
    db: Arc<MemoryDatabase>,
}

impl DatabaseChatStore {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChatStore for DatabaseChatStore {
    async fn create_conversation(&self, user_id: &str, title: &str) -> anyhow::Result<Conversation> {
        let (user, title) = (user_id.to_string(), title.to_string());
        self.db.run(move |db| db.conversations.create_conversation(&user, &title)).await
    }

    async fn touch_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let (user, id) = (user_id.to_string(), conversation_id.to_string());
        self.db.run(move |db| db.conversations.touch_conversation(&user, &id)).await
    }

    async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<bool> {
        let (user, id) = (user_id.to_string(), conversation_id.to_string());
        self.db.run(move |db| db.conversations.delete_conversation(&user, &id)).await
    }

    async fn append_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let (user, id, content) = (user_id.to_string(), conversation_id.to_string(), content.to_string());
        self.db
            .run(move |db| db.conversations.append_message(&user, &id, role, &content))
            .await
    }

    async fn list_messages(&self, user_id: &str, conversation_id: &str, limit: usize) -> anyhow::Result<Vec<StoredMessage>> {
        let (user, id) = (user_id.to_string(), conversation_id.to_string());
        self.db
            .run(move |db| db.conversations.list_messages(&user, &id, limit))
            .await
    }
}
