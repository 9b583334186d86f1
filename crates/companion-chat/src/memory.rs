//! Memory store accessor: running summaries, semantic facts and episodic summaries.
//!
//! Reads are lenient. A failing backend yields "nothing remembered" rather than
//! an error, so memory can never block a chat turn.

use crate::memory_db::MemoryDatabase;
use crate::utils::TextUtils;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// None when absent or empty
    async fn get_conversation_summary(&self, conversation_id: &str) -> Option<String>;
    /// Upsert; an empty summary is a reset
    async fn update_conversation_summary(&self, conversation_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()>;
    async fn get_message_count(&self, conversation_id: &str) -> anyhow::Result<usize>;
    async fn search_semantic(&self, user_id: &str, query: &str, limit: usize) -> Vec<String>;
    async fn search_episodic(&self, user_id: &str, query: &str, limit: usize) -> Vec<String>;
    async fn add_semantic(&self, user_id: &str, fact: &str) -> anyhow::Result<()>;
    async fn add_episodic(&self, user_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct DatabaseMemoryStore {
    db: Arc<MemoryDatabase>,
}

impl DatabaseMemoryStore {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemoryStore for DatabaseMemoryStore {
    async fn get_conversation_summary(&self, conversation_id: &str) -> Option<String> {
        let id = conversation_id.to_string();
        match self.db.run(move |db| db.summaries.get_summary(&id)).await {
            Ok(summary) => summary.map(|s| s.summary).filter(|s| !s.trim().is_empty()),
            Err(e) => {
                warn!("Summary lookup failed for {}: {}", conversation_id, e);
                None
            }
        }
    }

    async fn update_conversation_summary(&self, conversation_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()> {
        let id = conversation_id.to_string();
        let summary = summary.to_string();
        self.db
            .run(move |db| db.summaries.upsert_summary(&id, &summary, message_count))
            .await
    }

    async fn get_message_count(&self, conversation_id: &str) -> anyhow::Result<usize> {
        let id = conversation_id.to_string();
        self.db.run(move |db| db.conversations.count_messages(&id)).await
    }

    async fn search_semantic(&self, user_id: &str, query: &str, limit: usize) -> Vec<String> {
        let (user, query) = (user_id.to_string(), query.to_string());
        self.db
            .run(move |db| db.semantic.search_facts(&user, &query, limit))
            .await
            .unwrap_or_else(|e| {
                warn!("Semantic search failed for user {}: {}", user_id, e);
                Vec::new()
            })
    }

    async fn search_episodic(&self, user_id: &str, query: &str, limit: usize) -> Vec<String> {
        let (user, query) = (user_id.to_string(), query.to_string());
        self.db
            .run(move |db| db.episodic.search_episodes(&user, &query, limit))
            .await
            .unwrap_or_else(|e| {
                warn!("Episodic search failed for user {}: {}", user_id, e);
                Vec::new()
            })
    }

    async fn add_semantic(&self, user_id: &str, fact: &str) -> anyhow::Result<()> {
        let (user, fact) = (user_id.to_string(), fact.to_string());
        self.db.run(move |db| db.semantic.add_fact(&user, &fact)).await?;
        Ok(())
    }

    async fn add_episodic(&self, user_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()> {
        let (user, summary) = (user_id.to_string(), summary.to_string());
        self.db
            .run(move |db| db.episodic.add_episode(&user, &summary, message_count))
            .await?;
        Ok(())
    }
}

/// Process-local store for tests and ephemeral runs
#[derive(Clone, Default)]
pub struct InMemoryMemoryStore {
    summaries: Arc<DashMap<String, (String, usize)>>,
    message_counts: Arc<DashMap<String, usize>>,
    semantic: Arc<DashMap<String, Vec<String>>>,
    episodic: Arc<DashMap<String, Vec<(String, usize)>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_message_count(&self, conversation_id: &str, count: usize) {
        self.message_counts.insert(conversation_id.to_string(), count);
    }

    /// Raw summary row, including a reset ("", 0)
    pub fn summary_row(&self, conversation_id: &str) -> Option<(String, usize)> {
        self.summaries.get(conversation_id).map(|entry| entry.clone())
    }

    pub fn semantic_facts(&self, user_id: &str) -> Vec<String> {
        self.semantic.get(user_id).map(|facts| facts.clone()).unwrap_or_default()
    }

    pub fn episodic_summaries(&self, user_id: &str) -> Vec<(String, usize)> {
        self.episodic.get(user_id).map(|eps| eps.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get_conversation_summary(&self, conversation_id: &str) -> Option<String> {
        self.summaries
            .get(conversation_id)
            .map(|entry| entry.0.clone())
            .filter(|s| !s.trim().is_empty())
    }

    async fn update_conversation_summary(&self, conversation_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()> {
        let mut entry = self
            .summaries
            .entry(conversation_id.to_string())
            .or_insert_with(|| (String::new(), 0));
        let count = if summary.is_empty() { message_count } else { entry.1.max(message_count) };
        *entry = (summary.to_string(), count);
        Ok(())
    }

    async fn get_message_count(&self, conversation_id: &str) -> anyhow::Result<usize> {
        Ok(self.message_counts.get(conversation_id).map(|c| *c).unwrap_or(0))
    }

    async fn search_semantic(&self, user_id: &str, query: &str, limit: usize) -> Vec<String> {
        let newest_first: Vec<String> = self.semantic_facts(user_id).into_iter().rev().collect();
        TextUtils::rank_by_relevance(query, newest_first, limit)
    }

    async fn search_episodic(&self, user_id: &str, query: &str, limit: usize) -> Vec<String> {
        let newest_first: Vec<String> = self
            .episodic_summaries(user_id)
            .into_iter()
            .rev()
            .map(|(summary, _)| summary)
            .collect();
        TextUtils::rank_by_relevance(query, newest_first, limit)
    }

    async fn add_semantic(&self, user_id: &str, fact: &str) -> anyhow::Result<()> {
        let fact = fact.trim();
        if !fact.is_empty() {
            self.semantic.entry(user_id.to_string()).or_default().push(fact.to_string());
        }
        Ok(())
    }

    async fn add_episodic(&self, user_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()> {
        let summary = summary.trim();
        if !summary.is_empty() {
            self.episodic
                .entry(user_id.to_string())
                .or_default()
                .push((summary.to_string(), message_count));
        }
        Ok(())
    }
}
