//! Condensed records of past sessions, captured at compaction checkpoints
use crate::memory_db::schema::*;
use crate::memory_db::semantic_store::SEARCH_CANDIDATES;
use crate::memory_db::{get_conn, DbConnection, DbPool};
use crate::utils::TextUtils;
use rusqlite::params;
use tracing::{debug, info};
use std::sync::Arc;

pub struct EpisodicStore {
    pool: Arc<DbPool>,
}

impl EpisodicStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<DbConnection> {
        get_conn(&self.pool)
    }

    pub fn add_episode(&self, user_id: &str, session_summary: &str, message_count: usize) -> anyhow::Result<bool> {
        let session_summary = session_summary.trim();
        if session_summary.is_empty() {
            return Ok(false);
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO episodic_memory (user_id, session_summary, message_count, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, session_summary, message_count as i64, format_timestamp(&now_timestamp())],
        )?;
        info!("Captured episodic summary for user {} at {} messages", user_id, message_count);
        Ok(true)
    }

    pub fn recent_episodes(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_summary FROM episodic_memory WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let episodes = stmt
            .query_map(params![user_id, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    pub fn search_episodes(&self, user_id: &str, query: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.recent_episodes(user_id, SEARCH_CANDIDATES)?;
        debug!("Ranking {} episodic candidates for user {}", candidates.len(), user_id);
        Ok(TextUtils::rank_by_relevance(query, candidates, limit))
    }
}
