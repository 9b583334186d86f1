//! Long-term facts about a user
use crate::memory_db::schema::*;
use crate::memory_db::{get_conn, DbConnection, DbPool};
use crate::utils::TextUtils;
use rusqlite::params;
use tracing::debug;
use std::sync::Arc;

/// How many recent facts are considered when ranking
pub const SEARCH_CANDIDATES: usize = 500;

pub struct SemanticStore {
    pool: Arc<DbPool>,
}

impl SemanticStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<DbConnection> {
        get_conn(&self.pool)
    }

    /// Append a fact. Blank facts are skipped and return `false`.
    pub fn add_fact(&self, user_id: &str, fact: &str) -> anyhow::Result<bool> {
        let fact = fact.trim();
        if fact.is_empty() {
            return Ok(false);
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO semantic_memory (user_id, fact, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, fact, format_timestamp(&now_timestamp())],
        )?;
        debug!("Stored semantic fact for user {}", user_id);
        Ok(true)
    }

    /// Most recent first
    pub fn recent_facts(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT fact FROM semantic_memory WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let facts = stmt
            .query_map(params![user_id, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(facts)
    }

    /// Facts ranked by keyword overlap with `query`, recency breaking ties
    pub fn search_facts(&self, user_id: &str, query: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.recent_facts(user_id, SEARCH_CANDIDATES)?;
        Ok(TextUtils::rank_by_relevance(query, candidates, limit))
    }
}
