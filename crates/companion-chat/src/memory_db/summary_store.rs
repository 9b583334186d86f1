//! Running conversation summary storage
use crate::memory_db::schema::*;
use crate::memory_db::{get_conn, DbConnection, DbPool};
use rusqlite::{params, Row};
use chrono::Utc;
use tracing::{debug, warn};
use std::sync::Arc;

pub struct SummaryStore {
    pool: Arc<DbPool>,
}

impl SummaryStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<DbConnection> {
        get_conn(&self.pool)
    }

    pub fn get_summary(&self, conversation_id: &str) -> anyhow::Result<Option<ConversationSummary>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, summary, message_count, updated_at
             FROM conversation_summaries WHERE conversation_id = ?1",
        )?;
        let mut rows = stmt.query([conversation_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_summary(row)?)),
            None => Ok(None),
        }
    }

    /// Upsert the summary for a conversation.
    ///
    /// The stored count never decreases, except that an empty summary resets
    /// the row to exactly the given count.
    pub fn upsert_summary(&self, conversation_id: &str, summary: &str, message_count: usize) -> anyhow::Result<()> {
        let conn = self.get_conn()?;

        debug!(
            "Upserting summary for conversation {} at {} messages",
            conversation_id, message_count
        );

        conn.execute(
            "INSERT INTO conversation_summaries (conversation_id, summary, message_count, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(conversation_id) DO UPDATE SET
                summary = excluded.summary,
                message_count = CASE
                    WHEN excluded.summary = '' THEN excluded.message_count
                    ELSE MAX(conversation_summaries.message_count, excluded.message_count)
                END,
                updated_at = excluded.updated_at",
            params![
                conversation_id,
                summary,
                message_count as i64,
                format_timestamp(&now_timestamp()),
            ],
        )?;

        Ok(())
    }

    fn row_to_summary(row: &Row) -> anyhow::Result<ConversationSummary> {
        let updated_at = parse_timestamp(&row.get::<_, String>(3)?)
            .unwrap_or_else(|| { warn!("Failed parse summary updated_at"); Utc::now() });
        let message_count: i64 = row.get(2)?;

        Ok(ConversationSummary {
            conversation_id: row.get(0)?,
            summary: row.get(1)?,
            message_count: message_count.max(0) as usize,
            updated_at,
        })
    }
}
