//! Conversation and message storage. Every query is scoped by the owning user.

use crate::memory_db::schema::*;
use crate::memory_db::{get_conn, DbConnection, DbPool};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ConversationStore {
    pool: Arc<DbPool>,
}

impl ConversationStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<DbConnection> {
        get_conn(&self.pool)
    }

    pub fn create_conversation(&self, user_id: &str, title: &str) -> anyhow::Result<Conversation> {
        let conn = self.get_conn()?;
        let now = now_timestamp();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id,
                conversation.user_id,
                conversation.title,
                format_timestamp(&now),
                format_timestamp(&now),
            ],
        )?;
        info!("Created conversation {} for user {}", conversation.id, user_id);
        Ok(conversation)
    }

    pub fn get_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        Self::fetch_conversation(&conn, user_id, conversation_id)
    }

    /// Most recently active first
    pub fn list_conversations(&self, user_id: &str) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at, updated_at
             FROM conversations WHERE user_id = ?1
             ORDER BY updated_at DESC, id",
        )?;
        let mut rows = stmt.query([user_id])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    pub fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2 AND user_id = ?3",
            params![title, conversation_id, user_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::fetch_conversation(&conn, user_id, conversation_id)
    }

    /// Bump `updated_at`; returns None when the conversation is missing or foreign
    pub fn touch_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let mut conn = self.get_conn()?;
        // Take the write lock up front; a deferred read cannot upgrade under WAL contention
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(stamp) = Self::advance_updated_at(&tx, user_id, conversation_id)? else {
            return Ok(None);
        };
        let conversation = Self::fetch_conversation(&tx, user_id, conversation_id)?;
        tx.commit()?;
        debug!("Touched conversation {} at {}", conversation_id, format_timestamp(&stamp));
        Ok(conversation)
    }

    /// Deletes the conversation; messages and summary go with it
    pub fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
        )?;
        if deleted > 0 {
            info!("Deleted conversation {}", conversation_id);
        }
        Ok(deleted > 0)
    }

    /// Insert one turn and bump the conversation's `updated_at` in the same transaction.
    /// `content` is stored as given; callers encrypt first.
    pub fn append_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let created_at = Self::advance_updated_at(&tx, user_id, conversation_id)?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} not found", conversation_id))?;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            created_at,
        };
        tx.execute(
            "INSERT INTO messages (id, conversation_id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.conversation_id,
                message.user_id,
                role.as_str(),
                message.content,
                format_timestamp(&created_at),
            ],
        )?;
        tx.commit()?;
        debug!("Stored {} message {} in {}", role, message.id, conversation_id);
        Ok(message)
    }

    /// The newest `limit` messages, returned oldest first
    pub fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, user_id, role, content, created_at FROM (
                SELECT m.id, m.conversation_id, m.user_id, m.role, m.content, m.created_at, m.rowid AS seq
                FROM messages m
                JOIN conversations c ON c.id = m.conversation_id
                WHERE m.conversation_id = ?1 AND c.user_id = ?2
                ORDER BY m.created_at DESC, m.rowid DESC
                LIMIT ?3
             ) ORDER BY created_at, seq",
        )?;
        let mut rows = stmt.query(params![conversation_id, user_id, limit as i64])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_stored_message(row)?);
        }
        Ok(messages)
    }

    pub fn count_messages(&self, conversation_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Moves `updated_at` to now, or one microsecond past its previous value if the
    /// clock has not advanced, so consecutive writes are strictly ordered.
    fn advance_updated_at(
        conn: &Connection,
        user_id: &str,
        conversation_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let previous: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        let now = now_timestamp();
        let stamp = match parse_timestamp(&previous) {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        };
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![format_timestamp(&stamp), conversation_id],
        )?;
        Ok(Some(stamp))
    }

    fn fetch_conversation(
        conn: &Connection,
        user_id: &str,
        conversation_id: &str,
    ) -> anyhow::Result<Option<Conversation>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at, updated_at
             FROM conversations WHERE id = ?1 AND user_id = ?2",
        )?;
        let mut rows = stmt.query(params![conversation_id, user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_conversation(row)?)),
            None => Ok(None),
        }
    }

    fn row_to_conversation(row: &Row) -> anyhow::Result<Conversation> {
        let created_at = parse_timestamp(&row.get::<_, String>(3)?)
            .unwrap_or_else(|| { warn!("Failed parse conversation created_at"); Utc::now() });
        let updated_at = parse_timestamp(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse conversation updated_at"); Utc::now() });

        Ok(Conversation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at,
            updated_at,
        })
    }

    fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
        let created_at = parse_timestamp(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| { warn!("Failed parse message timestamp"); Utc::now() });
        let role: String = row.get(3)?;

        Ok(StoredMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            user_id: row.get(2)?,
            role: role.parse()?,
            content: row.get(4)?,
            created_at,
        })
    }
}
