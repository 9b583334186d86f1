//! Users and their bearer tokens. Only a blake3 hash of each token is kept.
use crate::memory_db::schema::*;
use crate::memory_db::{get_conn, DbConnection, DbPool};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct UserStore {
    pool: Arc<DbPool>,
}

impl UserStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<DbConnection> {
        get_conn(&self.pool)
    }

    pub fn create_user(&self, user: &NewUser) -> anyhow::Result<UserProfile> {
        let email = user.email.trim();
        if email.is_empty() {
            return Err(anyhow::anyhow!("Email must not be empty"));
        }
        let conn = self.get_conn()?;
        let profile = UserProfile {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            full_name: user.full_name.clone(),
            personality_type: user.personality_type.clone(),
            favorite_activity: user.favorite_activity.clone(),
            daily_goals: user.daily_goals.clone(),
        };
        conn.execute(
            "INSERT INTO users (id, email, full_name, personality_type, favorite_activity, daily_goals, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                profile.id,
                profile.email,
                profile.full_name,
                profile.personality_type,
                profile.favorite_activity,
                profile.daily_goals,
                format_timestamp(&now_timestamp()),
            ],
        )?;
        info!("Created user {}", profile.id);
        Ok(profile)
    }

    pub fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        let conn = self.get_conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, full_name, personality_type, favorite_activity, daily_goals
                 FROM users WHERE id = ?1",
                [user_id],
                |row| Ok(Self::row_to_user(row)),
            )
            .optional()?
            .transpose()?;
        Ok(user)
    }

    /// Overwrite only the fields given with non-blank values. Returns None for an unknown user.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> anyhow::Result<Option<UserProfile>> {
        fn filled(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE users SET
                full_name = COALESCE(?2, full_name),
                personality_type = COALESCE(?3, personality_type),
                favorite_activity = COALESCE(?4, favorite_activity),
                daily_goals = COALESCE(?5, daily_goals)
             WHERE id = ?1",
            params![
                user_id,
                filled(&update.full_name),
                filled(&update.personality_type),
                filled(&update.favorite_activity),
                filled(&update.daily_goals),
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        info!("Updated profile for user {}", user_id);
        drop(conn);
        self.get_user(user_id)
    }

    /// Issue a new bearer token for the user. The raw token is returned once and never stored.
    pub fn issue_token(&self, user_id: &str) -> anyhow::Result<String> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO api_tokens (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![hash_token(&token), user_id, format_timestamp(&now_timestamp())],
        )?;
        info!("Issued API token for user {}", user_id);
        Ok(token)
    }

    pub fn find_by_token(&self, token: &str) -> anyhow::Result<Option<UserProfile>> {
        let conn = self.get_conn()?;
        let user = conn
            .query_row(
                "SELECT u.id, u.email, u.full_name, u.personality_type, u.favorite_activity, u.daily_goals
                 FROM api_tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.token_hash = ?1",
                [hash_token(token)],
                |row| Ok(Self::row_to_user(row)),
            )
            .optional()?
            .transpose()?;
        Ok(user)
    }

    fn row_to_user(row: &Row) -> anyhow::Result<UserProfile> {
        Ok(UserProfile {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            personality_type: row.get(3)?,
            favorite_activity: row.get(4)?,
            daily_goals: row.get(5)?,
        })
    }
}

pub fn hash_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}
