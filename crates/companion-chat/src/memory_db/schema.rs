//! Database schema definitions for the chat and memory system
use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Author of a message turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(anyhow::anyhow!("Unknown message role: {}", other)),
        }
    }
}

/// A titled thread of turns owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One persisted turn. `content` is whatever the row holds (ciphertext at rest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Rolling condensed memory of one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub summary: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Authenticated user profile as resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub personality_type: Option<String>,
    pub favorite_activity: Option<String>,
    pub daily_goals: Option<String>,
}

impl UserProfile {
    /// First word of the full name, the form the assistant addresses the user by
    pub fn first_name(&self) -> Option<String> {
        self.full_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .map(str::to_string)
    }

    /// Name shown back to the client: the stored full name, or the email's
    /// local part capitalized when none was given
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(name.to_string());
        }
        let local = self.email.split('@').next().filter(|l| !l.is_empty())?;
        let mut chars = local.chars();
        let first = chars.next()?;
        Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
    }

    /// Non-empty profile fields keyed by a human-readable label
    pub fn profile_attributes(&self) -> BTreeMap<String, String> {
        let fields = [
            ("Personality type", &self.personality_type),
            ("Favorite activity", &self.favorite_activity),
            ("Daily goals", &self.daily_goals),
        ];
        fields
            .into_iter()
            .filter_map(|(label, value)| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (label.to_string(), v.to_string()))
            })
            .collect()
    }
}

/// Fields required to provision a user
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub full_name: Option<String>,
    pub personality_type: Option<String>,
    pub favorite_activity: Option<String>,
    pub daily_goals: Option<String>,
}

/// Onboarding fields a user may change; empty values leave the stored field untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub personality_type: Option<String>,
    #[serde(default)]
    pub favorite_activity: Option<String>,
    #[serde(default)]
    pub daily_goals: Option<String>,
}

/// Current time at the precision timestamps are stored with
pub fn now_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so lexicographic order matches chronological order
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    None
}
