//! Bearer-token authentication.
//!
//! Tokens are opaque random strings; only their blake3 hash is stored.
//! Resolved profiles are cached briefly so a streaming client that polls
//! history does not hit SQLite on every request.

use crate::error::ChatError;
use crate::memory_db::{hash_token, MemoryDatabase, UserProfile};
use crate::shared_state::UnifiedAppState;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// None when the token is unknown
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<UserProfile>>;

    /// Drop any cached profile of this user so the next request sees fresh data
    async fn forget_user(&self, _user_id: &str) {}
}

pub struct DatabaseIdentityResolver {
    db: Arc<MemoryDatabase>,
    // Keyed by token hash so raw tokens never sit in memory longer than a request
    cache: Cache<String, UserProfile>,
}

impl DatabaseIdentityResolver {
    pub fn new(db: Arc<MemoryDatabase>, ttl: Duration) -> Self {
        Self {
            db,
            cache: Cache::builder().max_capacity(10_000).time_to_live(ttl).build(),
        }
    }
}

#[async_trait]
impl IdentityResolver for DatabaseIdentityResolver {
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<UserProfile>> {
        let key = hash_token(token);
        if let Some(profile) = self.cache.get(&key).await {
            return Ok(Some(profile));
        }

        let raw = token.to_string();
        let profile = self.db.run(move |db| db.users.find_by_token(&raw)).await?;
        if let Some(ref profile) = profile {
            debug!("Resolved token for user {}", profile.id);
            self.cache.insert(key, profile.clone()).await;
        }
        Ok(profile)
    }

    async fn forget_user(&self, user_id: &str) {
        let stale: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, profile)| profile.id == user_id)
            .map(|(key, _)| key)
            .collect();
        debug!("Invalidating {} cached identities for user {}", stale.len(), user_id);
        for key in stale {
            self.cache.invalidate(key.as_str()).await;
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Reject unauthenticated requests; on success the `UserProfile` is available
/// to handlers as an `Extension`.
pub async fn require_user(
    State(state): State<UnifiedAppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ChatError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ChatError::Authentication)?
        .to_string();

    let profile = match state.identity.resolve(&token).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return Err(ChatError::Authentication),
        Err(e) => {
            warn!("Identity lookup failed: {}", e);
            return Err(ChatError::persistence(e));
        }
    };

    request.extensions_mut().insert(profile);
    Ok(next.run(request).await)
}
