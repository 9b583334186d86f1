use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use tracing::info;

use crate::error::{ChatError, ChatResult};
use crate::memory_db::{ProfileUpdate, UserProfile};
use crate::shared_state::UnifiedAppState;

fn with_display_name(mut user: UserProfile) -> UserProfile {
    user.full_name = user.display_name();
    user
}

/// GET /auth/me
pub async fn current_user(Extension(user): Extension<UserProfile>) -> Json<UserProfile> {
    Json(with_display_name(user))
}

/// PATCH /auth/me
///
/// Onboarding write. Blank or missing fields keep their stored value; the
/// cached identity is dropped so the next turn is prompted with the new profile.
pub async fn update_profile(
    State(state): State<UnifiedAppState>,
    Extension(user): Extension<UserProfile>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ChatResult<Json<UserProfile>> {
    let Json(update) = payload?;

    let user_id = user.id.clone();
    let updated = state
        .database
        .run(move |db| db.users.update_profile(&user_id, &update))
        .await
        .map_err(ChatError::persistence)?
        .ok_or_else(|| ChatError::NotFound(format!("User not found: {}", user.id)))?;

    state.identity.forget_user(&updated.id).await;
    info!("Profile updated for user {}", updated.id);
    Ok(Json(with_display_name(updated)))
}
