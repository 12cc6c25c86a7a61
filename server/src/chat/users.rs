//! REST endpoints for the user directory.

use axum::{extract::State, Json};

use crate::auth::middleware::Claims;
use crate::db::User;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Resolve the token subject to its stored user. 401 until the user has synced.
pub async fn current_user(state: &AppState, claims: &Claims) -> Result<User, ApiError> {
    state
        .store
        .find_user_by_external_id(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::new(axum::http::StatusCode::UNAUTHORIZED, "User not synced"))
}

/// POST /api/v1/users/sync: Create or refresh the caller's profile from token claims.
pub async fn sync_user(State(state): State<AppState>, claims: Claims) -> ApiResult<User> {
    let user = state.store.upsert_user(claims.to_profile()).await?;
    tracing::info!(user_id = %user.id, external_id = %user.external_id, "User synced");
    Ok(Json(user))
}

/// GET /api/v1/users: Everyone except the caller, by username.
pub async fn list_users(State(state): State<AppState>, claims: Claims) -> ApiResult<Vec<User>> {
    let me = current_user(&state, &claims).await?;
    let users = state.store.list_users_except(&me.id).await?;
    Ok(Json(users))
}
