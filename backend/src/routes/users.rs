use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Role, User},
    policy,
    state::AppState,
    utils::time::to_iso,
};

#[derive(Debug, Deserialize)]
pub struct ListUsersParams {
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            created_at: to_iso(user.created_at),
        }
    }
}

/// Assignment picker source for admins.
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListUsersParams>,
) -> AppResult<Json<Vec<UserResponse>>> {
    policy::require_admin(&user.actor(), "list users")?;
    let role = params
        .role
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(str::parse::<Role>)
        .transpose()
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let users = state.store().list_users(role).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}
