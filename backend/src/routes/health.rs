use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

/// Liveness plus a single primary-key lookup to prove the store answers.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.store().find_user(Uuid::nil()).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok", "store": "ok" }))),
        Err(err) => {
            warn!(error = %err, "health probe could not reach the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "store": "unavailable" })),
            )
        }
    }
}
