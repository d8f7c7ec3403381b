use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::{
    auth::AuthenticatedUser,
    automation::{default_sweeps, run_sweeps, SWEEP_STALE_FOLLOWUPS, SWEEP_TASK_BACKLOG},
    error::AppResult,
    policy,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub leads_junked: u64,
    pub tasks_backlogged: u64,
    pub failed: Vec<&'static str>,
}

/// Manual trigger for the periodic automation pass.
pub async fn run_sweep(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<SweepResponse>> {
    policy::require_admin(&user.actor(), "run automation sweeps")?;
    let report = run_sweeps(Arc::new(state), &default_sweeps(), Utc::now().naive_utc()).await;
    Ok(Json(SweepResponse {
        leads_junked: report.get(SWEEP_STALE_FOLLOWUPS),
        tasks_backlogged: report.get(SWEEP_TASK_BACKLOG),
        failed: report.failed,
    }))
}
