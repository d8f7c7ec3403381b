//! Time-driven rules. Both sweeps select candidates by predicate and apply
//! the same store primitives manual actions use, so they are safe to rerun
//! and to interrupt between rows.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::CrmResult;
use crate::models::{ActorKind, HistoryNote, LeadStatus, Role};
use crate::state::AppState;
use crate::store::{CrmStore, TransitionOutcome};

pub mod worker;

pub use worker::AutomationWorker;

pub const STALE_FOLLOWUP_DAYS: i64 = 4;
pub const STALE_FOLLOWUP_REASON: &str = "Automated: Second Follow-up > 4 days";

pub const SWEEP_STALE_FOLLOWUPS: &str = "leads_junked";
pub const SWEEP_TASK_BACKLOG: &str = "tasks_backlogged";

/// Identity automated transitions are recorded under.
#[derive(Debug, Clone, Default)]
pub struct Automation {
    actor_username: Option<String>,
}

impl Automation {
    pub fn new(actor_username: Option<String>) -> Self {
        Self { actor_username }
    }

    /// The configured admin when present, otherwise the earliest admin.
    /// Without any admin the rows carry no user.
    pub async fn system_actor(&self, store: &dyn CrmStore) -> CrmResult<Option<uuid::Uuid>> {
        if let Some(username) = &self.actor_username {
            match store.find_user_by_username(username).await? {
                Some(user) if user.role == Role::Admin => return Ok(Some(user.id)),
                Some(user) => {
                    warn!(username = %user.username, role = %user.role, "automation actor is not an admin, falling back")
                }
                None => warn!(username = %username, "automation actor not found, falling back"),
            }
        }
        let admins = store.list_users(Some(Role::Admin)).await?;
        Ok(admins.first().map(|user| user.id))
    }

    /// Moves leads stuck in second follow-up for more than four days to junk.
    /// Returns how many leads were moved.
    pub async fn junk_stale_followups(
        &self,
        store: &dyn CrmStore,
        now: NaiveDateTime,
    ) -> CrmResult<u64> {
        let cutoff = now - Duration::days(STALE_FOLLOWUP_DAYS);
        let candidates = store.stale_second_followups(cutoff).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let user_id = self.system_actor(store).await?;
        let mut junked = 0;
        for lead_id in candidates {
            let note = HistoryNote {
                user_id,
                actor_kind: ActorKind::System,
                reason: Some(STALE_FOLLOWUP_REASON.to_string()),
                at: now,
            };
            match store
                .transition_lead(lead_id, Some(LeadStatus::SecondFollowup), LeadStatus::Junk, note)
                .await
            {
                Ok(TransitionOutcome::Applied { .. }) => {
                    info!(lead_id = %lead_id, old_status = "second_followup", new_status = "junk", "lead junked by automation");
                    junked += 1;
                }
                Ok(TransitionOutcome::Missing) | Ok(TransitionOutcome::Skipped { .. }) => {}
                Err(err) => warn!(lead_id = %lead_id, error = %err, "failed to junk stale lead"),
            }
        }
        Ok(junked)
    }
}

/// Moves every undone task whose due time has passed to the backlog.
pub async fn backlog_overdue_tasks(store: &dyn CrmStore, now: NaiveDateTime) -> CrmResult<u64> {
    let moved = store.backlog_overdue_tasks(now).await?;
    if moved > 0 {
        info!(count = moved, "tasks moved to backlog");
    }
    Ok(moved)
}

#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, state: Arc<AppState>, now: NaiveDateTime) -> CrmResult<u64>;
}

pub struct StaleFollowupSweep;

#[async_trait]
impl Sweep for StaleFollowupSweep {
    fn name(&self) -> &'static str {
        SWEEP_STALE_FOLLOWUPS
    }

    async fn run(&self, state: Arc<AppState>, now: NaiveDateTime) -> CrmResult<u64> {
        state
            .automation
            .junk_stale_followups(state.store.as_ref(), now)
            .await
    }
}

pub struct TaskBacklogSweep;

#[async_trait]
impl Sweep for TaskBacklogSweep {
    fn name(&self) -> &'static str {
        SWEEP_TASK_BACKLOG
    }

    async fn run(&self, state: Arc<AppState>, now: NaiveDateTime) -> CrmResult<u64> {
        backlog_overdue_tasks(state.store.as_ref(), now).await
    }
}

pub fn default_sweeps() -> Vec<Arc<dyn Sweep>> {
    vec![Arc::new(StaleFollowupSweep), Arc::new(TaskBacklogSweep)]
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub results: BTreeMap<&'static str, u64>,
    pub failed: Vec<&'static str>,
}

impl SweepReport {
    pub fn get(&self, name: &str) -> u64 {
        self.results.get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.results.values().sum()
    }
}

/// Runs each sweep once. A failing sweep is logged and does not stop the
/// others.
pub async fn run_sweeps(
    state: Arc<AppState>,
    sweeps: &[Arc<dyn Sweep>],
    now: NaiveDateTime,
) -> SweepReport {
    let mut report = SweepReport::default();
    for sweep in sweeps {
        match sweep.run(state.clone(), now).await {
            Ok(count) => {
                report.results.insert(sweep.name(), count);
            }
            Err(err) => {
                error!(sweep = sweep.name(), error = %err, "sweep failed");
                report.failed.push(sweep.name());
            }
        }
    }
    report
}
