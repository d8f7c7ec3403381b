use chrono::{NaiveDateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::models::{ActorKind, HistoryNote, Lead, LeadStatus};
use crate::policy::{self, Actor, LeadOperation};
use crate::store::{CrmStore, TransitionOutcome};

/// In-place status change shared by every store implementation.
///
/// Returns the previous status. Milestone timestamps are only written the
/// first time a lead reaches their status.
pub fn apply_status(lead: &mut Lead, new_status: LeadStatus, at: NaiveDateTime) -> LeadStatus {
    let previous = lead.status;
    lead.status = new_status;
    if let Some(milestone) = new_status.milestone() {
        let slot = lead.milestone_slot(milestone);
        if slot.is_none() {
            *slot = Some(at);
        }
    }
    lead.updated_at = at;
    previous
}

/// Sets a lead's status on behalf of a person. Any enumerated status is
/// accepted, including moves back down the pipeline.
pub async fn change_status(
    store: &dyn CrmStore,
    actor: &Actor,
    lead_id: Uuid,
    new_status: LeadStatus,
    reason: Option<String>,
) -> CrmResult<Lead> {
    let lead = store
        .find_lead(lead_id)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    policy::authorize(actor, &lead, LeadOperation::ChangeStatus)?;

    let note = HistoryNote {
        user_id: Some(actor.id),
        actor_kind: ActorKind::Human,
        reason: reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        at: Utc::now().naive_utc(),
    };

    match store.transition_lead(lead_id, None, new_status, note).await? {
        TransitionOutcome::Applied { lead, entry } => {
            info!(
                lead_id = %lead.id,
                actor_id = %actor.id,
                old_status = ?entry.old_status,
                new_status = %entry.new_status,
                "lead status changed"
            );
            Ok(lead)
        }
        TransitionOutcome::Missing => Err(CrmError::NotFound("lead")),
        TransitionOutcome::Skipped { current } => Err(CrmError::conflict(format!(
            "lead moved to {current} concurrently"
        ))),
    }
}

/// Status implied by the audit log: the newest history row, or `new` for a
/// lead that has never been touched.
pub async fn recompute_status(store: &dyn CrmStore, lead_id: Uuid) -> CrmResult<LeadStatus> {
    if store.find_lead(lead_id).await?.is_none() {
        return Err(CrmError::NotFound("lead"));
    }
    let history = store.lead_history(lead_id).await?;
    Ok(history
        .last()
        .map(|entry| entry.new_status)
        .unwrap_or(LeadStatus::New))
}
