use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::models::{ActorKind, HistoryNote, Lead, Role};
use crate::policy::{self, Actor, LeadOperation};
use crate::store::{ClaimOutcome, CrmStore, ReleaseOutcome};

pub const CLAIM_REASON: &str = "Lead claimed";
pub const UNCLAIM_REASON: &str = "Lead unclaimed";

fn note(actor: &Actor, reason: &str) -> HistoryNote {
    HistoryNote {
        user_id: Some(actor.id),
        actor_kind: ActorKind::Human,
        reason: Some(reason.to_string()),
        at: Utc::now().naive_utc(),
    }
}

/// Takes ownership of a lead. Re-claiming one's own lead succeeds and is
/// logged again; a lead held by someone else is a conflict.
pub async fn claim(store: &dyn CrmStore, actor: &Actor, lead_id: Uuid) -> CrmResult<Lead> {
    if actor.role == Role::LeadGen {
        return Err(CrmError::forbidden("lead_gen may not claim leads"));
    }

    let lead = store
        .find_lead(lead_id)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    policy::authorize(actor, &lead, LeadOperation::Claim)?;

    if lead.assigned_to_id.is_some_and(|holder| holder != actor.id) {
        return Err(CrmError::conflict("lead is already claimed by another user"));
    }

    match store
        .claim_lead(lead_id, actor.id, note(actor, CLAIM_REASON))
        .await?
    {
        ClaimOutcome::Claimed(lead) => {
            info!(lead_id = %lead.id, actor_id = %actor.id, "lead claimed");
            Ok(lead)
        }
        ClaimOutcome::Missing => Err(CrmError::NotFound("lead")),
        ClaimOutcome::HeldBy(holder) => {
            warn!(lead_id = %lead_id, actor_id = %actor.id, holder_id = %holder, "claim lost race");
            Err(CrmError::conflict("lead is already claimed by another user"))
        }
    }
}

/// Releases a lead back to the unclaimed pool. Outreach may only release
/// their own leads; admins may release any.
pub async fn unclaim(store: &dyn CrmStore, actor: &Actor, lead_id: Uuid) -> CrmResult<Lead> {
    if actor.role == Role::LeadGen {
        return Err(CrmError::forbidden("lead_gen may not unclaim leads"));
    }

    let lead = store
        .find_lead(lead_id)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    if lead.assigned_to_id.is_none() {
        return Err(CrmError::invalid("lead is already unclaimed"));
    }
    policy::authorize(actor, &lead, LeadOperation::Unclaim)?;

    let holder = if actor.is_admin() {
        None
    } else {
        Some(actor.id)
    };

    match store
        .release_lead(lead_id, holder, note(actor, UNCLAIM_REASON))
        .await?
    {
        ReleaseOutcome::Released(lead) => {
            info!(lead_id = %lead.id, actor_id = %actor.id, "lead unclaimed");
            Ok(lead)
        }
        ReleaseOutcome::Missing => Err(CrmError::NotFound("lead")),
        ReleaseOutcome::NotHeld => Err(CrmError::invalid("lead is already unclaimed")),
        ReleaseOutcome::HeldBy(_) => Err(CrmError::conflict(
            "lead was reassigned before it could be released",
        )),
    }
}
