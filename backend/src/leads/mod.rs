use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::automation::Automation;
use crate::error::{CrmError, CrmResult};
use crate::models::{
    ActorKind, HistoryNote, Lead, LeadChanges, LeadStatus, LeadSystem, NewLead, StatusHistory,
};
use crate::policy::{self, Actor, LeadOperation, LeadScope};
use crate::store::{
    CrmStore, DayWindow, LeadAction, LeadDateField, LeadFilter, Page, Pagination,
};

pub mod claims;
pub mod import;
pub mod transitions;

pub use claims::{claim, unclaim};
pub use import::{import_leads, ImportCandidate, ImportReport};
pub use transitions::{change_status, recompute_status};

pub const REASSIGN_REASON: &str = "Lead reassigned";
pub const DEFAULT_STALE_DAYS: i64 = 3;

/// Widest value the bounded text columns accept (`leads.name`, `email`,
/// `company`, `tasks.title`).
pub const MAX_TEXT_LEN: usize = 255;
pub const MAX_USERNAME_LEN: usize = 100;

/// Rejects values the column would refuse, counting characters as
/// Postgres does for VARCHAR.
pub fn ensure_fits(field: &str, value: &str, limit: usize) -> CrmResult<()> {
    if value.chars().count() > limit {
        return Err(CrmError::invalid(format!(
            "{field} must be at most {limit} characters"
        )));
    }
    Ok(())
}

pub(crate) fn check_widths(
    name: Option<&str>,
    email: Option<&str>,
    company: Option<&str>,
) -> CrmResult<()> {
    for (field, value) in [("name", name), ("email", email), ("company", company)] {
        if let Some(value) = value {
            ensure_fits(field, value, MAX_TEXT_LEN)?;
        }
    }
    Ok(())
}

pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_nullable(value: Option<Option<String>>) -> Option<Option<String>> {
    value.map(clean_optional)
}

#[derive(Debug, Clone, Default)]
pub struct LeadInput {
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub profile_url: Option<String>,
    pub post_url: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
    pub system: Option<LeadSystem>,
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(LeadStatus),
}

/// Named listing presets as requested by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPreset {
    Unclaimed,
    TextedStale,
    FirstFollowupStale,
    RepliedStale,
}

impl std::str::FromStr for ActionPreset {
    type Err = CrmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "unclaimed" => Ok(ActionPreset::Unclaimed),
            "texted_stale" => Ok(ActionPreset::TextedStale),
            "first_followup_stale" => Ok(ActionPreset::FirstFollowupStale),
            "replied_stale" => Ok(ActionPreset::RepliedStale),
            other => Err(CrmError::invalid(format!("unknown action filter '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeadQuery {
    pub status: Option<StatusFilter>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub date: Option<(LeadDateField, DayWindow)>,
    pub action: Option<ActionPreset>,
    pub stale_days: Option<i64>,
}

impl LeadQuery {
    /// Combines the client's filters with the actor's scope.
    pub fn into_filter(self, actor: &Actor) -> CrmResult<LeadFilter> {
        let mut filter = LeadFilter::scoped(LeadScope::for_actor(actor));
        filter.status = match self.status {
            Some(StatusFilter::Only(status)) => Some(status),
            Some(StatusFilter::All) | None => None,
        };
        filter.assigned_to = self.assigned_to;
        filter.search = clean_optional(self.search);
        filter.date = self.date;

        let stale_days = self.stale_days.unwrap_or(DEFAULT_STALE_DAYS);
        if stale_days < 0 {
            return Err(CrmError::invalid("stale_days must not be negative"));
        }
        let cutoff = Utc::now().naive_utc() - Duration::days(stale_days);
        let stale = |status| LeadAction::StaleSince { status, cutoff };
        filter.action = self.action.map(|preset| match preset {
            ActionPreset::Unclaimed => LeadAction::Unclaimed,
            ActionPreset::TextedStale => stale(LeadStatus::Texted),
            ActionPreset::FirstFollowupStale => stale(LeadStatus::FirstFollowup),
            ActionPreset::RepliedStale => stale(LeadStatus::Replied),
        });
        Ok(filter)
    }
}

async fn load(store: &dyn CrmStore, lead_id: Uuid) -> CrmResult<Lead> {
    store
        .find_lead(lead_id)
        .await?
        .ok_or(CrmError::NotFound("lead"))
}

async fn ensure_user_exists(store: &dyn CrmStore, user_id: Uuid) -> CrmResult<()> {
    match store.find_user(user_id).await? {
        Some(_) => Ok(()),
        None => Err(CrmError::NotFound("user")),
    }
}

pub async fn create_lead(
    store: &dyn CrmStore,
    actor: &Actor,
    input: LeadInput,
) -> CrmResult<Lead> {
    if !policy::can_create_leads(actor) {
        return Err(CrmError::forbidden(format!(
            "{} may not create leads",
            actor.role
        )));
    }

    let name = input.name.trim();
    if name.is_empty() {
        return Err(CrmError::invalid("name must not be empty"));
    }

    let email = clean_optional(input.email);
    let company = clean_optional(input.company);
    check_widths(Some(name), email.as_deref(), company.as_deref())?;

    let assigned_to_id = if actor.is_admin() {
        input.assigned_to_id
    } else {
        None
    };
    if let Some(assignee) = assigned_to_id {
        ensure_user_exists(store, assignee).await?;
    }

    let lead = store
        .insert_lead(NewLead {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            company,
            profile_url: clean_optional(input.profile_url),
            post_url: clean_optional(input.post_url),
            website: clean_optional(input.website),
            notes: clean_optional(input.notes),
            system: input.system.unwrap_or_default(),
            assigned_to_id,
            created_by_id: Some(actor.id),
        })
        .await?;

    info!(lead_id = %lead.id, actor_id = %actor.id, "lead created");
    Ok(lead)
}

pub async fn get_lead(store: &dyn CrmStore, actor: &Actor, lead_id: Uuid) -> CrmResult<Lead> {
    let lead = load(store, lead_id).await?;
    policy::authorize(actor, &lead, LeadOperation::View)?;
    Ok(lead)
}

pub async fn update_lead(
    store: &dyn CrmStore,
    actor: &Actor,
    lead_id: Uuid,
    mut changes: LeadChanges,
) -> CrmResult<Lead> {
    let lead = load(store, lead_id).await?;
    policy::authorize(actor, &lead, LeadOperation::Edit)?;
    policy::strip_assignment(actor, &mut changes);

    if let Some(name) = changes.name.as_mut() {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CrmError::invalid("name must not be empty"));
        }
        *name = trimmed.to_string();
    }
    changes.email = clean_nullable(changes.email);
    changes.company = clean_nullable(changes.company);
    changes.profile_url = clean_nullable(changes.profile_url);
    changes.post_url = clean_nullable(changes.post_url);
    changes.website = clean_nullable(changes.website);
    changes.notes = clean_nullable(changes.notes);
    check_widths(
        changes.name.as_deref(),
        changes.email.as_ref().and_then(Option::as_deref),
        changes.company.as_ref().and_then(Option::as_deref),
    )?;

    if changes.is_empty() {
        return Ok(lead);
    }

    let note = match changes.assigned_to_id {
        Some(assignee) if assignee != lead.assigned_to_id => {
            policy::authorize(actor, &lead, LeadOperation::Reassign)?;
            if let Some(user_id) = assignee {
                ensure_user_exists(store, user_id).await?;
            }
            Some(HistoryNote {
                user_id: Some(actor.id),
                actor_kind: ActorKind::Human,
                reason: Some(REASSIGN_REASON.to_string()),
                at: Utc::now().naive_utc(),
            })
        }
        _ => None,
    };

    let updated = store
        .update_lead(lead_id, changes, note)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    info!(lead_id = %updated.id, actor_id = %actor.id, "lead updated");
    Ok(updated)
}

pub async fn delete_lead(store: &dyn CrmStore, actor: &Actor, lead_id: Uuid) -> CrmResult<()> {
    let lead = load(store, lead_id).await?;
    policy::authorize(actor, &lead, LeadOperation::Delete)?;
    if !store.delete_lead(lead_id).await? {
        return Err(CrmError::NotFound("lead"));
    }
    info!(lead_id = %lead_id, actor_id = %actor.id, "lead deleted");
    Ok(())
}

/// Lists leads inside the actor's scope. Status-filtered listings first give
/// the stale follow-up rule a chance to run.
pub async fn list_leads(
    store: &dyn CrmStore,
    automation: &Automation,
    actor: &Actor,
    query: LeadQuery,
    page: Pagination,
) -> CrmResult<Page<Lead>> {
    if query.status.is_some() {
        let now = Utc::now().naive_utc();
        if let Err(err) = automation.junk_stale_followups(store, now).await {
            warn!(error = %err, "opportunistic follow-up sweep failed");
        }
    }

    let filter = query.into_filter(actor)?;
    let items = store.list_leads(&filter, page).await?;
    let total = store.count_leads(&filter).await?;
    Ok(Page {
        items,
        total,
        page: page.page,
        per_page: page.per_page,
    })
}

pub async fn lead_history(
    store: &dyn CrmStore,
    actor: &Actor,
    lead_id: Uuid,
) -> CrmResult<Vec<StatusHistory>> {
    let lead = load(store, lead_id).await?;
    policy::authorize(actor, &lead, LeadOperation::View)?;
    Ok(store.lead_history(lead_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn query_is_always_scoped_by_role() {
        let outreach = Actor::new(Uuid::new_v4(), Role::Outreach);
        let query = LeadQuery {
            status: Some(StatusFilter::All),
            assigned_to: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let filter = query.into_filter(&outreach).unwrap();
        assert_eq!(filter.scope, LeadScope::UnclaimedOrOwnedBy(outreach.id));
        assert_eq!(filter.status, None);
        assert!(filter.assigned_to.is_some());
    }

    #[test]
    fn presets_translate_to_milestone_cutoffs() {
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);
        let query = LeadQuery {
            action: Some(ActionPreset::RepliedStale),
            stale_days: Some(5),
            ..Default::default()
        };
        let filter = query.into_filter(&admin).unwrap();
        match filter.action {
            Some(LeadAction::StaleSince { status, cutoff }) => {
                assert_eq!(status, LeadStatus::Replied);
                let expected = Utc::now().naive_utc() - Duration::days(5);
                assert!((expected - cutoff).num_seconds().abs() < 5);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_presets_and_negative_windows() {
        assert!("stale".parse::<ActionPreset>().is_err());
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);
        let query = LeadQuery {
            stale_days: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            query.into_filter(&admin),
            Err(CrmError::InvalidInput(_))
        ));
    }

    #[test]
    fn blank_optional_fields_become_null() {
        assert_eq!(clean_optional(Some("  ".into())), None);
        assert_eq!(clean_optional(Some(" a ".into())).as_deref(), Some("a"));
        assert_eq!(clean_nullable(Some(Some(" ".into()))), Some(None));
        assert_eq!(clean_nullable(None), None);
    }
}
