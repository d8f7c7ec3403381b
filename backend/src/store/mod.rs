use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    HistoryNote, Lead, LeadChanges, LeadStatus, NewLead, NewTask, NewUser, Role, StatusHistory,
    Task, TaskChanges, TaskStatus, UnknownVariant, User,
};
use crate::policy::{LeadScope, TaskScope};

pub mod postgres;

pub use postgres::PgStore;

pub const DEFAULT_PAGE_SIZE: i64 = 25;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("store task failed: {0}")]
    Task(String),
    #[error("invalid stored value: {0}")]
    Decode(#[from] UnknownVariant),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Half-open `[start, end)` range covering one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN);
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadDateField {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDateField {
    Created,
    Due,
}

/// Named listing presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadAction {
    Unclaimed,
    /// Leads sitting in `status` whose milestone timestamp is at or before
    /// `cutoff`.
    StaleSince {
        status: LeadStatus,
        cutoff: NaiveDateTime,
    },
}

/// Lead listing predicate. The role scope is mandatory; every other field
/// narrows it further.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadFilter {
    pub scope: LeadScope,
    pub status: Option<LeadStatus>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub date: Option<(LeadDateField, DayWindow)>,
    pub action: Option<LeadAction>,
}

impl LeadFilter {
    pub fn scoped(scope: LeadScope) -> Self {
        Self {
            scope,
            status: None,
            assigned_to: None,
            search: None,
            date: None,
            action: None,
        }
    }

    /// Reference semantics of the filter for stores that evaluate it in
    /// memory. SQL stores must agree with this.
    pub fn matches(&self, lead: &Lead) -> bool {
        if !self.scope.permits(lead) {
            return false;
        }
        if let Some(status) = self.status {
            if lead.status != status {
                return false;
            }
        }
        if let Some(assignee) = self.assigned_to {
            if lead.assigned_to_id != Some(assignee) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = |value: Option<&str>| {
                value
                    .map(|v| v.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            };
            if !(hit(Some(&lead.name)) || hit(lead.email.as_deref()) || hit(lead.company.as_deref()))
            {
                return false;
            }
        }
        if let Some((field, window)) = self.date {
            let at = match field {
                LeadDateField::Created => lead.created_at,
                LeadDateField::Updated => lead.updated_at,
            };
            if !window.contains(at) {
                return false;
            }
        }
        match self.action {
            None => true,
            Some(LeadAction::Unclaimed) => lead.assigned_to_id.is_none(),
            Some(LeadAction::StaleSince { status, cutoff }) => {
                lead.status == status
                    && status
                        .milestone()
                        .and_then(|milestone| lead.milestone_at(milestone))
                        .map(|at| at <= cutoff)
                        .unwrap_or(false)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFilter {
    pub scope: TaskScope,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Uuid>,
    pub date: Option<(TaskDateField, DayWindow)>,
}

impl TaskFilter {
    pub fn scoped(scope: TaskScope) -> Self {
        Self {
            scope,
            status: None,
            assigned_to: None,
            date: None,
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.scope.permits(task) {
            return false;
        }
        if self.status.is_some_and(|status| task.status != status) {
            return false;
        }
        if self
            .assigned_to
            .is_some_and(|assignee| task.assigned_to_id != assignee)
        {
            return false;
        }
        match self.date {
            Some((TaskDateField::Created, window)) => window.contains(task.created_at),
            Some((TaskDateField::Due, window)) => window.contains(task.due_at),
            None => true,
        }
    }
}

/// Keys used to detect an already-known lead during import, in priority
/// order. Values are normalised by the constructor in `leads::import`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeadMatchKey {
    Email(String),
    ProfileUrl(String),
    NameCompany { name: String, company: String },
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied { lead: Lead, entry: StatusHistory },
    Missing,
    /// The guard status no longer held when the row was locked.
    Skipped { current: LeadStatus },
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Lead),
    Missing,
    HeldBy(Uuid),
}

#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Released(Lead),
    Missing,
    NotHeld,
    HeldBy(Uuid),
}

#[derive(Debug, Clone)]
pub enum TaskCompletion {
    Completed(Task),
    Missing,
    /// The task was no longer `undone`; carries its current state.
    Unchanged(Task),
}

/// Persistence boundary of the engine. Every method is one round-trip, and
/// methods that write a lead together with a history row do so atomically.
#[async_trait]
pub trait CrmStore: Send + Sync + 'static {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Users ordered by creation time, oldest first.
    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>>;

    async fn insert_lead(&self, lead: NewLead) -> StoreResult<Lead>;

    async fn find_lead(&self, id: Uuid) -> StoreResult<Option<Lead>>;

    async fn find_lead_by(&self, key: &LeadMatchKey) -> StoreResult<Option<Lead>>;

    /// Matching leads, newest first (`created_at` desc, then `id` desc).
    async fn list_leads(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<Vec<Lead>>;

    async fn count_leads(&self, filter: &LeadFilter) -> StoreResult<i64>;

    /// Applies field changes. When the assignee actually changes and a note
    /// is given, a history row with unchanged status is appended in the same
    /// transaction.
    async fn update_lead(
        &self,
        id: Uuid,
        changes: LeadChanges,
        note: Option<HistoryNote>,
    ) -> StoreResult<Option<Lead>>;

    /// Hard delete; history rows go with the lead.
    async fn delete_lead(&self, id: Uuid) -> StoreResult<bool>;

    /// Moves a lead to `new_status` via `leads::transitions::apply_status`
    /// and appends the matching history row. With `expected` set the write
    /// only happens while the lead is still in that status.
    async fn transition_lead(
        &self,
        id: Uuid,
        expected: Option<LeadStatus>,
        new_status: LeadStatus,
        note: HistoryNote,
    ) -> StoreResult<TransitionOutcome>;

    /// Sets the assignee to `claimant` only while it is null or already
    /// `claimant`.
    async fn claim_lead(
        &self,
        id: Uuid,
        claimant: Uuid,
        note: HistoryNote,
    ) -> StoreResult<ClaimOutcome>;

    /// Clears a non-null assignee; with `holder` set only while the lead is
    /// still held by that user.
    async fn release_lead(
        &self,
        id: Uuid,
        holder: Option<Uuid>,
        note: HistoryNote,
    ) -> StoreResult<ReleaseOutcome>;

    /// History rows of a lead, oldest first.
    async fn lead_history(&self, lead_id: Uuid) -> StoreResult<Vec<StatusHistory>>;

    /// Ids of leads in `second_followup` whose `second_followup_at` is at or
    /// before `cutoff`.
    async fn stale_second_followups(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Uuid>>;

    async fn insert_task(&self, task: NewTask) -> StoreResult<Task>;

    async fn find_task(&self, id: Uuid) -> StoreResult<Option<Task>>;

    /// Matching tasks ordered by due time, soonest first.
    async fn list_tasks(&self, filter: &TaskFilter, page: Pagination) -> StoreResult<Vec<Task>>;

    async fn count_tasks(&self, filter: &TaskFilter) -> StoreResult<i64>;

    async fn update_task(&self, id: Uuid, changes: TaskChanges) -> StoreResult<Option<Task>>;

    /// Marks the task done only while it is `undone`.
    async fn complete_task(&self, id: Uuid, at: NaiveDateTime) -> StoreResult<TaskCompletion>;

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool>;

    /// Moves every `undone` task due strictly before `now` to `backlog`.
    async fn backlog_overdue_tasks(&self, now: NaiveDateTime) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadSystem;
    use chrono::{TimeZone, Utc};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0)
            .unwrap()
            .naive_utc()
    }

    fn lead(status: LeadStatus, assignee: Option<Uuid>) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: "Alex Chen".into(),
            email: Some("alex@example.com".into()),
            company: Some("Northwind".into()),
            profile_url: None,
            post_url: None,
            website: None,
            notes: None,
            status,
            system: LeadSystem::Linkedin,
            assigned_to_id: assignee,
            created_by_id: None,
            texted_at: None,
            first_followup_at: None,
            second_followup_at: None,
            replied_at: None,
            created_at: at(10, 9),
            updated_at: at(11, 9),
        }
    }

    #[test]
    fn pagination_clamps_inputs() {
        let page = Pagination::new(Some(0), Some(1000));
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn day_window_is_half_open() {
        let window = DayWindow::for_date(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert!(window.contains(at(10, 0)));
        assert!(window.contains(at(10, 23)));
        assert!(!window.contains(at(11, 0)));
    }

    #[test]
    fn search_covers_name_email_and_company() {
        let candidate = lead(LeadStatus::New, None);
        let mut filter = LeadFilter::scoped(LeadScope::All);
        for needle in ["alex", "EXAMPLE.com", "northw"] {
            filter.search = Some(needle.into());
            assert!(filter.matches(&candidate), "{needle} should match");
        }
        filter.search = Some("globex".into());
        assert!(!filter.matches(&candidate));
    }

    #[test]
    fn scope_is_applied_before_client_filters() {
        let other = Uuid::new_v4();
        let candidate = lead(LeadStatus::Texted, Some(other));
        let mut filter = LeadFilter::scoped(LeadScope::UnclaimedOrOwnedBy(Uuid::new_v4()));
        filter.assigned_to = Some(other);
        filter.status = Some(LeadStatus::Texted);
        assert!(!filter.matches(&candidate));
    }

    #[test]
    fn stale_action_uses_the_status_milestone() {
        let mut candidate = lead(LeadStatus::Texted, None);
        candidate.texted_at = Some(at(1, 12));
        let mut filter = LeadFilter::scoped(LeadScope::All);
        filter.action = Some(LeadAction::StaleSince {
            status: LeadStatus::Texted,
            cutoff: at(2, 12),
        });
        assert!(filter.matches(&candidate));

        candidate.texted_at = Some(at(3, 12));
        assert!(!filter.matches(&candidate));

        candidate.status = LeadStatus::Replied;
        candidate.texted_at = Some(at(1, 12));
        assert!(!filter.matches(&candidate));
    }
}
