use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::sql;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use uuid::Uuid;

use crate::db::PgPool;
use crate::leads::transitions::apply_status;
use crate::models::{
    ActorKind, HistoryNote, Lead, LeadChanges, LeadStatus, Milestone, NewLead, NewTask, NewUser,
    Role, StatusHistory, Task, TaskChanges, TaskStatus, UnknownVariant, User,
};
use crate::policy::{LeadScope, TaskScope};
use crate::schema::{leads, status_history, tasks, users};

use super::{
    ClaimOutcome, CrmStore, LeadAction, LeadDateField, LeadFilter, LeadMatchKey, Pagination,
    ReleaseOutcome, StoreError, StoreResult, TaskCompletion, TaskDateField, TaskFilter,
    TransitionOutcome,
};

diesel::sql_function!(fn lower(x: Text) -> Text);

#[derive(Debug, Queryable)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = UnknownVariant;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            role: row.role.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
struct NewUserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Queryable)]
struct LeadRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    company: Option<String>,
    profile_url: Option<String>,
    post_url: Option<String>,
    website: Option<String>,
    notes: Option<String>,
    status: String,
    system: String,
    assigned_to_id: Option<Uuid>,
    created_by_id: Option<Uuid>,
    texted_at: Option<NaiveDateTime>,
    first_followup_at: Option<NaiveDateTime>,
    second_followup_at: Option<NaiveDateTime>,
    replied_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<LeadRow> for Lead {
    type Error = UnknownVariant;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        Ok(Lead {
            id: row.id,
            name: row.name,
            email: row.email,
            company: row.company,
            profile_url: row.profile_url,
            post_url: row.post_url,
            website: row.website,
            notes: row.notes,
            status: row.status.parse()?,
            system: row.system.parse()?,
            assigned_to_id: row.assigned_to_id,
            created_by_id: row.created_by_id,
            texted_at: row.texted_at,
            first_followup_at: row.first_followup_at,
            second_followup_at: row.second_followup_at,
            replied_at: row.replied_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = leads)]
struct NewLeadRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    company: Option<String>,
    profile_url: Option<String>,
    post_url: Option<String>,
    website: Option<String>,
    notes: Option<String>,
    status: String,
    system: String,
    assigned_to_id: Option<Uuid>,
    created_by_id: Option<Uuid>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

/// `None` leaves a column alone, `Some(None)` writes NULL.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = leads)]
struct LeadChangeset {
    name: Option<String>,
    email: Option<Option<String>>,
    company: Option<Option<String>>,
    profile_url: Option<Option<String>>,
    post_url: Option<Option<String>>,
    website: Option<Option<String>>,
    notes: Option<Option<String>>,
    system: Option<String>,
    assigned_to_id: Option<Option<Uuid>>,
    updated_at: NaiveDateTime,
}

impl LeadChangeset {
    fn new(changes: LeadChanges, at: NaiveDateTime) -> Self {
        Self {
            name: changes.name,
            email: changes.email,
            company: changes.company,
            profile_url: changes.profile_url,
            post_url: changes.post_url,
            website: changes.website,
            notes: changes.notes,
            system: changes.system.map(|system| system.as_str().to_string()),
            assigned_to_id: changes.assigned_to_id,
            updated_at: at,
        }
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = status_history)]
struct HistoryRow {
    id: Uuid,
    lead_id: Uuid,
    user_id: Option<Uuid>,
    actor_kind: String,
    old_status: Option<String>,
    new_status: String,
    reason: Option<String>,
    created_at: NaiveDateTime,
}

impl From<&StatusHistory> for HistoryRow {
    fn from(entry: &StatusHistory) -> Self {
        HistoryRow {
            id: entry.id,
            lead_id: entry.lead_id,
            user_id: entry.user_id,
            actor_kind: entry.actor_kind.as_str().to_string(),
            old_status: entry.old_status.map(|status| status.as_str().to_string()),
            new_status: entry.new_status.as_str().to_string(),
            reason: entry.reason.clone(),
            created_at: entry.created_at,
        }
    }
}

impl TryFrom<HistoryRow> for StatusHistory {
    type Error = UnknownVariant;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(StatusHistory {
            id: row.id,
            lead_id: row.lead_id,
            user_id: row.user_id,
            actor_kind: row.actor_kind.parse::<ActorKind>()?,
            old_status: row
                .old_status
                .map(|status| status.parse::<LeadStatus>())
                .transpose()?,
            new_status: row.new_status.parse()?,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Queryable)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    assigned_to_id: Uuid,
    created_by_id: Option<Uuid>,
    status: String,
    created_at: NaiveDateTime,
    due_at: NaiveDateTime,
    completed_at: Option<NaiveDateTime>,
}

impl TryFrom<TaskRow> for Task {
    type Error = UnknownVariant;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            assigned_to_id: row.assigned_to_id,
            created_by_id: row.created_by_id,
            status: row.status.parse()?,
            created_at: row.created_at,
            due_at: row.due_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
struct NewTaskRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    assigned_to_id: Uuid,
    created_by_id: Option<Uuid>,
    status: String,
    created_at: NaiveDateTime,
    due_at: NaiveDateTime,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = tasks)]
struct TaskChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    assigned_to_id: Option<Uuid>,
    created_at: Option<NaiveDateTime>,
    due_at: Option<NaiveDateTime>,
}

impl From<TaskChanges> for TaskChangeset {
    fn from(changes: TaskChanges) -> Self {
        Self {
            title: changes.title,
            description: changes.description,
            assigned_to_id: changes.assigned_to_id,
            created_at: changes.created_at,
            due_at: changes.due_at,
        }
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn lead_query(filter: &LeadFilter) -> leads::BoxedQuery<'static, Pg> {
    let mut query = leads::table.into_boxed();

    query = match filter.scope {
        LeadScope::All => query,
        LeadScope::UnclaimedNew => query
            .filter(leads::assigned_to_id.is_null())
            .filter(leads::status.eq(LeadStatus::New.as_str())),
        LeadScope::UnclaimedOrOwnedBy(owner) => query.filter(
            leads::assigned_to_id
                .is_null()
                .or(leads::assigned_to_id.assume_not_null().eq(owner)),
        ),
    };

    if let Some(status) = filter.status {
        query = query.filter(leads::status.eq(status.as_str()));
    }
    if let Some(assignee) = filter.assigned_to {
        query = query.filter(leads::assigned_to_id.assume_not_null().eq(assignee));
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        query = query.filter(
            leads::name
                .ilike(pattern.clone())
                .or(leads::email.assume_not_null().ilike(pattern.clone()))
                .or(leads::company.assume_not_null().ilike(pattern)),
        );
    }
    if let Some((field, window)) = filter.date {
        query = match field {
            LeadDateField::Created => query
                .filter(leads::created_at.ge(window.start))
                .filter(leads::created_at.lt(window.end)),
            LeadDateField::Updated => query
                .filter(leads::updated_at.ge(window.start))
                .filter(leads::updated_at.lt(window.end)),
        };
    }

    match filter.action {
        None => query,
        Some(LeadAction::Unclaimed) => query.filter(leads::assigned_to_id.is_null()),
        Some(LeadAction::StaleSince { status, cutoff }) => {
            let query = query.filter(leads::status.eq(status.as_str()));
            match status.milestone() {
                Some(Milestone::Texted) => {
                    query.filter(leads::texted_at.assume_not_null().le(cutoff))
                }
                Some(Milestone::FirstFollowup) => {
                    query.filter(leads::first_followup_at.assume_not_null().le(cutoff))
                }
                Some(Milestone::SecondFollowup) => {
                    query.filter(leads::second_followup_at.assume_not_null().le(cutoff))
                }
                Some(Milestone::Replied) => {
                    query.filter(leads::replied_at.assume_not_null().le(cutoff))
                }
                None => query.filter(sql::<Bool>("FALSE")),
            }
        }
    }
}

fn task_query(filter: &TaskFilter) -> tasks::BoxedQuery<'static, Pg> {
    let mut query = tasks::table.into_boxed();

    if let TaskScope::AssignedTo(user_id) = filter.scope {
        query = query.filter(tasks::assigned_to_id.eq(user_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(tasks::status.eq(status.as_str()));
    }
    if let Some(assignee) = filter.assigned_to {
        query = query.filter(tasks::assigned_to_id.eq(assignee));
    }
    if let Some((field, window)) = filter.date {
        query = match field {
            TaskDateField::Created => query
                .filter(tasks::created_at.ge(window.start))
                .filter(tasks::created_at.lt(window.end)),
            TaskDateField::Due => query
                .filter(tasks::due_at.ge(window.start))
                .filter(tasks::due_at.lt(window.end)),
        };
    }
    query
}

fn lock_lead(conn: &mut PgConnection, id: Uuid) -> StoreResult<Option<Lead>> {
    let row = leads::table
        .find(id)
        .for_update()
        .first::<LeadRow>(conn)
        .optional()?;
    Ok(row.map(Lead::try_from).transpose()?)
}

fn append_history(conn: &mut PgConnection, entry: &StatusHistory) -> StoreResult<()> {
    diesel::insert_into(status_history::table)
        .values(HistoryRow::from(entry))
        .execute(conn)?;
    Ok(())
}

fn write_status(conn: &mut PgConnection, lead: &Lead) -> StoreResult<()> {
    diesel::update(leads::table.find(lead.id))
        .set((
            leads::status.eq(lead.status.as_str()),
            leads::texted_at.eq(lead.texted_at),
            leads::first_followup_at.eq(lead.first_followup_at),
            leads::second_followup_at.eq(lead.second_followup_at),
            leads::replied_at.eq(lead.replied_at),
            leads::updated_at.eq(lead.updated_at),
        ))
        .execute(conn)?;
    Ok(())
}

fn write_assignee(
    conn: &mut PgConnection,
    id: Uuid,
    assignee: Option<Uuid>,
    at: NaiveDateTime,
) -> StoreResult<Lead> {
    let row = diesel::update(leads::table.find(id))
        .set((leads::assigned_to_id.eq(assignee), leads::updated_at.eq(at)))
        .get_result::<LeadRow>(conn)?;
    Ok(Lead::try_from(row)?)
}

/// Diesel-backed store. Every call checks out a pooled connection on the
/// blocking thread pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

#[async_trait]
impl CrmStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        self.run(move |conn| {
            let now = Utc::now().naive_utc();
            let row = diesel::insert_into(users::table)
                .values(NewUserRow {
                    id: user.id,
                    username: user.username,
                    password_hash: user.password_hash,
                    role: user.role.as_str().to_string(),
                    created_at: now,
                    updated_at: now,
                })
                .get_result::<UserRow>(conn)?;
            Ok(User::try_from(row)?)
        })
        .await
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.run(move |conn| {
            let row = users::table.find(id).first::<UserRow>(conn).optional()?;
            Ok(row.map(User::try_from).transpose()?)
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let username = username.to_string();
        self.run(move |conn| {
            let row = users::table
                .filter(users::username.eq(username))
                .first::<UserRow>(conn)
                .optional()?;
            Ok(row.map(User::try_from).transpose()?)
        })
        .await
    }

    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>> {
        self.run(move |conn| {
            let mut query = users::table.into_boxed();
            if let Some(role) = role {
                query = query.filter(users::role.eq(role.as_str()));
            }
            let rows = query
                .order((users::created_at.asc(), users::id.asc()))
                .load::<UserRow>(conn)?;
            Ok(rows
                .into_iter()
                .map(User::try_from)
                .collect::<Result<_, _>>()?)
        })
        .await
    }

    async fn insert_lead(&self, lead: NewLead) -> StoreResult<Lead> {
        self.run(move |conn| {
            let now = Utc::now().naive_utc();
            let row = diesel::insert_into(leads::table)
                .values(NewLeadRow {
                    id: lead.id,
                    name: lead.name,
                    email: lead.email,
                    company: lead.company,
                    profile_url: lead.profile_url,
                    post_url: lead.post_url,
                    website: lead.website,
                    notes: lead.notes,
                    status: LeadStatus::New.as_str().to_string(),
                    system: lead.system.as_str().to_string(),
                    assigned_to_id: lead.assigned_to_id,
                    created_by_id: lead.created_by_id,
                    created_at: now,
                    updated_at: now,
                })
                .get_result::<LeadRow>(conn)?;
            Ok(Lead::try_from(row)?)
        })
        .await
    }

    async fn find_lead(&self, id: Uuid) -> StoreResult<Option<Lead>> {
        self.run(move |conn| {
            let row = leads::table.find(id).first::<LeadRow>(conn).optional()?;
            Ok(row.map(Lead::try_from).transpose()?)
        })
        .await
    }

    async fn find_lead_by(&self, key: &LeadMatchKey) -> StoreResult<Option<Lead>> {
        let key = key.clone();
        self.run(move |conn| {
            let query = leads::table.into_boxed();
            let query = match key {
                LeadMatchKey::Email(email) => {
                    query.filter(lower(leads::email.assume_not_null()).eq(email))
                }
                LeadMatchKey::ProfileUrl(url) => {
                    query.filter(lower(leads::profile_url.assume_not_null()).eq(url))
                }
                LeadMatchKey::NameCompany { name, company } => query
                    .filter(lower(leads::name).eq(name))
                    .filter(lower(leads::company.assume_not_null()).eq(company)),
            };
            let row = query
                .order(leads::created_at.asc())
                .first::<LeadRow>(conn)
                .optional()?;
            Ok(row.map(Lead::try_from).transpose()?)
        })
        .await
    }

    async fn list_leads(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<Vec<Lead>> {
        let filter = filter.clone();
        self.run(move |conn| {
            let rows = lead_query(&filter)
                .order((leads::created_at.desc(), leads::id.desc()))
                .limit(page.per_page)
                .offset(page.offset())
                .load::<LeadRow>(conn)?;
            Ok(rows
                .into_iter()
                .map(Lead::try_from)
                .collect::<Result<_, _>>()?)
        })
        .await
    }

    async fn count_leads(&self, filter: &LeadFilter) -> StoreResult<i64> {
        let filter = filter.clone();
        self.run(move |conn| Ok(lead_query(&filter).count().get_result::<i64>(conn)?))
            .await
    }

    async fn update_lead(
        &self,
        id: Uuid,
        changes: LeadChanges,
        note: Option<HistoryNote>,
    ) -> StoreResult<Option<Lead>> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let Some(current) = lock_lead(conn, id)? else {
                    return Ok(None);
                };
                let reassigned = changes
                    .assigned_to_id
                    .is_some_and(|assignee| assignee != current.assigned_to_id);
                let at = note
                    .as_ref()
                    .map(|note| note.at)
                    .unwrap_or_else(|| Utc::now().naive_utc());

                let row = diesel::update(leads::table.find(id))
                    .set(LeadChangeset::new(changes, at))
                    .get_result::<LeadRow>(conn)?;
                let lead = Lead::try_from(row)?;

                if let (true, Some(note)) = (reassigned, note) {
                    append_history(conn, &note.into_entry(id, Some(lead.status), lead.status))?;
                }
                Ok(Some(lead))
            })
        })
        .await
    }

    async fn delete_lead(&self, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(leads::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn transition_lead(
        &self,
        id: Uuid,
        expected: Option<LeadStatus>,
        new_status: LeadStatus,
        note: HistoryNote,
    ) -> StoreResult<TransitionOutcome> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let Some(mut lead) = lock_lead(conn, id)? else {
                    return Ok(TransitionOutcome::Missing);
                };
                if expected.is_some_and(|expected| lead.status != expected) {
                    return Ok(TransitionOutcome::Skipped {
                        current: lead.status,
                    });
                }

                let old_status = apply_status(&mut lead, new_status, note.at);
                write_status(conn, &lead)?;
                let entry = note.into_entry(id, Some(old_status), new_status);
                append_history(conn, &entry)?;
                Ok(TransitionOutcome::Applied { lead, entry })
            })
        })
        .await
    }

    async fn claim_lead(
        &self,
        id: Uuid,
        claimant: Uuid,
        note: HistoryNote,
    ) -> StoreResult<ClaimOutcome> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let Some(current) = lock_lead(conn, id)? else {
                    return Ok(ClaimOutcome::Missing);
                };
                if let Some(holder) = current.assigned_to_id.filter(|holder| *holder != claimant) {
                    return Ok(ClaimOutcome::HeldBy(holder));
                }

                let claimed = diesel::update(
                    leads::table.find(id).filter(
                        leads::assigned_to_id
                            .is_null()
                            .or(leads::assigned_to_id.assume_not_null().eq(claimant)),
                    ),
                )
                .set((
                    leads::assigned_to_id.eq(Some(claimant)),
                    leads::updated_at.eq(note.at),
                ))
                .get_result::<LeadRow>(conn)
                .optional()?;

                let Some(row) = claimed else {
                    let holder = leads::table
                        .find(id)
                        .select(leads::assigned_to_id)
                        .first::<Option<Uuid>>(conn)?;
                    return Ok(match holder {
                        Some(holder) => ClaimOutcome::HeldBy(holder),
                        None => ClaimOutcome::Missing,
                    });
                };
                let lead = Lead::try_from(row)?;
                append_history(conn, &note.into_entry(id, Some(lead.status), lead.status))?;
                Ok(ClaimOutcome::Claimed(lead))
            })
        })
        .await
    }

    async fn release_lead(
        &self,
        id: Uuid,
        holder: Option<Uuid>,
        note: HistoryNote,
    ) -> StoreResult<ReleaseOutcome> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let Some(current) = lock_lead(conn, id)? else {
                    return Ok(ReleaseOutcome::Missing);
                };
                let Some(assignee) = current.assigned_to_id else {
                    return Ok(ReleaseOutcome::NotHeld);
                };
                if holder.is_some_and(|holder| holder != assignee) {
                    return Ok(ReleaseOutcome::HeldBy(assignee));
                }

                let lead = write_assignee(conn, id, None, note.at)?;
                append_history(conn, &note.into_entry(id, Some(lead.status), lead.status))?;
                Ok(ReleaseOutcome::Released(lead))
            })
        })
        .await
    }

    async fn lead_history(&self, lead_id: Uuid) -> StoreResult<Vec<StatusHistory>> {
        self.run(move |conn| {
            let rows = status_history::table
                .filter(status_history::lead_id.eq(lead_id))
                .order((status_history::created_at.asc(), status_history::id.asc()))
                .load::<HistoryRow>(conn)?;
            Ok(rows
                .into_iter()
                .map(StatusHistory::try_from)
                .collect::<Result<_, _>>()?)
        })
        .await
    }

    async fn stale_second_followups(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Uuid>> {
        self.run(move |conn| {
            Ok(leads::table
                .filter(leads::status.eq(LeadStatus::SecondFollowup.as_str()))
                .filter(leads::second_followup_at.assume_not_null().le(cutoff))
                .order(leads::second_followup_at.asc())
                .select(leads::id)
                .load::<Uuid>(conn)?)
        })
        .await
    }

    async fn insert_task(&self, task: NewTask) -> StoreResult<Task> {
        self.run(move |conn| {
            let row = diesel::insert_into(tasks::table)
                .values(NewTaskRow {
                    id: task.id,
                    title: task.title,
                    description: task.description,
                    assigned_to_id: task.assigned_to_id,
                    created_by_id: task.created_by_id,
                    status: TaskStatus::Undone.as_str().to_string(),
                    created_at: task.created_at,
                    due_at: task.due_at,
                })
                .get_result::<TaskRow>(conn)?;
            Ok(Task::try_from(row)?)
        })
        .await
    }

    async fn find_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        self.run(move |conn| {
            let row = tasks::table.find(id).first::<TaskRow>(conn).optional()?;
            Ok(row.map(Task::try_from).transpose()?)
        })
        .await
    }

    async fn list_tasks(&self, filter: &TaskFilter, page: Pagination) -> StoreResult<Vec<Task>> {
        let filter = filter.clone();
        self.run(move |conn| {
            let rows = task_query(&filter)
                .order((tasks::due_at.asc(), tasks::id.asc()))
                .limit(page.per_page)
                .offset(page.offset())
                .load::<TaskRow>(conn)?;
            Ok(rows
                .into_iter()
                .map(Task::try_from)
                .collect::<Result<_, _>>()?)
        })
        .await
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> StoreResult<i64> {
        let filter = filter.clone();
        self.run(move |conn| Ok(task_query(&filter).count().get_result::<i64>(conn)?))
            .await
    }

    async fn update_task(&self, id: Uuid, changes: TaskChanges) -> StoreResult<Option<Task>> {
        self.run(move |conn| {
            let row = if changes.is_empty() {
                tasks::table.find(id).first::<TaskRow>(conn).optional()?
            } else {
                diesel::update(tasks::table.find(id))
                    .set(TaskChangeset::from(changes))
                    .get_result::<TaskRow>(conn)
                    .optional()?
            };
            Ok(row.map(Task::try_from).transpose()?)
        })
        .await
    }

    async fn complete_task(&self, id: Uuid, at: NaiveDateTime) -> StoreResult<TaskCompletion> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let completed = diesel::update(
                    tasks::table
                        .find(id)
                        .filter(tasks::status.eq(TaskStatus::Undone.as_str())),
                )
                .set((
                    tasks::status.eq(TaskStatus::Done.as_str()),
                    tasks::completed_at.eq(Some(at)),
                ))
                .get_result::<TaskRow>(conn)
                .optional()?;

                if let Some(row) = completed {
                    return Ok(TaskCompletion::Completed(Task::try_from(row)?));
                }
                let current = tasks::table.find(id).first::<TaskRow>(conn).optional()?;
                Ok(match current {
                    Some(row) => TaskCompletion::Unchanged(Task::try_from(row)?),
                    None => TaskCompletion::Missing,
                })
            })
        })
        .await
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(tasks::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn backlog_overdue_tasks(&self, now: NaiveDateTime) -> StoreResult<u64> {
        self.run(move |conn| {
            let moved = diesel::update(
                tasks::table
                    .filter(tasks::status.eq(TaskStatus::Undone.as_str()))
                    .filter(tasks::due_at.lt(now)),
            )
            .set(tasks::status.eq(TaskStatus::Backlog.as_str()))
            .execute(conn)?;
            Ok(moved as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("alex"), "%alex%");
    }
}
