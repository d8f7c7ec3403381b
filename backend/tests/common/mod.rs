use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{NaiveDateTime, Utc};
use crm_backend::auth::jwt::JwtService;
use crm_backend::auth::password::hash_password;
use crm_backend::config::{AppConfig, DEFAULT_AUTOMATION_INTERVAL_SECONDS};
use crm_backend::leads::transitions::apply_status;
use crm_backend::models::{
    HistoryNote, Lead, LeadChanges, LeadStatus, NewLead, NewTask, NewUser, Role, StatusHistory,
    Task, TaskChanges, TaskStatus, User,
};
use crm_backend::policy::Actor;
use crm_backend::routes;
use crm_backend::state::AppState;
use crm_backend::store::{
    ClaimOutcome, CrmStore, LeadFilter, LeadMatchKey, Pagination, ReleaseOutcome, StoreError,
    StoreResult, TaskCompletion, TaskFilter, TransitionOutcome,
};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
struct Records {
    users: Vec<User>,
    leads: HashMap<Uuid, Lead>,
    history: Vec<StatusHistory>,
    tasks: HashMap<Uuid, Task>,
}

/// `CrmStore` over plain collections. One lock guards every record so each
/// call is atomic, like a transaction in the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
    failing_leads: Mutex<HashSet<Uuid>>,
    offline: Mutex<bool>,
}

#[allow(dead_code)]
impl MemoryStore {
    /// Makes every later transition of `lead_id` fail with a store error.
    pub async fn fail_transitions_for(&self, lead_id: Uuid) {
        self.failing_leads.lock().await.insert(lead_id);
    }

    /// Makes every call fail until switched back.
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.lock().await = offline;
    }

    pub async fn edit_lead(&self, lead_id: Uuid, edit: impl FnOnce(&mut Lead)) -> Result<Lead> {
        let mut records = self.records.lock().await;
        let lead = records
            .leads
            .get_mut(&lead_id)
            .ok_or_else(|| anyhow!("lead {lead_id} missing"))?;
        edit(lead);
        Ok(lead.clone())
    }

    pub async fn edit_task(&self, task_id: Uuid, edit: impl FnOnce(&mut Task)) -> Result<Task> {
        let mut records = self.records.lock().await;
        let task = records
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("task {task_id} missing"))?;
        edit(task);
        Ok(task.clone())
    }

    pub async fn history_len(&self) -> usize {
        self.records.lock().await.history.len()
    }

    async fn check_online(&self) -> StoreResult<()> {
        if *self.offline.lock().await {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value.map(|v| v.trim().to_lowercase())
}

fn page_of<T: Clone>(items: Vec<T>, page: Pagination) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.per_page as usize)
        .collect()
}

#[async_trait]
impl CrmStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        self.check_online().await?;
        let now = Utc::now().naive_utc();
        let user = User {
            id: user.id,
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().await.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records.users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records
            .users
            .iter()
            .filter(|user| role.map_or(true, |role| user.role == role))
            .cloned()
            .collect())
    }

    async fn insert_lead(&self, lead: NewLead) -> StoreResult<Lead> {
        self.check_online().await?;
        let now = Utc::now().naive_utc();
        let lead = Lead {
            id: lead.id,
            name: lead.name,
            email: lead.email,
            company: lead.company,
            profile_url: lead.profile_url,
            post_url: lead.post_url,
            website: lead.website,
            notes: lead.notes,
            status: LeadStatus::New,
            system: lead.system,
            assigned_to_id: lead.assigned_to_id,
            created_by_id: lead.created_by_id,
            texted_at: None,
            first_followup_at: None,
            second_followup_at: None,
            replied_at: None,
            created_at: now,
            updated_at: now,
        };
        self.records
            .lock()
            .await
            .leads
            .insert(lead.id, lead.clone());
        Ok(lead)
    }

    async fn find_lead(&self, id: Uuid) -> StoreResult<Option<Lead>> {
        self.check_online().await?;
        Ok(self.records.lock().await.leads.get(&id).cloned())
    }

    async fn find_lead_by(&self, key: &LeadMatchKey) -> StoreResult<Option<Lead>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        let mut matches: Vec<&Lead> = records
            .leads
            .values()
            .filter(|lead| match key {
                LeadMatchKey::Email(email) => {
                    normalized(lead.email.as_deref()).as_ref() == Some(email)
                }
                LeadMatchKey::ProfileUrl(url) => {
                    normalized(lead.profile_url.as_deref()).as_ref() == Some(url)
                }
                LeadMatchKey::NameCompany { name, company } => {
                    normalized(Some(&lead.name)).as_ref() == Some(name)
                        && normalized(lead.company.as_deref()).as_ref() == Some(company)
                }
            })
            .collect();
        matches.sort_by_key(|lead| lead.created_at);
        Ok(matches.first().map(|lead| (*lead).clone()))
    }

    async fn list_leads(&self, filter: &LeadFilter, page: Pagination) -> StoreResult<Vec<Lead>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        let mut leads: Vec<Lead> = records
            .leads
            .values()
            .filter(|lead| filter.matches(lead))
            .cloned()
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page_of(leads, page))
    }

    async fn count_leads(&self, filter: &LeadFilter) -> StoreResult<i64> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records
            .leads
            .values()
            .filter(|lead| filter.matches(lead))
            .count() as i64)
    }

    async fn update_lead(
        &self,
        id: Uuid,
        changes: LeadChanges,
        note: Option<HistoryNote>,
    ) -> StoreResult<Option<Lead>> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        let Some(lead) = records.leads.get_mut(&id) else {
            return Ok(None);
        };
        let at = note
            .as_ref()
            .map(|note| note.at)
            .unwrap_or_else(|| Utc::now().naive_utc());
        let reassigned = changes.apply_to(lead);
        lead.updated_at = at;
        let lead = lead.clone();
        if let (true, Some(note)) = (reassigned, note) {
            records
                .history
                .push(note.into_entry(id, Some(lead.status), lead.status));
        }
        Ok(Some(lead))
    }

    async fn delete_lead(&self, id: Uuid) -> StoreResult<bool> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        let removed = records.leads.remove(&id).is_some();
        records.history.retain(|entry| entry.lead_id != id);
        Ok(removed)
    }

    async fn transition_lead(
        &self,
        id: Uuid,
        expected: Option<LeadStatus>,
        new_status: LeadStatus,
        note: HistoryNote,
    ) -> StoreResult<TransitionOutcome> {
        self.check_online().await?;
        if self.failing_leads.lock().await.contains(&id) {
            return Err(StoreError::Unavailable(format!("injected failure for {id}")));
        }
        let mut records = self.records.lock().await;
        let Some(lead) = records.leads.get_mut(&id) else {
            return Ok(TransitionOutcome::Missing);
        };
        if expected.is_some_and(|expected| lead.status != expected) {
            return Ok(TransitionOutcome::Skipped {
                current: lead.status,
            });
        }
        let old_status = apply_status(lead, new_status, note.at);
        let lead = lead.clone();
        let entry = note.into_entry(id, Some(old_status), new_status);
        records.history.push(entry.clone());
        Ok(TransitionOutcome::Applied { lead, entry })
    }

    async fn claim_lead(
        &self,
        id: Uuid,
        claimant: Uuid,
        note: HistoryNote,
    ) -> StoreResult<ClaimOutcome> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        let Some(lead) = records.leads.get_mut(&id) else {
            return Ok(ClaimOutcome::Missing);
        };
        if let Some(holder) = lead.assigned_to_id.filter(|holder| *holder != claimant) {
            return Ok(ClaimOutcome::HeldBy(holder));
        }
        lead.assigned_to_id = Some(claimant);
        lead.updated_at = note.at;
        let lead = lead.clone();
        records
            .history
            .push(note.into_entry(id, Some(lead.status), lead.status));
        Ok(ClaimOutcome::Claimed(lead))
    }

    async fn release_lead(
        &self,
        id: Uuid,
        holder: Option<Uuid>,
        note: HistoryNote,
    ) -> StoreResult<ReleaseOutcome> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        let Some(lead) = records.leads.get_mut(&id) else {
            return Ok(ReleaseOutcome::Missing);
        };
        let Some(assignee) = lead.assigned_to_id else {
            return Ok(ReleaseOutcome::NotHeld);
        };
        if holder.is_some_and(|holder| holder != assignee) {
            return Ok(ReleaseOutcome::HeldBy(assignee));
        }
        lead.assigned_to_id = None;
        lead.updated_at = note.at;
        let lead = lead.clone();
        records
            .history
            .push(note.into_entry(id, Some(lead.status), lead.status));
        Ok(ReleaseOutcome::Released(lead))
    }

    async fn lead_history(&self, lead_id: Uuid) -> StoreResult<Vec<StatusHistory>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records
            .history
            .iter()
            .filter(|entry| entry.lead_id == lead_id)
            .cloned()
            .collect())
    }

    async fn stale_second_followups(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Uuid>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records
            .leads
            .values()
            .filter(|lead| {
                lead.status == LeadStatus::SecondFollowup
                    && lead.second_followup_at.is_some_and(|at| at <= cutoff)
            })
            .map(|lead| lead.id)
            .collect())
    }

    async fn insert_task(&self, task: NewTask) -> StoreResult<Task> {
        self.check_online().await?;
        let task = Task {
            id: task.id,
            title: task.title,
            description: task.description,
            assigned_to_id: task.assigned_to_id,
            created_by_id: task.created_by_id,
            status: TaskStatus::Undone,
            created_at: task.created_at,
            due_at: task.due_at,
            completed_at: None,
        };
        self.records
            .lock()
            .await
            .tasks
            .insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        self.check_online().await?;
        Ok(self.records.lock().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter, page: Pagination) -> StoreResult<Vec<Task>> {
        self.check_online().await?;
        let records = self.records.lock().await;
        let mut tasks: Vec<Task> = records
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.id.cmp(&b.id)));
        Ok(page_of(tasks, page))
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> StoreResult<i64> {
        self.check_online().await?;
        let records = self.records.lock().await;
        Ok(records
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .count() as i64)
    }

    async fn update_task(&self, id: Uuid, changes: TaskChanges) -> StoreResult<Option<Task>> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        Ok(records.tasks.get_mut(&id).map(|task| {
            changes.apply_to(task);
            task.clone()
        }))
    }

    async fn complete_task(&self, id: Uuid, at: NaiveDateTime) -> StoreResult<TaskCompletion> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        let Some(task) = records.tasks.get_mut(&id) else {
            return Ok(TaskCompletion::Missing);
        };
        if task.status != TaskStatus::Undone {
            return Ok(TaskCompletion::Unchanged(task.clone()));
        }
        task.status = TaskStatus::Done;
        task.completed_at = Some(at);
        Ok(TaskCompletion::Completed(task.clone()))
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool> {
        self.check_online().await?;
        Ok(self.records.lock().await.tasks.remove(&id).is_some())
    }

    async fn backlog_overdue_tasks(&self, now: NaiveDateTime) -> StoreResult<u64> {
        self.check_online().await?;
        let mut records = self.records.lock().await;
        let mut moved = 0;
        for task in records.tasks.values_mut() {
            if task.status == TaskStatus::Undone && task.due_at < now {
                task.status = TaskStatus::Backlog;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused@localhost/unused".to_string(),
        database_max_pool_size: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cors_allowed_origin: None,
        automation_interval_seconds: DEFAULT_AUTOMATION_INTERVAL_SECONDS,
        automation_actor: None,
    }
}

pub fn actor(user: &User) -> Actor {
    Actor::new(user.id, user.role)
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    router: Router,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::default());
        let store_for_state: Arc<dyn CrmStore> = store.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(store_for_state, config, jwt);
        let router = routes::create_router(state.clone());
        Ok(Self {
            state,
            store,
            router,
        })
    }

    /// Inserts a user with a placeholder hash; enough for token-based tests.
    pub async fn add_user(&self, username: &str, role: Role) -> Result<User> {
        Ok(self
            .store
            .insert_user(NewUser {
                id: Uuid::new_v4(),
                username: username.to_string(),
                password_hash: "unused".to_string(),
                role,
            })
            .await?)
    }

    pub async fn add_user_with_password(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<User> {
        Ok(self
            .store
            .insert_user(NewUser {
                id: Uuid::new_v4(),
                username: username.to_string(),
                password_hash: hash_password(password)?,
                role,
            })
            .await?)
    }

    pub fn token_for(&self, user: &User) -> Result<String> {
        self.state
            .jwt
            .generate_token(user.id, &user.username, user.role)
    }

    pub async fn add_lead(&self, name: &str) -> Result<Lead> {
        Ok(self
            .store
            .insert_lead(NewLead {
                id: Uuid::new_v4(),
                name: name.to_string(),
                ..Default::default()
            })
            .await?)
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = read_json(response).await?;
        Ok(parsed.access_token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::POST, path, Some(serde_json::to_vec(payload)?), token)
            .await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::PATCH, path, Some(serde_json::to_vec(payload)?), token)
            .await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::POST, path, None, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, None, token).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}
