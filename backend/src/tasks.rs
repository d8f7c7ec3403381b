//! Task lifecycle: `undone` moves to `done` by hand or to `backlog` when the
//! due time lapses.

use chrono::{Duration, NaiveDateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::automation;
use crate::error::{CrmError, CrmResult};
use crate::leads::{ensure_fits, MAX_TEXT_LEN};
use crate::models::{NewTask, Task, TaskChanges, TaskStatus};
use crate::policy::{self, Actor, TaskScope};
use crate::store::{CrmStore, DayWindow, Page, Pagination, TaskCompletion, TaskDateField, TaskFilter};

pub const DEFAULT_DUE_HOURS: i64 = 24;

#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub title: String,
    pub description: Option<String>,
    pub assigned_to_id: Uuid,
    pub created_at: Option<NaiveDateTime>,
    pub due_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Uuid>,
    pub date: Option<(TaskDateField, DayWindow)>,
}

impl TaskQuery {
    pub fn into_filter(self, actor: &Actor) -> TaskFilter {
        let mut filter = TaskFilter::scoped(TaskScope::for_actor(actor));
        filter.status = self.status;
        filter.assigned_to = self.assigned_to;
        filter.date = self.date;
        filter
    }
}

fn validate_window(created_at: NaiveDateTime, due_at: NaiveDateTime) -> CrmResult<()> {
    if due_at < created_at {
        return Err(CrmError::invalid("due_at must not be before created_at"));
    }
    Ok(())
}

fn clean_title(title: &str) -> CrmResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CrmError::invalid("title must not be empty"));
    }
    ensure_fits("title", title, MAX_TEXT_LEN)?;
    Ok(title.to_string())
}

async fn load(store: &dyn CrmStore, task_id: Uuid) -> CrmResult<Task> {
    store
        .find_task(task_id)
        .await?
        .ok_or(CrmError::NotFound("task"))
}

async fn ensure_assignee(store: &dyn CrmStore, user_id: Uuid) -> CrmResult<()> {
    if store.find_user(user_id).await?.is_none() {
        return Err(CrmError::NotFound("user"));
    }
    Ok(())
}

pub async fn create_task(store: &dyn CrmStore, actor: &Actor, input: TaskInput) -> CrmResult<Task> {
    policy::require_admin(actor, "create tasks")?;
    let title = clean_title(&input.title)?;

    let created_at = input.created_at.unwrap_or_else(|| Utc::now().naive_utc());
    let due_at = input
        .due_at
        .unwrap_or(created_at + Duration::hours(DEFAULT_DUE_HOURS));
    validate_window(created_at, due_at)?;
    ensure_assignee(store, input.assigned_to_id).await?;

    let task = store
        .insert_task(NewTask {
            id: Uuid::new_v4(),
            title,
            description: crate::leads::clean_optional(input.description),
            assigned_to_id: input.assigned_to_id,
            created_by_id: Some(actor.id),
            created_at,
            due_at,
        })
        .await?;

    info!(task_id = %task.id, assignee_id = %task.assigned_to_id, actor_id = %actor.id, "task created");
    Ok(task)
}

pub async fn get_task(store: &dyn CrmStore, actor: &Actor, task_id: Uuid) -> CrmResult<Task> {
    let task = load(store, task_id).await?;
    if !TaskScope::for_actor(actor).permits(&task) {
        return Err(CrmError::forbidden("task is assigned to someone else"));
    }
    Ok(task)
}

/// Lists tasks inside the actor's scope after moving lapsed tasks to the
/// backlog.
pub async fn list_tasks(
    store: &dyn CrmStore,
    actor: &Actor,
    query: TaskQuery,
    page: Pagination,
) -> CrmResult<Page<Task>> {
    if let Err(err) = automation::backlog_overdue_tasks(store, Utc::now().naive_utc()).await {
        warn!(error = %err, "opportunistic backlog sweep failed");
    }

    let filter = query.into_filter(actor);
    let items = store.list_tasks(&filter, page).await?;
    let total = store.count_tasks(&filter).await?;
    Ok(Page {
        items,
        total,
        page: page.page,
        per_page: page.per_page,
    })
}

/// Marks a task done. Completing a task that is already done returns it
/// unchanged; backlogged tasks stay in the backlog.
pub async fn complete_task(store: &dyn CrmStore, actor: &Actor, task_id: Uuid) -> CrmResult<Task> {
    let task = load(store, task_id).await?;
    if !policy::can_complete_task(actor, &task) {
        return Err(CrmError::forbidden(
            "only the assignee or an admin may complete this task",
        ));
    }

    let settled = |task: Task| match task.status {
        TaskStatus::Backlog => Err(CrmError::invalid("task is in the backlog")),
        _ => Ok(task),
    };

    if task.status != TaskStatus::Undone {
        return settled(task);
    }

    match store.complete_task(task_id, Utc::now().naive_utc()).await? {
        TaskCompletion::Completed(task) => {
            info!(task_id = %task.id, actor_id = %actor.id, "task completed");
            Ok(task)
        }
        TaskCompletion::Missing => Err(CrmError::NotFound("task")),
        TaskCompletion::Unchanged(task) => settled(task),
    }
}

pub async fn edit_task(
    store: &dyn CrmStore,
    actor: &Actor,
    task_id: Uuid,
    mut changes: TaskChanges,
) -> CrmResult<Task> {
    policy::require_admin(actor, "edit tasks")?;
    let task = load(store, task_id).await?;

    if let Some(title) = changes.title.as_deref() {
        changes.title = Some(clean_title(title)?);
    }
    changes.description = changes.description.map(crate::leads::clean_optional);
    if changes.is_empty() {
        return Ok(task);
    }

    validate_window(
        changes.created_at.unwrap_or(task.created_at),
        changes.due_at.unwrap_or(task.due_at),
    )?;
    if let Some(assignee) = changes.assigned_to_id {
        ensure_assignee(store, assignee).await?;
    }

    let updated = store
        .update_task(task_id, changes)
        .await?
        .ok_or(CrmError::NotFound("task"))?;
    info!(task_id = %updated.id, actor_id = %actor.id, "task updated");
    Ok(updated)
}

pub async fn delete_task(store: &dyn CrmStore, actor: &Actor, task_id: Uuid) -> CrmResult<()> {
    policy::require_admin(actor, "delete tasks")?;
    if !store.delete_task(task_id).await? {
        return Err(CrmError::NotFound("task"));
    }
    info!(task_id = %task_id, actor_id = %actor.id, "task deleted");
    Ok(())
}
