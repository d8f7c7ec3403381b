use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Task, TaskChanges, TaskStatus},
    state::AppState,
    store::{DayWindow, Page, Pagination, TaskDateField},
    tasks::{self, TaskInput, TaskQuery},
    utils::{
        json::{
            nullable_string, required_parsed, required_string, required_timestamp, JsonBody,
        },
        time::{opt_iso, parse_date, parse_timestamp, to_iso},
    },
};

use super::leads::{non_empty, parse_uuid};

#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub date: Option<String>,
    pub date_field: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ListTasksParams {
    fn into_query(self) -> AppResult<(TaskQuery, Pagination)> {
        let status = non_empty(self.status)
            .map(|raw| raw.parse::<TaskStatus>())
            .transpose()
            .map_err(|err| AppError::bad_request(err.to_string()))?;
        let assigned_to = non_empty(self.assigned_to)
            .map(|raw| parse_uuid("assigned_to", &raw))
            .transpose()?;
        let date = match non_empty(self.date) {
            None => None,
            Some(raw) => {
                let day = parse_date(&raw).map_err(AppError::bad_request)?;
                let field = match non_empty(self.date_field).as_deref() {
                    None | Some("due") => TaskDateField::Due,
                    Some("created") => TaskDateField::Created,
                    Some(other) => {
                        return Err(AppError::bad_request(format!(
                            "unknown date_field '{other}'"
                        )))
                    }
                };
                Some((field, DayWindow::for_date(day)))
            }
        };

        Ok((
            TaskQuery {
                status,
                assigned_to,
                date,
            },
            Pagination::new(self.page, self.per_page),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assigned_to_id: Uuid,
    pub created_at: Option<String>,
    pub due_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to_id: Uuid,
    pub created_by_id: Option<Uuid>,
    pub status: TaskStatus,
    pub created_at: String,
    pub due_at: String,
    pub completed_at: Option<String>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            assigned_to_id: task.assigned_to_id,
            created_by_id: task.created_by_id,
            status: task.status,
            created_at: to_iso(task.created_at),
            due_at: to_iso(task.due_at),
            completed_at: opt_iso(task.completed_at),
        }
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListTasksParams>,
) -> AppResult<Json<Page<TaskResponse>>> {
    let (query, page) = params.into_query()?;
    let tasks = tasks::list_tasks(state.store(), &user.actor(), query, page).await?;
    Ok(Json(tasks.map(TaskResponse::from)))
}

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<TaskResponse>)> {
    let timestamp = |raw: Option<String>| {
        non_empty(raw)
            .map(|raw| parse_timestamp(&raw))
            .transpose()
            .map_err(AppError::bad_request)
    };
    let input = TaskInput {
        title: payload.title,
        description: payload.description,
        assigned_to_id: payload.assigned_to_id,
        created_at: timestamp(payload.created_at)?,
        due_at: timestamp(payload.due_at)?,
    };
    let task = tasks::create_task(state.store(), &user.actor(), input).await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

pub async fn get_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<TaskResponse>> {
    let task = tasks::get_task(state.store(), &user.actor(), task_id).await?;
    Ok(Json(task.into()))
}

fn parse_task_changes(body: &Value) -> Result<TaskChanges, String> {
    if !body.is_object() {
        return Err("expected a JSON object".to_string());
    }
    Ok(TaskChanges {
        title: required_string(body, "title")?,
        description: nullable_string(body, "description")?,
        assigned_to_id: required_parsed::<Uuid>(body, "assigned_to_id")?,
        created_at: required_timestamp(body, "created_at")?,
        due_at: required_timestamp(body, "due_at")?,
    })
}

pub async fn update_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<TaskResponse>> {
    let changes = parse_task_changes(&body).map_err(AppError::bad_request)?;
    let task = tasks::edit_task(state.store(), &user.actor(), task_id, changes).await?;
    Ok(Json(task.into()))
}

pub async fn complete_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<TaskResponse>> {
    let task = tasks::complete_task(state.store(), &user.actor(), task_id).await?;
    Ok(Json(task.into()))
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    tasks::delete_task(state.store(), &user.actor(), task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
