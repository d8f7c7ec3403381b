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
    leads::{
        self, ActionPreset, ImportCandidate, ImportReport, LeadInput, LeadQuery, StatusFilter,
    },
    models::{ActorKind, Lead, LeadChanges, LeadStatus, LeadSystem, StatusHistory},
    state::AppState,
    store::{DayWindow, LeadDateField, Page, Pagination},
    utils::{
        json::{nullable_string, nullable_uuid, required_parsed, required_string, JsonBody},
        time::{opt_iso, parse_date, to_iso},
    },
};

#[derive(Debug, Deserialize)]
pub struct ListLeadsParams {
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub search: Option<String>,
    pub date: Option<String>,
    pub date_field: Option<String>,
    pub action: Option<String>,
    pub stale_days: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ListLeadsParams {
    fn into_query(self) -> AppResult<(LeadQuery, Pagination)> {
        let status = match non_empty(self.status) {
            None => None,
            Some(raw) if raw.eq_ignore_ascii_case("all") => Some(StatusFilter::All),
            Some(raw) => Some(StatusFilter::Only(
                raw.parse::<LeadStatus>()
                    .map_err(|err| AppError::bad_request(err.to_string()))?,
            )),
        };
        let assigned_to = non_empty(self.assigned_to)
            .map(|raw| parse_uuid("assigned_to", &raw))
            .transpose()?;
        let date = match non_empty(self.date) {
            None => None,
            Some(raw) => {
                let day = parse_date(&raw).map_err(AppError::bad_request)?;
                let field = match non_empty(self.date_field).as_deref() {
                    None | Some("created") => LeadDateField::Created,
                    Some("updated") => LeadDateField::Updated,
                    Some(other) => {
                        return Err(AppError::bad_request(format!(
                            "unknown date_field '{other}'"
                        )))
                    }
                };
                Some((field, DayWindow::for_date(day)))
            }
        };
        let action = non_empty(self.action)
            .map(|raw| raw.parse::<ActionPreset>())
            .transpose()?;

        Ok((
            LeadQuery {
                status,
                assigned_to,
                search: self.search,
                date,
                action,
                stale_days: self.stale_days,
            },
            Pagination::new(self.page, self.per_page),
        ))
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_uuid(field: &str, raw: &str) -> AppResult<Uuid> {
    raw.trim()
        .parse::<Uuid>()
        .map_err(|_| AppError::bad_request(format!("{field}: invalid id '{raw}'")))
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
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

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: LeadStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportLeadsRequest {
    pub leads: Vec<ImportCandidate>,
}

#[derive(Debug, Serialize)]
pub struct LeadResponse {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub profile_url: Option<String>,
    pub post_url: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub system: LeadSystem,
    pub assigned_to_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
    pub texted_at: Option<String>,
    pub first_followup_at: Option<String>,
    pub second_followup_at: Option<String>,
    pub replied_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Lead> for LeadResponse {
    fn from(lead: Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.name,
            email: lead.email,
            company: lead.company,
            profile_url: lead.profile_url,
            post_url: lead.post_url,
            website: lead.website,
            notes: lead.notes,
            status: lead.status,
            system: lead.system,
            assigned_to_id: lead.assigned_to_id,
            created_by_id: lead.created_by_id,
            texted_at: opt_iso(lead.texted_at),
            first_followup_at: opt_iso(lead.first_followup_at),
            second_followup_at: opt_iso(lead.second_followup_at),
            replied_at: opt_iso(lead.replied_at),
            created_at: to_iso(lead.created_at),
            updated_at: to_iso(lead.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Option<Uuid>,
    pub actor_kind: ActorKind,
    pub old_status: Option<LeadStatus>,
    pub new_status: LeadStatus,
    pub reason: Option<String>,
    pub created_at: String,
}

impl From<StatusHistory> for HistoryResponse {
    fn from(entry: StatusHistory) -> Self {
        Self {
            id: entry.id,
            lead_id: entry.lead_id,
            user_id: entry.user_id,
            actor_kind: entry.actor_kind,
            old_status: entry.old_status,
            new_status: entry.new_status,
            reason: entry.reason,
            created_at: to_iso(entry.created_at),
        }
    }
}

pub async fn list_leads(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListLeadsParams>,
) -> AppResult<Json<Page<LeadResponse>>> {
    let (query, page) = params.into_query()?;
    let leads = leads::list_leads(
        state.store(),
        &state.automation,
        &user.actor(),
        query,
        page,
    )
    .await?;
    Ok(Json(leads.map(LeadResponse::from)))
}

pub async fn create_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreateLeadRequest>,
) -> AppResult<(StatusCode, Json<LeadResponse>)> {
    let input = LeadInput {
        name: payload.name,
        email: payload.email,
        company: payload.company,
        profile_url: payload.profile_url,
        post_url: payload.post_url,
        website: payload.website,
        notes: payload.notes,
        system: payload.system,
        assigned_to_id: payload.assigned_to_id,
    };
    let lead = leads::create_lead(state.store(), &user.actor(), input).await?;
    Ok((StatusCode::CREATED, Json(lead.into())))
}

pub async fn import_leads(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<ImportLeadsRequest>,
) -> AppResult<Json<ImportReport>> {
    let report = leads::import_leads(state.store(), &user.actor(), payload.leads).await?;
    Ok(Json(report))
}

pub async fn get_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
) -> AppResult<Json<LeadResponse>> {
    let lead = leads::get_lead(state.store(), &user.actor(), lead_id).await?;
    Ok(Json(lead.into()))
}

fn parse_lead_changes(body: &Value) -> Result<LeadChanges, String> {
    if !body.is_object() {
        return Err("expected a JSON object".to_string());
    }
    Ok(LeadChanges {
        name: required_string(body, "name")?,
        email: nullable_string(body, "email")?,
        company: nullable_string(body, "company")?,
        profile_url: nullable_string(body, "profile_url")?,
        post_url: nullable_string(body, "post_url")?,
        website: nullable_string(body, "website")?,
        notes: nullable_string(body, "notes")?,
        system: required_parsed::<LeadSystem>(body, "system")?,
        assigned_to_id: nullable_uuid(body, "assigned_to_id")?,
    })
}

pub async fn update_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<LeadResponse>> {
    let changes = parse_lead_changes(&body).map_err(AppError::bad_request)?;
    let lead = leads::update_lead(state.store(), &user.actor(), lead_id, changes).await?;
    Ok(Json(lead.into()))
}

pub async fn delete_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    leads::delete_lead(state.store(), &user.actor(), lead_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn change_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
    JsonBody(payload): JsonBody<ChangeStatusRequest>,
) -> AppResult<Json<LeadResponse>> {
    let lead = leads::change_status(
        state.store(),
        &user.actor(),
        lead_id,
        payload.status,
        payload.reason,
    )
    .await?;
    Ok(Json(lead.into()))
}

pub async fn claim_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
) -> AppResult<Json<LeadResponse>> {
    let lead = leads::claim(state.store(), &user.actor(), lead_id).await?;
    Ok(Json(lead.into()))
}

pub async fn unclaim_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
) -> AppResult<Json<LeadResponse>> {
    let lead = leads::unclaim(state.store(), &user.actor(), lead_id).await?;
    Ok(Json(lead.into()))
}

pub async fn lead_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(lead_id): Path<Uuid>,
) -> AppResult<Json<Vec<HistoryResponse>>> {
    let history = leads::lead_history(state.store(), &user.actor(), lead_id).await?;
    Ok(Json(history.into_iter().map(HistoryResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> ListLeadsParams {
        ListLeadsParams {
            status: None,
            assigned_to: None,
            search: None,
            date: None,
            date_field: None,
            action: None,
            stale_days: None,
            page: None,
            per_page: None,
        }
    }

    #[test]
    fn all_is_a_status_filter_of_its_own() {
        let (query, page) = ListLeadsParams {
            status: Some("all".into()),
            ..params()
        }
        .into_query()
        .unwrap();
        assert_eq!(query.status, Some(StatusFilter::All));
        assert_eq!(page, Pagination::default());
    }

    #[test]
    fn rejects_unknown_filters() {
        let bad_status = ListLeadsParams {
            status: Some("lost".into()),
            ..params()
        };
        assert_eq!(
            bad_status.into_query().unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );

        let bad_field = ListLeadsParams {
            date: Some("2025-03-10".into()),
            date_field: Some("due".into()),
            ..params()
        };
        assert!(bad_field.into_query().is_err());
    }

    #[test]
    fn patch_bodies_keep_null_and_omitted_apart() {
        let owner = Uuid::new_v4();
        let changes = parse_lead_changes(&json!({
            "notes": null,
            "system": "referral",
            "assigned_to_id": owner.to_string(),
        }))
        .unwrap();
        assert_eq!(changes.notes, Some(None));
        assert_eq!(changes.email, None);
        assert_eq!(changes.system, Some(LeadSystem::Referral));
        assert_eq!(changes.assigned_to_id, Some(Some(owner)));

        assert!(parse_lead_changes(&json!(["name"])).is_err());
        assert!(parse_lead_changes(&json!({ "name": null })).is_err());
    }
}
