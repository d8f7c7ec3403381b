use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::models::{LeadSystem, NewLead};
use crate::policy::{self, Actor};
use crate::store::{CrmStore, LeadMatchKey};

use super::{check_widths, clean_optional};

/// One parsed row of a bulk upload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportCandidate {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub profile_url: Option<String>,
    pub post_url: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
    pub system: Option<LeadSystem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingName,
    FieldTooLong,
    Email,
    ProfileUrl,
    NameCompany,
}

impl SkipReason {
    fn for_key(key: &LeadMatchKey) -> Self {
        match key {
            LeadMatchKey::Email(_) => SkipReason::Email,
            LeadMatchKey::ProfileUrl(_) => SkipReason::ProfileUrl,
            LeadMatchKey::NameCompany { .. } => SkipReason::NameCompany,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub created: Vec<Uuid>,
    pub skipped: Vec<SkippedRow>,
}

/// Dedup keys of a candidate in priority order: email, profile URL, then
/// the (name, company) pair when a company is present.
pub fn match_keys(candidate: &ImportCandidate) -> Vec<LeadMatchKey> {
    let normalized = |value: &Option<String>| {
        value
            .as_deref()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
    };

    let mut keys = Vec::with_capacity(3);
    if let Some(email) = normalized(&candidate.email) {
        keys.push(LeadMatchKey::Email(email));
    }
    if let Some(url) = normalized(&candidate.profile_url) {
        keys.push(LeadMatchKey::ProfileUrl(url));
    }
    let name = candidate.name.trim().to_lowercase();
    if let Some(company) = normalized(&candidate.company) {
        if !name.is_empty() {
            keys.push(LeadMatchKey::NameCompany { name, company });
        }
    }
    keys
}

/// Creates every candidate that does not match an existing lead or an
/// earlier row of the same batch.
pub async fn import_leads(
    store: &dyn CrmStore,
    actor: &Actor,
    candidates: Vec<ImportCandidate>,
) -> CrmResult<ImportReport> {
    if !policy::can_create_leads(actor) {
        return Err(CrmError::forbidden(format!(
            "{} may not import leads",
            actor.role
        )));
    }

    let mut report = ImportReport::default();
    let mut seen: HashSet<LeadMatchKey> = HashSet::new();

    'rows: for (row, candidate) in candidates.into_iter().enumerate() {
        let name = candidate.name.trim();
        if name.is_empty() {
            report.skipped.push(SkippedRow {
                row,
                reason: SkipReason::MissingName,
            });
            continue;
        }

        let oversized = check_widths(
            Some(name),
            candidate.email.as_deref().map(str::trim),
            candidate.company.as_deref().map(str::trim),
        );
        if oversized.is_err() {
            report.skipped.push(SkippedRow {
                row,
                reason: SkipReason::FieldTooLong,
            });
            continue;
        }

        let keys = match_keys(&candidate);
        for key in &keys {
            let duplicate = seen.contains(key) || store.find_lead_by(key).await?.is_some();
            if duplicate {
                report.skipped.push(SkippedRow {
                    row,
                    reason: SkipReason::for_key(key),
                });
                continue 'rows;
            }
        }

        let lead = store
            .insert_lead(NewLead {
                id: Uuid::new_v4(),
                name: name.to_string(),
                email: clean_optional(candidate.email),
                company: clean_optional(candidate.company),
                profile_url: clean_optional(candidate.profile_url),
                post_url: clean_optional(candidate.post_url),
                website: clean_optional(candidate.website),
                notes: clean_optional(candidate.notes),
                system: candidate.system.unwrap_or_default(),
                assigned_to_id: None,
                created_by_id: Some(actor.id),
            })
            .await?;
        seen.extend(keys);
        report.created.push(lead.id);
    }

    if !report.skipped.is_empty() {
        warn!(
            actor_id = %actor.id,
            skipped = report.skipped.len(),
            "import skipped rows"
        );
    }
    info!(
        actor_id = %actor.id,
        created = report.created.len(),
        "lead import finished"
    );
    Ok(report)
}
