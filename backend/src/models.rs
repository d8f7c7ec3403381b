use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    LeadGen,
    Outreach,
}

text_enum!(Role, "role", {
    Admin => "admin",
    LeadGen => "lead_gen",
    Outreach => "outreach",
});

/// Pipeline position of a lead, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Requested,
    Texted,
    FirstFollowup,
    SecondFollowup,
    Replied,
    MeetingBooked,
    Closed,
    Junk,
}

text_enum!(LeadStatus, "lead status", {
    New => "new",
    Requested => "requested",
    Texted => "texted",
    FirstFollowup => "first_followup",
    SecondFollowup => "second_followup",
    Replied => "replied",
    MeetingBooked => "meeting_booked",
    Closed => "closed",
    Junk => "junk",
});

/// Per-status timestamps recorded the first time a lead reaches that status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Texted,
    FirstFollowup,
    SecondFollowup,
    Replied,
}

impl LeadStatus {
    pub fn milestone(&self) -> Option<Milestone> {
        match self {
            LeadStatus::Texted => Some(Milestone::Texted),
            LeadStatus::FirstFollowup => Some(Milestone::FirstFollowup),
            LeadStatus::SecondFollowup => Some(Milestone::SecondFollowup),
            LeadStatus::Replied => Some(Milestone::Replied),
            _ => None,
        }
    }
}

/// Source channel a lead was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadSystem {
    Linkedin,
    Email,
    Instagram,
    Twitter,
    Referral,
    #[default]
    Other,
}

text_enum!(LeadSystem, "lead system", {
    Linkedin => "linkedin",
    Email => "email",
    Instagram => "instagram",
    Twitter => "twitter",
    Referral => "referral",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Undone,
    Done,
    Backlog,
}

text_enum!(TaskStatus, "task status", {
    Undone => "undone",
    Done => "done",
    Backlog => "backlog",
});

/// Who caused a history row: a signed-in person or the automation sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Human,
    System,
}

text_enum!(ActorKind, "actor kind", {
    Human => "human",
    System => "system",
});

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
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
    pub texted_at: Option<NaiveDateTime>,
    pub first_followup_at: Option<NaiveDateTime>,
    pub second_followup_at: Option<NaiveDateTime>,
    pub replied_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Lead {
    pub fn milestone_at(&self, milestone: Milestone) -> Option<NaiveDateTime> {
        match milestone {
            Milestone::Texted => self.texted_at,
            Milestone::FirstFollowup => self.first_followup_at,
            Milestone::SecondFollowup => self.second_followup_at,
            Milestone::Replied => self.replied_at,
        }
    }

    pub(crate) fn milestone_slot(&mut self, milestone: Milestone) -> &mut Option<NaiveDateTime> {
        match milestone {
            Milestone::Texted => &mut self.texted_at,
            Milestone::FirstFollowup => &mut self.first_followup_at,
            Milestone::SecondFollowup => &mut self.second_followup_at,
            Milestone::Replied => &mut self.replied_at,
        }
    }
}

/// Fields accepted when creating a lead; `status` always starts at `new`.
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub profile_url: Option<String>,
    pub post_url: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
    pub system: LeadSystem,
    pub assigned_to_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
}

/// Partial lead edit. Outer `None` leaves a field untouched; `Some(None)`
/// clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadChanges {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub company: Option<Option<String>>,
    pub profile_url: Option<Option<String>>,
    pub post_url: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub system: Option<LeadSystem>,
    pub assigned_to_id: Option<Option<Uuid>>,
}

impl LeadChanges {
    pub fn is_empty(&self) -> bool {
        *self == LeadChanges::default()
    }

    /// Applies the changes to an in-memory lead and reports whether the
    /// assignee moved.
    pub fn apply_to(&self, lead: &mut Lead) -> bool {
        if let Some(name) = &self.name {
            lead.name = name.clone();
        }
        if let Some(email) = &self.email {
            lead.email = email.clone();
        }
        if let Some(company) = &self.company {
            lead.company = company.clone();
        }
        if let Some(profile_url) = &self.profile_url {
            lead.profile_url = profile_url.clone();
        }
        if let Some(post_url) = &self.post_url {
            lead.post_url = post_url.clone();
        }
        if let Some(website) = &self.website {
            lead.website = website.clone();
        }
        if let Some(notes) = &self.notes {
            lead.notes = notes.clone();
        }
        if let Some(system) = self.system {
            lead.system = system;
        }
        match self.assigned_to_id {
            Some(assignee) if assignee != lead.assigned_to_id => {
                lead.assigned_to_id = assignee;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusHistory {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Option<Uuid>,
    pub actor_kind: ActorKind,
    pub old_status: Option<LeadStatus>,
    pub new_status: LeadStatus,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Who and why for a history row. The store fills in the statuses from the
/// row it locks so the entry always matches what was written.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryNote {
    pub user_id: Option<Uuid>,
    pub actor_kind: ActorKind,
    pub reason: Option<String>,
    pub at: NaiveDateTime,
}

impl HistoryNote {
    pub fn into_entry(
        self,
        lead_id: Uuid,
        old_status: Option<LeadStatus>,
        new_status: LeadStatus,
    ) -> StatusHistory {
        StatusHistory {
            id: Uuid::new_v4(),
            lead_id,
            user_id: self.user_id,
            actor_kind: self.actor_kind,
            old_status,
            new_status,
            reason: self.reason,
            created_at: self.at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to_id: Uuid,
    pub created_by_id: Option<Uuid>,
    pub status: TaskStatus,
    pub created_at: NaiveDateTime,
    pub due_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to_id: Uuid,
    pub created_by_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub due_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub assigned_to_id: Option<Uuid>,
    pub created_at: Option<NaiveDateTime>,
    pub due_at: Option<NaiveDateTime>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        *self == TaskChanges::default()
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(assignee) = self.assigned_to_id {
            task.assigned_to_id = assignee;
        }
        if let Some(created_at) = self.created_at {
            task.created_at = created_at;
        }
        if let Some(due_at) = self.due_at {
            task.due_at = due_at;
        }
    }
}
