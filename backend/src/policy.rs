//! Role scopes and per-lead permissions.
//!
//! Every listing starts from the actor's scope; client filters only narrow
//! it. Mutations are checked against the concrete record.

use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::models::{Lead, LeadChanges, LeadStatus, Role, Task};

/// An authenticated caller as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadScope {
    All,
    /// Freshly created leads nobody has picked up.
    UnclaimedNew,
    UnclaimedOrOwnedBy(Uuid),
}

impl LeadScope {
    pub fn for_actor(actor: &Actor) -> Self {
        match actor.role {
            Role::Admin => LeadScope::All,
            Role::LeadGen => LeadScope::UnclaimedNew,
            Role::Outreach => LeadScope::UnclaimedOrOwnedBy(actor.id),
        }
    }

    pub fn permits(&self, lead: &Lead) -> bool {
        match self {
            LeadScope::All => true,
            LeadScope::UnclaimedNew => {
                lead.assigned_to_id.is_none() && lead.status == LeadStatus::New
            }
            LeadScope::UnclaimedOrOwnedBy(owner) => match lead.assigned_to_id {
                None => true,
                Some(assignee) => assignee == *owner,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    All,
    AssignedTo(Uuid),
}

impl TaskScope {
    pub fn for_actor(actor: &Actor) -> Self {
        match actor.role {
            Role::Admin => TaskScope::All,
            Role::LeadGen | Role::Outreach => TaskScope::AssignedTo(actor.id),
        }
    }

    pub fn permits(&self, task: &Task) -> bool {
        match self {
            TaskScope::All => true,
            TaskScope::AssignedTo(user) => task.assigned_to_id == *user,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadOperation {
    View,
    Edit,
    ChangeStatus,
    Claim,
    Unclaim,
    Reassign,
    Delete,
}

impl LeadOperation {
    fn describe(&self) -> &'static str {
        match self {
            LeadOperation::View => "view",
            LeadOperation::Edit => "edit",
            LeadOperation::ChangeStatus => "change the status of",
            LeadOperation::Claim => "claim",
            LeadOperation::Unclaim => "unclaim",
            LeadOperation::Reassign => "reassign",
            LeadOperation::Delete => "delete",
        }
    }
}

/// Whether `actor` may perform `operation` on `lead` as it currently stands.
///
/// Claim only checks the role here; a lead held by someone else is a
/// conflict, reported by the claim coordinator.
pub fn can_mutate(actor: &Actor, lead: &Lead, operation: LeadOperation) -> bool {
    match (actor.role, operation) {
        (_, LeadOperation::View) => LeadScope::for_actor(actor).permits(lead),
        (Role::Admin, _) => true,
        (Role::LeadGen, LeadOperation::Edit | LeadOperation::ChangeStatus) => {
            lead.assigned_to_id.is_none()
        }
        (Role::Outreach, LeadOperation::Edit | LeadOperation::ChangeStatus) => {
            lead.assigned_to_id == Some(actor.id)
        }
        (Role::Outreach, LeadOperation::Claim) => true,
        (Role::Outreach, LeadOperation::Unclaim) => lead.assigned_to_id == Some(actor.id),
        (Role::LeadGen, LeadOperation::Claim | LeadOperation::Unclaim) => false,
        (Role::LeadGen | Role::Outreach, LeadOperation::Reassign | LeadOperation::Delete) => false,
    }
}

pub fn authorize(actor: &Actor, lead: &Lead, operation: LeadOperation) -> CrmResult<()> {
    if can_mutate(actor, lead, operation) {
        Ok(())
    } else {
        Err(CrmError::forbidden(format!(
            "{} may not {} this lead",
            actor.role,
            operation.describe()
        )))
    }
}

pub fn can_create_leads(actor: &Actor) -> bool {
    matches!(actor.role, Role::Admin | Role::LeadGen)
}

pub fn can_manage_tasks(actor: &Actor) -> bool {
    actor.is_admin()
}

pub fn can_complete_task(actor: &Actor, task: &Task) -> bool {
    actor.is_admin() || task.assigned_to_id == actor.id
}

/// Drops assignment edits from payloads written by roles that may not
/// assign leads.
pub fn strip_assignment(actor: &Actor, changes: &mut LeadChanges) {
    if !actor.is_admin() {
        changes.assigned_to_id = None;
    }
}

pub fn require_admin(actor: &Actor, action: &str) -> CrmResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CrmError::forbidden(format!("only admins may {action}")))
    }
}
