use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "moderator")]
    Moderator,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

/// Which family of resources a request touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    /// Categories, genres and titles.
    Catalog,
    /// Reviews and comments.
    Content,
    /// The user collection as administered.
    Users,
    /// The caller's own profile.
    Profile,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorship {
    Own,
    Other,
    /// The operation has no existing target, e.g. create or list.
    NotApplicable,
}

/// The acting identity as the policy sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub is_superuser: bool,
}

impl Actor {
    pub fn effective_role(self) -> Role {
        if self.is_superuser { Role::Admin } else { self.role }
    }

    pub fn is_admin(self) -> bool {
        self.effective_role() == Role::Admin
    }
}

/// `role` is `None` for an unauthenticated caller.
pub fn can_perform(
    role: Option<Role>,
    resource: Resource,
    authorship: Authorship,
    op: Operation,
) -> bool {
    match (resource, role) {
        (Resource::Catalog | Resource::Content, _) if op == Operation::Read => true,
        (_, None) => false,
        (Resource::Catalog | Resource::Users, Some(role)) => role == Role::Admin,
        (Resource::Content, Some(role)) => match op {
            Operation::Read | Operation::Create => true,
            Operation::Update | Operation::Delete => {
                authorship == Authorship::Own || matches!(role, Role::Moderator | Role::Admin)
            },
        },
        (Resource::Profile, Some(_)) => {
            authorship == Authorship::Own && matches!(op, Operation::Read | Operation::Update)
        },
    }
}

/// Unauthenticated callers get `Unauthenticated` for anything the policy
/// refuses; authenticated ones get `Forbidden`.
pub fn authorize(
    actor: Option<Actor>,
    resource: Resource,
    authorship: Authorship,
    op: Operation,
) -> Result<(), AppError> {
    let role = actor.map(Actor::effective_role);
    if can_perform(role, resource, authorship, op) {
        return Ok(());
    }
    match role {
        None => Err(AppError::Unauthenticated),
        Some(_) => Err(AppError::Forbidden),
    }
}

pub fn authorship(actor_id: i32, author_id: i32) -> Authorship {
    if actor_id == author_id { Authorship::Own } else { Authorship::Other }
}
