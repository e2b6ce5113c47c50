#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::PermissionCode;
use crate::pattern::{validate_actor_id, validate_id};
use crate::role::RoleId;
use crate::scope::Scope;
use crate::{Error, Result};

pub const MAX_GRANT_PRIORITY: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn is_allow(self) -> bool {
        matches!(self, Effect::Allow)
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Allow => write!(f, "ALLOW"),
            Effect::Deny => write!(f, "DENY"),
        }
    }
}

/// A role→permission grant. Revocation is a soft delete: the row keeps its
/// `revoked_at` stamp and stays queryable for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: RoleId,
    pub permission: PermissionCode,
    pub effect: Effect,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    #[serde(default)]
    pub priority: u32,
    pub granted_by: String,
    #[serde(default = "Utc::now")]
    pub granted_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_by: Option<String>,
}

fn default_scope() -> Scope {
    Scope::Global
}

impl Grant {
    pub fn new(
        role: RoleId,
        permission: PermissionCode,
        effect: Effect,
        granted_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            permission,
            effect,
            scope: Scope::Global,
            priority: 0,
            granted_by: granted_by.into(),
            granted_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
            revoked_by: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("role", self.role.as_str())?;
        self.permission.validate(true)?;
        validate_actor_id(&self.granted_by)?;
        if self.priority > MAX_GRANT_PRIORITY {
            return Err(Error::Validation(format!(
                "priority {} exceeds maximum {}",
                self.priority, MAX_GRANT_PRIORITY
            )));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.granted_at {
                return Err(Error::Validation(format!(
                    "grant {} expires at or before it is granted",
                    self.id
                )));
            }
        }
        Ok(())
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= at)
    }

    pub fn is_revoked(&self, at: DateTime<Utc>) -> bool {
        self.revoked_at.is_some_and(|rev| rev <= at)
    }

    /// Whether this grant participates in a resolution at `at` for `scope`.
    pub fn applies(&self, scope: &Scope, at: DateTime<Utc>) -> bool {
        !self.is_revoked(at) && !self.is_expired(at) && self.scope.contains(scope)
    }
}
