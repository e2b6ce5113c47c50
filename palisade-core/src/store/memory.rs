#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{GrantStore, RoleStore};
use crate::grant::Grant;
use crate::role::{InheritanceRule, Role, RoleId};
use crate::{Error, Result};

pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<RoleId, Role>>,
    rules: RwLock<Vec<InheritanceRule>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self {
            roles: RwLock::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn create(&self, role: Role) -> Result<Role> {
        role.validate()?;
        let mut roles = self.roles.write();
        if roles.contains_key(&role.id) {
            return Err(Error::RoleExists(role.id.to_string()));
        }
        roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn get(&self, id: &RoleId) -> Result<Option<Role>> {
        Ok(self.roles.read().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let mut out: Vec<Role> = self.roles.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn deactivate(&self, id: &RoleId) -> Result<()> {
        let mut roles = self.roles.write();
        let role = roles
            .get_mut(id)
            .ok_or_else(|| Error::RoleNotFound(id.to_string()))?;
        role.active = false;
        Ok(())
    }

    async fn reactivate(&self, id: &RoleId) -> Result<()> {
        let mut roles = self.roles.write();
        let role = roles
            .get_mut(id)
            .ok_or_else(|| Error::RoleNotFound(id.to_string()))?;
        role.active = true;
        Ok(())
    }

    async fn link(&self, rule: InheritanceRule) -> Result<InheritanceRule> {
        rule.validate()?;
        {
            let roles = self.roles.read();
            for end in [&rule.child, &rule.parent] {
                if !roles.contains_key(end) {
                    return Err(Error::RoleNotFound(end.to_string()));
                }
            }
        }
        let mut rules = self.rules.write();
        if rules
            .iter()
            .any(|r| r.child == rule.child && r.parent == rule.parent)
        {
            return Err(Error::InheritanceExists {
                child: rule.child.to_string(),
                parent: rule.parent.to_string(),
            });
        }
        rules.push(rule.clone());
        Ok(rule)
    }

    async fn unlink(&self, child: &RoleId, parent: &RoleId) -> Result<()> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| !(&r.child == child && &r.parent == parent));
        if rules.len() == before {
            return Err(Error::NotFound(format!(
                "inheritance rule {} -> {}",
                child, parent
            )));
        }
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<InheritanceRule>> {
        Ok(self.rules.read().clone())
    }
}

pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<Uuid, Grant>>,
    role_index: RwLock<IndexMap<RoleId, Vec<Uuid>>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            role_index: RwLock::new(IndexMap::new()),
        }
    }
}

impl Default for InMemoryGrantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn issue(&self, grant: Grant) -> Result<Grant> {
        grant.validate()?;
        let mut grants = self.grants.write();
        grants.insert(grant.id, grant.clone());
        let mut index = self.role_index.write();
        index.entry(grant.role.clone()).or_default().push(grant.id);
        Ok(grant)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Grant>> {
        Ok(self.grants.read().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Grant>> {
        let mut out: Vec<Grant> = self.grants.read().values().cloned().collect();
        out.sort_by_key(|g| g.granted_at);
        Ok(out)
    }

    async fn list_for_role(&self, role: &RoleId) -> Result<Vec<Grant>> {
        let index = self.role_index.read();
        let grants = self.grants.read();
        Ok(index
            .get(role)
            .map(|ids| ids.iter().filter_map(|id| grants.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn revoke(&self, id: &Uuid, revoked_by: &str, at: DateTime<Utc>) -> Result<Grant> {
        let mut grants = self.grants.write();
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| Error::GrantNotFound(id.to_string()))?;
        if grant.revoked_at.is_some() {
            return Err(Error::AlreadyRevoked(id.to_string()));
        }
        grant.revoked_at = Some(at);
        grant.revoked_by = Some(revoked_by.to_string());
        Ok(grant.clone())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut grants = self.grants.write();
        let before = grants.len();
        grants.retain(|_, g| !g.expires_at.is_some_and(|exp| exp <= cutoff));
        let purged = before - grants.len();
        if purged > 0 {
            let mut index = self.role_index.write();
            for ids in index.values_mut() {
                ids.retain(|id| grants.contains_key(id));
            }
        }
        Ok(purged)
    }
}
