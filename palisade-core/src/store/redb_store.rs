#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{GrantStore, RoleStore};
use crate::catalog::{CatalogStore, Permission, PermissionCode};
use crate::grant::Grant;
use crate::role::{InheritanceRule, Role, RoleId};
use crate::{Error, Result};

const PERMISSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("permissions");
const ROLES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("roles");
const RULES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("inheritance_rules");
const GRANTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("grants");

fn storage_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

// Rule keys are `child\x1fparent`; role ids cannot contain the separator.
fn rule_key(child: &RoleId, parent: &RoleId) -> String {
    format!("{}\x1f{}", child, parent)
}

pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(storage_err)?;

        {
            let wtxn = db.begin_write().map_err(storage_err)?;
            wtxn.open_table(PERMISSIONS_TABLE).map_err(storage_err)?;
            wtxn.open_table(ROLES_TABLE).map_err(storage_err)?;
            wtxn.open_table(RULES_TABLE).map_err(storage_err)?;
            wtxn.open_table(GRANTS_TABLE).map_err(storage_err)?;
            wtxn.commit().map_err(storage_err)?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    pub fn catalog_store(&self) -> RedbCatalogStore {
        RedbCatalogStore {
            db: Arc::clone(&self.db),
        }
    }

    pub fn role_store(&self) -> RedbRoleStore {
        RedbRoleStore {
            db: Arc::clone(&self.db),
        }
    }

    pub fn grant_store(&self) -> RedbGrantStore {
        RedbGrantStore {
            db: Arc::clone(&self.db),
        }
    }
}

pub struct RedbCatalogStore {
    db: Arc<Database>,
}

impl RedbCatalogStore {
    fn read_all(&self) -> Result<Vec<Permission>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(PERMISSIONS_TABLE).map_err(storage_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            out.push(bincode::deserialize(value.value()).map_err(storage_err)?);
        }
        Ok(out)
    }

    fn write_permission(&self, permission: &Permission) -> Result<()> {
        let wtxn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = wtxn.open_table(PERMISSIONS_TABLE).map_err(storage_err)?;
            let value = bincode::serialize(permission).map_err(storage_err)?;
            table
                .insert(permission.code.as_str(), value.as_slice())
                .map_err(storage_err)?;
        }
        wtxn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn set_active(&self, code: &PermissionCode, active: bool) -> Result<()> {
        let mut permission = self
            .read_one(code)?
            .ok_or_else(|| Error::PermissionNotFound(code.to_string()))?;
        permission.active = active;
        self.write_permission(&permission)
    }

    fn read_one(&self, code: &PermissionCode) -> Result<Option<Permission>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(PERMISSIONS_TABLE).map_err(storage_err)?;
        match table.get(code.as_str()).map_err(storage_err)? {
            Some(value) => Ok(Some(
                bincode::deserialize(value.value()).map_err(storage_err)?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CatalogStore for RedbCatalogStore {
    async fn register(&self, permission: Permission) -> Result<Permission> {
        permission.validate()?;
        if self.read_one(&permission.code)?.is_some() {
            return Err(Error::PermissionExists(permission.code.to_string()));
        }
        self.write_permission(&permission)?;
        Ok(permission)
    }

    async fn get(&self, code: &PermissionCode) -> Result<Option<Permission>> {
        self.read_one(code)
    }

    async fn list(&self) -> Result<Vec<Permission>> {
        let mut out = self.read_all()?;
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn list_category(&self, category: &str) -> Result<Vec<Permission>> {
        let mut out: Vec<Permission> = self
            .read_all()?
            .into_iter()
            .filter(|p| p.category == category)
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn deactivate(&self, code: &PermissionCode) -> Result<()> {
        self.set_active(code, false)
    }

    async fn reactivate(&self, code: &PermissionCode) -> Result<()> {
        self.set_active(code, true)
    }
}

pub struct RedbRoleStore {
    db: Arc<Database>,
}

impl RedbRoleStore {
    fn read_role(&self, id: &RoleId) -> Result<Option<Role>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(ROLES_TABLE).map_err(storage_err)?;
        match table.get(id.as_str()).map_err(storage_err)? {
            Some(value) => Ok(Some(
                bincode::deserialize(value.value()).map_err(storage_err)?,
            )),
            None => Ok(None),
        }
    }

    fn write_role(&self, role: &Role) -> Result<()> {
        let wtxn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = wtxn.open_table(ROLES_TABLE).map_err(storage_err)?;
            let value = bincode::serialize(role).map_err(storage_err)?;
            table
                .insert(role.id.as_str(), value.as_slice())
                .map_err(storage_err)?;
        }
        wtxn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn set_active(&self, id: &RoleId, active: bool) -> Result<()> {
        let mut role = self
            .read_role(id)?
            .ok_or_else(|| Error::RoleNotFound(id.to_string()))?;
        role.active = active;
        self.write_role(&role)
    }
}

#[async_trait]
impl RoleStore for RedbRoleStore {
    async fn create(&self, role: Role) -> Result<Role> {
        role.validate()?;
        if self.read_role(&role.id)?.is_some() {
            return Err(Error::RoleExists(role.id.to_string()));
        }
        self.write_role(&role)?;
        Ok(role)
    }

    async fn get(&self, id: &RoleId) -> Result<Option<Role>> {
        self.read_role(id)
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(ROLES_TABLE).map_err(storage_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            out.push(bincode::deserialize(value.value()).map_err(storage_err)?);
        }
        Ok(out)
    }

    async fn deactivate(&self, id: &RoleId) -> Result<()> {
        self.set_active(id, false)
    }

    async fn reactivate(&self, id: &RoleId) -> Result<()> {
        self.set_active(id, true)
    }

    async fn link(&self, rule: InheritanceRule) -> Result<InheritanceRule> {
        rule.validate()?;
        for end in [&rule.child, &rule.parent] {
            if self.read_role(end)?.is_none() {
                return Err(Error::RoleNotFound(end.to_string()));
            }
        }
        let key = rule_key(&rule.child, &rule.parent);
        let wtxn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = wtxn.open_table(RULES_TABLE).map_err(storage_err)?;
            if table.get(key.as_str()).map_err(storage_err)?.is_some() {
                return Err(Error::InheritanceExists {
                    child: rule.child.to_string(),
                    parent: rule.parent.to_string(),
                });
            }
            let value = bincode::serialize(&rule).map_err(storage_err)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(storage_err)?;
        }
        wtxn.commit().map_err(storage_err)?;
        Ok(rule)
    }

    async fn unlink(&self, child: &RoleId, parent: &RoleId) -> Result<()> {
        let key = rule_key(child, parent);
        let wtxn = self.db.begin_write().map_err(storage_err)?;
        let removed = {
            let mut table = wtxn.open_table(RULES_TABLE).map_err(storage_err)?;
            let was_present = table.remove(key.as_str()).map_err(storage_err)?.is_some();
            was_present
        };
        wtxn.commit().map_err(storage_err)?;
        if !removed {
            return Err(Error::NotFound(format!(
                "inheritance rule {} -> {}",
                child, parent
            )));
        }
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<InheritanceRule>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(RULES_TABLE).map_err(storage_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            out.push(bincode::deserialize(value.value()).map_err(storage_err)?);
        }
        Ok(out)
    }
}

pub struct RedbGrantStore {
    db: Arc<Database>,
}

impl RedbGrantStore {
    fn read_grant(&self, id: &Uuid) -> Result<Option<Grant>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(GRANTS_TABLE).map_err(storage_err)?;
        match table.get(id.as_bytes().as_slice()).map_err(storage_err)? {
            Some(value) => Ok(Some(
                bincode::deserialize(value.value()).map_err(storage_err)?,
            )),
            None => Ok(None),
        }
    }

    fn write_grant(&self, grant: &Grant) -> Result<()> {
        let wtxn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = wtxn.open_table(GRANTS_TABLE).map_err(storage_err)?;
            let value = bincode::serialize(grant).map_err(storage_err)?;
            table
                .insert(grant.id.as_bytes().as_slice(), value.as_slice())
                .map_err(storage_err)?;
        }
        wtxn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Grant>> {
        let rtxn = self.db.begin_read().map_err(storage_err)?;
        let table = rtxn.open_table(GRANTS_TABLE).map_err(storage_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            out.push(bincode::deserialize(value.value()).map_err(storage_err)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl GrantStore for RedbGrantStore {
    async fn issue(&self, grant: Grant) -> Result<Grant> {
        grant.validate()?;
        self.write_grant(&grant)?;
        Ok(grant)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Grant>> {
        self.read_grant(id)
    }

    async fn list(&self) -> Result<Vec<Grant>> {
        let mut out = self.read_all()?;
        out.sort_by_key(|g| g.granted_at);
        Ok(out)
    }

    async fn list_for_role(&self, role: &RoleId) -> Result<Vec<Grant>> {
        let mut out: Vec<Grant> = self
            .read_all()?
            .into_iter()
            .filter(|g| &g.role == role)
            .collect();
        out.sort_by_key(|g| g.granted_at);
        Ok(out)
    }

    async fn revoke(&self, id: &Uuid, revoked_by: &str, at: DateTime<Utc>) -> Result<Grant> {
        let mut grant = self
            .read_grant(id)?
            .ok_or_else(|| Error::GrantNotFound(id.to_string()))?;
        if grant.revoked_at.is_some() {
            return Err(Error::AlreadyRevoked(id.to_string()));
        }
        grant.revoked_at = Some(at);
        grant.revoked_by = Some(revoked_by.to_string());
        self.write_grant(&grant)?;
        Ok(grant)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<Uuid> = self
            .read_all()?
            .into_iter()
            .filter(|g| g.expires_at.is_some_and(|exp| exp <= cutoff))
            .map(|g| g.id)
            .collect();

        let wtxn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = wtxn.open_table(GRANTS_TABLE).map_err(storage_err)?;
            for id in &expired {
                table
                    .remove(id.as_bytes().as_slice())
                    .map_err(storage_err)?;
            }
        }
        wtxn.commit().map_err(storage_err)?;
        Ok(expired.len())
    }
}
