#![forbid(unsafe_code)]

mod memory;
mod redb_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::grant::Grant;
use crate::role::{InheritanceRule, Role, RoleId};
use crate::Result;

pub use memory::{InMemoryGrantStore, InMemoryRoleStore};
pub use redb_store::{RedbCatalogStore, RedbGrantStore, RedbRoleStore, RedbStorage};

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn create(&self, role: Role) -> Result<Role>;
    async fn get(&self, id: &RoleId) -> Result<Option<Role>>;
    async fn list(&self) -> Result<Vec<Role>>;
    async fn deactivate(&self, id: &RoleId) -> Result<()>;
    async fn reactivate(&self, id: &RoleId) -> Result<()>;
    async fn link(&self, rule: InheritanceRule) -> Result<InheritanceRule>;
    async fn unlink(&self, child: &RoleId, parent: &RoleId) -> Result<()>;
    async fn rules(&self) -> Result<Vec<InheritanceRule>>;
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn issue(&self, grant: Grant) -> Result<Grant>;
    async fn get(&self, id: &Uuid) -> Result<Option<Grant>>;
    async fn list(&self) -> Result<Vec<Grant>>;
    async fn list_for_role(&self, role: &RoleId) -> Result<Vec<Grant>>;
    async fn revoke(&self, id: &Uuid, revoked_by: &str, at: DateTime<Utc>) -> Result<Grant>;
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
