#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;

use crate::pattern::{matches_pattern, validate_code};
use crate::{Error, Result};

/// A permission code in `resource:action` form, e.g. `budget:approve`.
///
/// Grant codes may use a wildcard action (`budget:*`) or the bare `*`;
/// catalog definitions are always concrete.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(String);

impl PermissionCode {
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        validate_code(&code, false)?;
        Ok(Self(code))
    }

    pub fn wildcard(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        validate_code(&code, true)?;
        Ok(Self(code))
    }

    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Re-validates the code; used after deserializing documents, which
    /// bypasses the checked constructors.
    pub fn validate(&self, allow_wildcard: bool) -> Result<()> {
        validate_code(&self.0, allow_wildcard)
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.contains('*')
    }

    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(r, _)| r).unwrap_or(&self.0)
    }

    pub fn matches(&self, concrete: &PermissionCode) -> bool {
        matches_pattern(&self.0, &concrete.0)
    }
}

impl fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub code: PermissionCode,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Permission {
    pub fn new(code: PermissionCode, category: impl Into<String>) -> Self {
        Self {
            code,
            category: category.into(),
            description: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.code.validate(false)?;
        if self.category.is_empty() {
            return Err(Error::Validation("category is required".into()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn register(&self, permission: Permission) -> Result<Permission>;
    async fn get(&self, code: &PermissionCode) -> Result<Option<Permission>>;
    async fn list(&self) -> Result<Vec<Permission>>;
    async fn list_category(&self, category: &str) -> Result<Vec<Permission>>;
    async fn deactivate(&self, code: &PermissionCode) -> Result<()>;
    async fn reactivate(&self, code: &PermissionCode) -> Result<()>;

    /// Expands a possibly-wildcard grant code into the matching active
    /// definitions.
    async fn expand_code(&self, code: &PermissionCode) -> Result<BTreeSet<PermissionCode>> {
        if !code.is_wildcard() {
            return match self.get(code).await? {
                Some(p) if p.active => Ok(BTreeSet::from([p.code])),
                _ => Ok(BTreeSet::new()),
            };
        }
        let mut out = BTreeSet::new();
        for p in self.list().await? {
            if p.active && code.matches(&p.code) {
                out.insert(p.code);
            }
        }
        Ok(out)
    }
}

pub struct InMemoryCatalogStore {
    permissions: RwLock<HashMap<PermissionCode, Permission>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self {
            permissions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn register(&self, permission: Permission) -> Result<Permission> {
        permission.validate()?;
        let mut permissions = self.permissions.write();
        if permissions.contains_key(&permission.code) {
            return Err(Error::PermissionExists(permission.code.to_string()));
        }
        permissions.insert(permission.code.clone(), permission.clone());
        Ok(permission)
    }

    async fn get(&self, code: &PermissionCode) -> Result<Option<Permission>> {
        Ok(self.permissions.read().get(code).cloned())
    }

    async fn list(&self) -> Result<Vec<Permission>> {
        let mut out: Vec<Permission> = self.permissions.read().values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn list_category(&self, category: &str) -> Result<Vec<Permission>> {
        let mut out: Vec<Permission> = self
            .permissions
            .read()
            .values()
            .filter(|p| p.category == category)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn deactivate(&self, code: &PermissionCode) -> Result<()> {
        let mut permissions = self.permissions.write();
        let permission = permissions
            .get_mut(code)
            .ok_or_else(|| Error::PermissionNotFound(code.to_string()))?;
        permission.active = false;
        Ok(())
    }

    async fn reactivate(&self, code: &PermissionCode) -> Result<()> {
        let mut permissions = self.permissions.write();
        let permission = permissions
            .get_mut(code)
            .ok_or_else(|| Error::PermissionNotFound(code.to_string()))?;
        permission.active = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> PermissionCode {
        PermissionCode::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let store = InMemoryCatalogStore::new();
        let p = Permission::new(code("budget:read"), "budget").with_description("View budgets");
        store.register(p).await.unwrap();

        let fetched = store.get(&code("budget:read")).await.unwrap().unwrap();
        assert_eq!(fetched.category, "budget");
        assert!(fetched.active);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let store = InMemoryCatalogStore::new();
        store
            .register(Permission::new(code("budget:read"), "budget"))
            .await
            .unwrap();
        let err = store
            .register(Permission::new(code("budget:read"), "budget"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionExists(_)));
    }

    #[tokio::test]
    async fn test_wildcard_definition_rejected() {
        let store = InMemoryCatalogStore::new();
        let p = Permission {
            code: PermissionCode::new_unchecked("budget:*"),
            category: "budget".into(),
            description: None,
            active: true,
            created_at: Utc::now(),
        };
        assert!(store.register(p).await.is_err());
    }

    #[tokio::test]
    async fn test_expand_code() {
        let store = InMemoryCatalogStore::new();
        for c in ["budget:read", "budget:write", "budget:approve", "crm:read"] {
            store
                .register(Permission::new(code(c), c.split(':').next().unwrap()))
                .await
                .unwrap();
        }
        store.deactivate(&code("budget:approve")).await.unwrap();

        let expanded = store
            .expand_code(&PermissionCode::wildcard("budget:*").unwrap())
            .await
            .unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded.contains(&code("budget:read")));
        assert!(expanded.contains(&code("budget:write")));

        let all = store
            .expand_code(&PermissionCode::wildcard("*").unwrap())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let inactive = store.expand_code(&code("budget:approve")).await.unwrap();
        assert!(inactive.is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_unknown() {
        let store = InMemoryCatalogStore::new();
        let err = store.deactivate(&code("nope:read")).await.unwrap_err();
        assert!(matches!(err, Error::PermissionNotFound(_)));
    }
}
