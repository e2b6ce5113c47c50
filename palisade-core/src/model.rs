#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::audit::AuditStore;
use crate::catalog::{Permission, PermissionCode};
use crate::engine::PermissionEngine;
use crate::grant::Grant;
use crate::role::{InheritanceRule, Role, RoleGraph};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub permission: PermissionCode,
    pub requires: PermissionCode,
}

/// A declarative access model: catalog, roles, inheritance, dependencies,
/// and grants in one document, loadable from YAML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessModel {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub inheritance: Vec<InheritanceRule>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl AccessModel {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let model: AccessModel = serde_yaml::from_str(yaml)?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: AccessModel =
            serde_json::from_str(json).map_err(|e| Error::ModelParse(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(Error::Validation("version is required".into()));
        }

        let mut codes = BTreeSet::new();
        for permission in &self.permissions {
            permission.validate()?;
            if !codes.insert(permission.code.clone()) {
                return Err(Error::Validation(format!(
                    "duplicate permission definition '{}'",
                    permission.code
                )));
            }
        }

        let mut role_ids = BTreeSet::new();
        for role in &self.roles {
            role.validate()?;
            if !role_ids.insert(role.id.clone()) {
                return Err(Error::Validation(format!(
                    "duplicate role definition '{}'",
                    role.id
                )));
            }
        }

        // Building the graph validates rule references, duplicates, cycles,
        // and depth in one pass.
        RoleGraph::build(self.roles.clone(), self.inheritance.clone())?;

        for entry in &self.dependencies {
            entry.permission.validate(false)?;
            entry.requires.validate(false)?;
            for code in [&entry.permission, &entry.requires] {
                if !codes.contains(code) {
                    return Err(Error::Validation(format!(
                        "dependency references unknown permission '{}'",
                        code
                    )));
                }
            }
        }

        for grant in &self.grants {
            grant.validate()?;
            if !role_ids.contains(&grant.role) {
                return Err(Error::Validation(format!(
                    "grant {} references unknown role '{}'",
                    grant.id, grant.role
                )));
            }
            if !grant.permission.is_wildcard() && !codes.contains(&grant.permission) {
                return Err(Error::Validation(format!(
                    "grant {} references unknown permission '{}'",
                    grant.id, grant.permission
                )));
            }
        }

        Ok(())
    }

    /// Applies the model onto an engine: permissions, roles, inheritance,
    /// dependencies, then grants, followed by a single model-loaded audit
    /// event.
    pub async fn apply<A: AuditStore>(
        &self,
        engine: &PermissionEngine<A>,
        actor: &str,
    ) -> Result<()> {
        for permission in &self.permissions {
            engine
                .register_permission(permission.clone(), actor)
                .await?;
        }
        for role in &self.roles {
            engine.create_role(role.clone(), actor).await?;
        }
        for rule in &self.inheritance {
            engine.link_roles(rule.clone(), actor).await?;
        }
        for entry in &self.dependencies {
            engine
                .add_dependency(entry.permission.clone(), entry.requires.clone(), actor)
                .await?;
        }
        for grant in &self.grants {
            engine.issue_grant(grant.clone(), actor, false).await?;
        }

        engine
            .record_model_loaded(
                actor,
                self.permissions.len(),
                self.roles.len(),
                self.grants.len(),
            )
            .await?;
        Ok(())
    }
}
