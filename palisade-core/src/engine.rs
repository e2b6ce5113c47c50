#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{
    ActorInfo, AuditEvent, AuditEventType, AuditLog, AuditQuery, AuditStore, ChainVerification,
    ResourceInfo,
};
use crate::catalog::{CatalogStore, Permission, PermissionCode};
use crate::conflict::{Conflict, ConflictDetector};
use crate::dependency::{DependencyIndex, MissingPrerequisite};
use crate::grant::{Effect, Grant};
use crate::resolver::{
    AccessDecision, EffectivePermissionResolver, EffectivePermissions, ResolveRequest,
};
use crate::role::{InheritanceMode, InheritanceRule, Role, RoleGraph, RoleId};
use crate::scope::Scope;
use crate::store::{GrantStore, RoleStore};
use crate::{Error, Result};

/// Facade over the stores, resolver, conflict detector, and audit log.
///
/// Every mutating or resolving operation that goes through the engine
/// appends exactly one audit event (prerequisite auto-grants append one
/// each).
pub struct PermissionEngine<A: AuditStore> {
    catalog: Arc<dyn CatalogStore>,
    role_store: Arc<dyn RoleStore>,
    grant_store: Arc<dyn GrantStore>,
    dependencies: RwLock<DependencyIndex>,
    resolver: EffectivePermissionResolver,
    detector: ConflictDetector,
    audit: AuditLog<A>,
    max_depth: usize,
}

impl<A: AuditStore> PermissionEngine<A> {
    pub async fn new(
        catalog: Arc<dyn CatalogStore>,
        role_store: Arc<dyn RoleStore>,
        grant_store: Arc<dyn GrantStore>,
        audit_store: A,
    ) -> Result<Self> {
        Self::with_max_depth(
            catalog,
            role_store,
            grant_store,
            audit_store,
            RoleGraph::DEFAULT_MAX_DEPTH,
        )
        .await
    }

    pub async fn with_max_depth(
        catalog: Arc<dyn CatalogStore>,
        role_store: Arc<dyn RoleStore>,
        grant_store: Arc<dyn GrantStore>,
        audit_store: A,
        max_depth: usize,
    ) -> Result<Self> {
        let resolver = EffectivePermissionResolver::new(
            Arc::clone(&catalog),
            Arc::clone(&role_store),
            Arc::clone(&grant_store),
        )
        .with_max_depth(max_depth);
        let detector = ConflictDetector::new(
            EffectivePermissionResolver::new(
                Arc::clone(&catalog),
                Arc::clone(&role_store),
                Arc::clone(&grant_store),
            )
            .with_max_depth(max_depth),
        );
        let audit = AuditLog::new(audit_store).await?;

        Ok(Self {
            catalog,
            role_store,
            grant_store,
            dependencies: RwLock::new(DependencyIndex::new()),
            resolver,
            detector,
            audit,
            max_depth,
        })
    }

    pub async fn register_permission(
        &self,
        permission: Permission,
        actor: &str,
    ) -> Result<Permission> {
        let created = self.catalog.register(permission).await?;
        self.audit
            .record(
                AuditEventType::PermissionRegistered {
                    code: created.code.to_string(),
                    category: created.category.clone(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::permission(created.code.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(created)
    }

    pub async fn deactivate_permission(&self, code: &PermissionCode, actor: &str) -> Result<()> {
        self.catalog.deactivate(code).await?;
        self.audit
            .record(
                AuditEventType::PermissionDeactivated {
                    code: code.to_string(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::permission(code.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    pub async fn create_role(&self, role: Role, actor: &str) -> Result<Role> {
        let created = self.role_store.create(role).await?;
        info!(role = %created.id, "role created");
        self.audit
            .record(
                AuditEventType::RoleCreated {
                    role_id: created.id.to_string(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(created.id.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(created)
    }

    pub async fn deactivate_role(&self, id: &RoleId, actor: &str) -> Result<()> {
        self.role_store.deactivate(id).await?;
        self.audit
            .record(
                AuditEventType::RoleDeactivated {
                    role_id: id.to_string(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(id.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    pub async fn link_roles(&self, rule: InheritanceRule, actor: &str) -> Result<InheritanceRule> {
        // Rebuilding the graph with the candidate rule included catches
        // cycles, duplicates, unknown roles, and depth violations in one
        // pass before anything is persisted.
        let roles = self.role_store.list().await?;
        let mut rules = self.role_store.rules().await?;
        rules.push(rule.clone());
        RoleGraph::build_with_max_depth(roles, rules, self.max_depth)?;

        let linked = self.role_store.link(rule).await?;
        self.audit
            .record(
                AuditEventType::InheritanceLinked {
                    child: linked.child.to_string(),
                    parent: linked.parent.to_string(),
                    mode: match &linked.mode {
                        InheritanceMode::All => "all".into(),
                        InheritanceMode::Selected(codes) => format!("selected({})", codes.len()),
                    },
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(linked.child.as_str()),
                serde_json::json!({ "priority": linked.priority }),
            )
            .await?;
        Ok(linked)
    }

    pub async fn unlink_roles(&self, child: &RoleId, parent: &RoleId, actor: &str) -> Result<()> {
        self.role_store.unlink(child, parent).await?;
        self.audit
            .record(
                AuditEventType::InheritanceUnlinked {
                    child: child.to_string(),
                    parent: parent.to_string(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(child.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    pub async fn add_dependency(
        &self,
        permission: PermissionCode,
        requires: PermissionCode,
        actor: &str,
    ) -> Result<()> {
        for code in [&permission, &requires] {
            if self.catalog.get(code).await?.is_none() {
                return Err(Error::PermissionNotFound(code.to_string()));
            }
        }
        self.dependencies
            .write()
            .add(permission.clone(), requires.clone())?;
        self.audit
            .record(
                AuditEventType::DependencyAdded {
                    permission: permission.to_string(),
                    requires: requires.to_string(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::permission(permission.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    pub fn dependency_index(&self) -> DependencyIndex {
        self.dependencies.read().clone()
    }

    /// Issues a grant. With `with_prerequisites`, allow-grants for the
    /// permission's transitive prerequisites are issued alongside it (same
    /// scope, priority, and expiry) unless the role already holds an
    /// equivalent un-revoked allow.
    pub async fn issue_grant(
        &self,
        grant: Grant,
        actor: &str,
        with_prerequisites: bool,
    ) -> Result<Vec<Grant>> {
        if self.role_store.get(&grant.role).await?.is_none() {
            return Err(Error::RoleNotFound(grant.role.to_string()));
        }
        let concrete = self.catalog.expand_code(&grant.permission).await?;
        if concrete.is_empty() {
            return Err(Error::PermissionNotFound(grant.permission.to_string()));
        }

        let mut to_issue = vec![grant.clone()];
        if with_prerequisites {
            let mut needed: BTreeSet<PermissionCode> = BTreeSet::new();
            {
                let deps = self.dependencies.read();
                for code in &concrete {
                    needed.extend(deps.closure_of(code));
                }
            }
            needed.retain(|c| !concrete.contains(c));

            let existing = self.grant_store.list_for_role(&grant.role).await?;
            for code in needed {
                let covered = existing.iter().any(|g| {
                    g.revoked_at.is_none()
                        && g.effect == Effect::Allow
                        && g.permission == code
                        && g.scope.contains(&grant.scope)
                });
                if !covered {
                    let mut prereq = Grant::new(
                        grant.role.clone(),
                        code,
                        Effect::Allow,
                        grant.granted_by.clone(),
                    )
                    .with_scope(grant.scope.clone())
                    .with_priority(grant.priority);
                    prereq.expires_at = grant.expires_at;
                    to_issue.push(prereq);
                }
            }
        }

        let mut issued = Vec::with_capacity(to_issue.len());
        for g in to_issue {
            let g = self.grant_store.issue(g).await?;
            self.audit
                .record(
                    AuditEventType::GrantIssued {
                        grant_id: g.id.to_string(),
                        role_id: g.role.to_string(),
                        permission: g.permission.to_string(),
                        effect: g.effect.to_string(),
                        scope: g.scope.to_string(),
                    },
                    Some(ActorInfo::user(actor)),
                    ResourceInfo::grant(&g.id.to_string()),
                    serde_json::json!({ "priority": g.priority }),
                )
                .await?;
            issued.push(g);
        }
        Ok(issued)
    }

    pub async fn revoke_grant(&self, id: &Uuid, actor: &str) -> Result<Grant> {
        let revoked = self.grant_store.revoke(id, actor, Utc::now()).await?;
        self.audit
            .record(
                AuditEventType::GrantRevoked {
                    grant_id: id.to_string(),
                    revoked_by: actor.to_string(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::grant(&id.to_string()),
                serde_json::json!({}),
            )
            .await?;
        Ok(revoked)
    }

    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        actor: &str,
    ) -> Result<EffectivePermissions> {
        let resolved = self.resolver.resolve(request).await?;
        self.audit
            .record(
                AuditEventType::PermissionsResolved {
                    role_id: resolved.role.to_string(),
                    scope: resolved.scope.to_string(),
                    entry_count: resolved.entries.len(),
                    evaluation_time_us: resolved.evaluation_time_us,
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(resolved.role.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(resolved)
    }

    pub async fn check(
        &self,
        role: &RoleId,
        permission: &PermissionCode,
        scope: &Scope,
        at: Option<DateTime<Utc>>,
        actor: &str,
    ) -> Result<AccessDecision> {
        let decision = self.resolver.check(role, permission, scope, at).await?;
        self.audit
            .record(
                AuditEventType::AccessChecked {
                    role_id: role.to_string(),
                    permission: permission.to_string(),
                    scope: scope.to_string(),
                    granted: decision.is_granted(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(role.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(decision)
    }

    pub async fn detect_conflicts(
        &self,
        role: &RoleId,
        scope: &Scope,
        at: Option<DateTime<Utc>>,
        actor: &str,
    ) -> Result<Vec<Conflict>> {
        let conflicts = self.detector.detect(role, scope, at).await?;
        self.audit
            .record(
                AuditEventType::ConflictsDetected {
                    role_id: role.to_string(),
                    scope: scope.to_string(),
                    conflict_count: conflicts.len(),
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::role(role.as_str()),
                serde_json::json!({}),
            )
            .await?;
        Ok(conflicts)
    }

    /// Resolves the role and reports effectively-allowed permissions whose
    /// prerequisites are not effectively allowed.
    pub async fn missing_prerequisites(
        &self,
        role: &RoleId,
        scope: &Scope,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<MissingPrerequisite>> {
        let mut request = ResolveRequest::new(role.clone(), scope.clone());
        request.at = at;
        let resolved = self.resolver.resolve(&request).await?;
        Ok(self.dependencies.read().validate(&resolved.allowed()))
    }

    pub async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        self.audit.query(query).await
    }

    pub async fn verify_audit_chain(&self) -> Result<ChainVerification> {
        self.audit.verify_chain(1).await
    }

    pub(crate) async fn record_model_loaded(
        &self,
        actor: &str,
        permissions: usize,
        roles: usize,
        grants: usize,
    ) -> Result<()> {
        self.audit
            .record(
                AuditEventType::ModelLoaded {
                    permissions,
                    roles,
                    grants,
                },
                Some(ActorInfo::user(actor)),
                ResourceInfo::system(),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn role_store(&self) -> &Arc<dyn RoleStore> {
        &self.role_store
    }

    pub fn grant_store(&self) -> &Arc<dyn GrantStore> {
        &self.grant_store
    }
}
