#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::catalog::{CatalogStore, PermissionCode};
use crate::grant::Effect;
use crate::role::{InheritancePath, RoleGraph, RoleId};
use crate::scope::Scope;
use crate::store::{GrantStore, RoleStore};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub role: RoleId,
    pub scope: Scope,
    /// Instant the resolution is evaluated at; defaults to now. Passing it
    /// makes expiry and revocation decisions reproducible.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

impl ResolveRequest {
    pub fn new(role: RoleId, scope: Scope) -> Self {
        Self {
            role,
            scope,
            at: None,
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }
}

/// The grant that decided a permission's final effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningSource {
    pub grant_id: Uuid,
    pub origin: RoleId,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveEntry {
    pub permission: PermissionCode,
    pub effect: Effect,
    pub source: WinningSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub grant_id: Uuid,
    pub origin: RoleId,
    pub permission: PermissionCode,
    pub included: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePermissions {
    pub role: RoleId,
    pub scope: Scope,
    pub resolved_at: DateTime<Utc>,
    pub evaluated_at: DateTime<Utc>,
    pub evaluation_time_us: u64,
    pub entries: Vec<EffectiveEntry>,
    pub trace: Vec<TraceEntry>,
}

impl EffectivePermissions {
    pub fn effect_of(&self, permission: &PermissionCode) -> Option<Effect> {
        self.entries
            .iter()
            .find(|e| &e.permission == permission)
            .map(|e| e.effect)
    }

    pub fn allowed(&self) -> BTreeSet<PermissionCode> {
        self.entries
            .iter()
            .filter(|e| e.effect.is_allow())
            .map(|e| e.permission.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessDecision {
    Granted {
        permission: PermissionCode,
        grant_id: Uuid,
        origin: RoleId,
        depth: usize,
    },
    Denied {
        permission: PermissionCode,
        reason: String,
    },
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted { .. })
    }
}

/// One applicable (grant, concrete permission) pair collected during a walk.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) permission: PermissionCode,
    pub(crate) effect: Effect,
    pub(crate) grant_id: Uuid,
    pub(crate) origin: RoleId,
    pub(crate) grant_priority: u32,
    pub(crate) depth: usize,
    pub(crate) edge_priority: u32,
    pub(crate) scope_specificity: u8,
}

pub struct EffectivePermissionResolver {
    catalog: Arc<dyn CatalogStore>,
    role_store: Arc<dyn RoleStore>,
    grant_store: Arc<dyn GrantStore>,
    max_depth: usize,
}

impl EffectivePermissionResolver {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        role_store: Arc<dyn RoleStore>,
        grant_store: Arc<dyn GrantStore>,
    ) -> Self {
        Self {
            catalog,
            role_store,
            grant_store,
            max_depth: RoleGraph::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Result<EffectivePermissions> {
        let start = Instant::now();
        let at = request.at.unwrap_or_else(Utc::now);

        let graph = self.load_graph().await?;
        let role = graph
            .get(&request.role)
            .ok_or_else(|| Error::RoleNotFound(request.role.to_string()))?;
        if !role.active {
            return Err(Error::RoleNotActive(request.role.to_string()));
        }

        let (candidates, trace) = self
            .collect_candidates(&graph, &request.role, &request.scope, at)
            .await?;
        let entries = combine(candidates);

        Ok(EffectivePermissions {
            role: request.role.clone(),
            scope: request.scope.clone(),
            resolved_at: Utc::now(),
            evaluated_at: at,
            evaluation_time_us: start.elapsed().as_micros() as u64,
            entries,
            trace,
        })
    }

    pub async fn check(
        &self,
        role: &RoleId,
        permission: &PermissionCode,
        scope: &Scope,
        at: Option<DateTime<Utc>>,
    ) -> Result<AccessDecision> {
        match self.catalog.get(permission).await? {
            None => {
                return Ok(AccessDecision::Denied {
                    permission: permission.clone(),
                    reason: "permission is not in the catalog".into(),
                })
            }
            Some(p) if !p.active => {
                return Ok(AccessDecision::Denied {
                    permission: permission.clone(),
                    reason: "permission is deactivated".into(),
                })
            }
            Some(_) => {}
        }

        let mut request = ResolveRequest::new(role.clone(), scope.clone());
        request.at = at;
        let resolved = self.resolve(&request).await?;

        let entry = resolved
            .entries
            .iter()
            .find(|e| &e.permission == permission);
        Ok(match entry {
            Some(e) if e.effect.is_allow() => AccessDecision::Granted {
                permission: permission.clone(),
                grant_id: e.source.grant_id,
                origin: e.source.origin.clone(),
                depth: e.source.depth,
            },
            Some(e) => AccessDecision::Denied {
                permission: permission.clone(),
                reason: format!(
                    "explicitly denied by grant {} on role {}",
                    e.source.grant_id, e.source.origin
                ),
            },
            None => AccessDecision::Denied {
                permission: permission.clone(),
                reason: "no applicable grant".into(),
            },
        })
    }

    pub(crate) async fn load_graph(&self) -> Result<RoleGraph> {
        let roles = self.role_store.list().await?;
        let rules = self.role_store.rules().await?;
        RoleGraph::build_with_max_depth(roles, rules, self.max_depth)
    }

    /// Walks the role and its ancestors, returning every applicable
    /// (grant, concrete permission) candidate plus a trace of what was
    /// considered and why anything was dropped.
    pub(crate) async fn collect_candidates(
        &self,
        graph: &RoleGraph,
        role: &RoleId,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> Result<(Vec<Candidate>, Vec<TraceEntry>)> {
        let mut contexts: Vec<(RoleId, InheritancePath)> = vec![(
            role.clone(),
            InheritancePath {
                ancestor: role.clone(),
                depth: 0,
                filter: None,
                edge_priority: 0,
            },
        )];
        for path in graph.inheritance_paths(role) {
            contexts.push((path.ancestor.clone(), path));
        }

        let mut candidates = Vec::new();
        let mut trace = Vec::new();

        for (origin, path) in contexts {
            let origin_role = graph
                .get(&origin)
                .ok_or_else(|| Error::RoleNotFound(origin.to_string()))?;
            if !origin_role.active && origin != *role {
                tracing::debug!(role = %origin, "skipping deactivated ancestor");
                continue;
            }

            for grant in self.grant_store.list_for_role(&origin).await? {
                if grant.is_revoked(at) {
                    trace.push(TraceEntry {
                        grant_id: grant.id,
                        origin: origin.clone(),
                        permission: grant.permission.clone(),
                        included: false,
                        detail: "revoked".into(),
                    });
                    continue;
                }
                if grant.is_expired(at) {
                    trace.push(TraceEntry {
                        grant_id: grant.id,
                        origin: origin.clone(),
                        permission: grant.permission.clone(),
                        included: false,
                        detail: "expired".into(),
                    });
                    continue;
                }
                if !grant.scope.contains(scope) {
                    trace.push(TraceEntry {
                        grant_id: grant.id,
                        origin: origin.clone(),
                        permission: grant.permission.clone(),
                        included: false,
                        detail: format!("scope {} does not cover {}", grant.scope, scope),
                    });
                    continue;
                }

                let concrete = self.catalog.expand_code(&grant.permission).await?;
                if concrete.is_empty() {
                    trace.push(TraceEntry {
                        grant_id: grant.id,
                        origin: origin.clone(),
                        permission: grant.permission.clone(),
                        included: false,
                        detail: "no active permission definition matches".into(),
                    });
                    continue;
                }

                for code in concrete {
                    if !path.admits(&code) {
                        trace.push(TraceEntry {
                            grant_id: grant.id,
                            origin: origin.clone(),
                            permission: code.clone(),
                            included: false,
                            detail: "filtered by selected inheritance".into(),
                        });
                        continue;
                    }
                    trace.push(TraceEntry {
                        grant_id: grant.id,
                        origin: origin.clone(),
                        permission: code.clone(),
                        included: true,
                        detail: format!("{} at depth {}", grant.effect, path.depth),
                    });
                    candidates.push(Candidate {
                        permission: code,
                        effect: grant.effect,
                        grant_id: grant.id,
                        origin: origin.clone(),
                        grant_priority: grant.priority,
                        depth: path.depth,
                        edge_priority: path.edge_priority,
                        scope_specificity: grant.scope.specificity(),
                    });
                }
            }
        }

        Ok((candidates, trace))
    }
}

/// Combines candidates into final per-permission effects.
///
/// Only the highest grant-priority stratum decides; within it deny overrides
/// allow. The winning source among equals is the closest grant (smallest
/// depth), then the highest edge priority, then the most specific scope.
fn combine(candidates: Vec<Candidate>) -> Vec<EffectiveEntry> {
    let mut by_code: BTreeMap<PermissionCode, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        by_code
            .entry(candidate.permission.clone())
            .or_default()
            .push(candidate);
    }

    let mut entries = Vec::new();
    for (permission, mut group) in by_code {
        group.sort_by(|a, b| {
            b.grant_priority
                .cmp(&a.grant_priority)
                .then(a.depth.cmp(&b.depth))
                .then(b.edge_priority.cmp(&a.edge_priority))
                .then(b.scope_specificity.cmp(&a.scope_specificity))
        });
        let top_priority = group[0].grant_priority;
        let stratum: Vec<&Candidate> = group
            .iter()
            .filter(|c| c.grant_priority == top_priority)
            .collect();
        let effect = if stratum.iter().any(|c| c.effect == Effect::Deny) {
            Effect::Deny
        } else {
            Effect::Allow
        };
        let winner = stratum
            .iter()
            .find(|c| c.effect == effect)
            .expect("stratum contains the deciding effect");

        entries.push(EffectiveEntry {
            permission,
            effect,
            source: WinningSource {
                grant_id: winner.grant_id,
                origin: winner.origin.clone(),
                depth: winner.depth,
            },
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalogStore, Permission};
    use crate::grant::Grant;
    use crate::role::{InheritanceMode, InheritanceRule, Role};
    use crate::store::{InMemoryGrantStore, InMemoryRoleStore};
    use chrono::Duration;

    fn code(s: &str) -> PermissionCode {
        PermissionCode::new(s).unwrap()
    }

    fn rid(s: &str) -> RoleId {
        RoleId::new_unchecked(s)
    }

    struct Fixture {
        catalog: Arc<InMemoryCatalogStore>,
        roles: Arc<InMemoryRoleStore>,
        grants: Arc<InMemoryGrantStore>,
    }

    impl Fixture {
        fn resolver(&self) -> EffectivePermissionResolver {
            EffectivePermissionResolver::new(
                Arc::clone(&self.catalog) as Arc<dyn CatalogStore>,
                Arc::clone(&self.roles) as Arc<dyn RoleStore>,
                Arc::clone(&self.grants) as Arc<dyn GrantStore>,
            )
        }
    }

    async fn fixture() -> Fixture {
        let f = Fixture {
            catalog: Arc::new(InMemoryCatalogStore::new()),
            roles: Arc::new(InMemoryRoleStore::new()),
            grants: Arc::new(InMemoryGrantStore::new()),
        };
        for c in [
            "budget:read",
            "budget:write",
            "budget:approve",
            "crm:read",
            "crm:write",
        ] {
            f.catalog
                .register(Permission::new(
                    code(c),
                    c.split(':').next().unwrap().to_string(),
                ))
                .await
                .unwrap();
        }
        for r in ["clerk", "manager", "director"] {
            f.roles
                .create(Role::new(rid(r), r.to_uppercase()))
                .await
                .unwrap();
        }
        f.roles
            .link(InheritanceRule::new(rid("manager"), rid("clerk")))
            .await
            .unwrap();
        f.roles
            .link(InheritanceRule::new(rid("director"), rid("manager")))
            .await
            .unwrap();
        f
    }

    #[tokio::test]
    async fn test_inherited_grants_flow_to_child() {
        let f = fixture().await;
        f.grants
            .issue(Grant::new(rid("clerk"), code("crm:read"), Effect::Allow, "admin"))
            .await
            .unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("director"), Scope::Global))
            .await
            .unwrap();

        assert_eq!(resolved.effect_of(&code("crm:read")), Some(Effect::Allow));
        let entry = &resolved.entries[0];
        assert_eq!(entry.source.origin, rid("clerk"));
        assert_eq!(entry.source.depth, 2);
    }

    #[tokio::test]
    async fn test_deny_overrides_allow_same_priority() {
        let f = fixture().await;
        f.grants
            .issue(Grant::new(rid("clerk"), code("budget:read"), Effect::Allow, "admin"))
            .await
            .unwrap();
        f.grants
            .issue(Grant::new(rid("manager"), code("budget:read"), Effect::Deny, "admin"))
            .await
            .unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        assert_eq!(resolved.effect_of(&code("budget:read")), Some(Effect::Deny));
    }

    #[tokio::test]
    async fn test_higher_priority_allow_beats_lower_priority_deny() {
        let f = fixture().await;
        f.grants
            .issue(
                Grant::new(rid("manager"), code("budget:write"), Effect::Deny, "admin")
                    .with_priority(1),
            )
            .await
            .unwrap();
        f.grants
            .issue(
                Grant::new(rid("manager"), code("budget:write"), Effect::Allow, "admin")
                    .with_priority(10),
            )
            .await
            .unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        assert_eq!(
            resolved.effect_of(&code("budget:write")),
            Some(Effect::Allow)
        );
    }

    #[tokio::test]
    async fn test_expired_grant_excluded() {
        let f = fixture().await;
        let now = Utc::now();
        let mut g = Grant::new(rid("manager"), code("budget:read"), Effect::Allow, "admin");
        g.granted_at = now - Duration::hours(2);
        g.expires_at = Some(now - Duration::hours(1));
        f.grants.issue(g).await.unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        assert!(resolved.entries.is_empty());
        assert!(resolved.trace.iter().any(|t| t.detail == "expired"));

        // Resolving at an instant before expiry still sees it.
        let resolved = f
            .resolver()
            .resolve(
                &ResolveRequest::new(rid("manager"), Scope::Global)
                    .at(now - Duration::minutes(90)),
            )
            .await
            .unwrap();
        assert_eq!(resolved.effect_of(&code("budget:read")), Some(Effect::Allow));
    }

    #[tokio::test]
    async fn test_scope_narrowing() {
        let f = fixture().await;
        let org = Scope::organization("acme").unwrap();
        let dept = Scope::department("acme", "finance").unwrap();
        f.grants
            .issue(
                Grant::new(rid("manager"), code("budget:read"), Effect::Allow, "admin")
                    .with_scope(org.clone()),
            )
            .await
            .unwrap();

        let resolver = f.resolver();

        // Org-scoped grant covers the department...
        let resolved = resolver
            .resolve(&ResolveRequest::new(rid("manager"), dept))
            .await
            .unwrap();
        assert_eq!(resolved.entries.len(), 1);

        // ...but not the global scope or another organization.
        let resolved = resolver
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        assert!(resolved.entries.is_empty());
        let resolved = resolver
            .resolve(&ResolveRequest::new(
                rid("manager"),
                Scope::organization("globex").unwrap(),
            ))
            .await
            .unwrap();
        assert!(resolved.entries.is_empty());
    }

    #[tokio::test]
    async fn test_selected_inheritance_filters() {
        let f = fixture().await;
        f.roles
            .unlink(&rid("director"), &rid("manager"))
            .await
            .unwrap();
        f.roles
            .link(
                InheritanceRule::new(rid("director"), rid("manager"))
                    .with_mode(InheritanceMode::selected([code("budget:read")])),
            )
            .await
            .unwrap();
        f.grants
            .issue(Grant::new(rid("manager"), code("budget:read"), Effect::Allow, "admin"))
            .await
            .unwrap();
        f.grants
            .issue(Grant::new(rid("manager"), code("budget:write"), Effect::Allow, "admin"))
            .await
            .unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("director"), Scope::Global))
            .await
            .unwrap();
        assert_eq!(resolved.effect_of(&code("budget:read")), Some(Effect::Allow));
        assert_eq!(resolved.effect_of(&code("budget:write")), None);
        assert!(resolved
            .trace
            .iter()
            .any(|t| t.detail == "filtered by selected inheritance"));
    }

    #[tokio::test]
    async fn test_wildcard_grant_expands_against_catalog() {
        let f = fixture().await;
        f.grants
            .issue(Grant::new(
                rid("manager"),
                PermissionCode::wildcard("budget:*").unwrap(),
                Effect::Allow,
                "admin",
            ))
            .await
            .unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        let allowed = resolved.allowed();
        assert!(allowed.contains(&code("budget:read")));
        assert!(allowed.contains(&code("budget:write")));
        assert!(allowed.contains(&code("budget:approve")));
        assert!(!allowed.contains(&code("crm:read")));
    }

    #[tokio::test]
    async fn test_inactive_permission_dropped() {
        let f = fixture().await;
        f.grants
            .issue(Grant::new(rid("manager"), code("crm:write"), Effect::Allow, "admin"))
            .await
            .unwrap();
        f.catalog.deactivate(&code("crm:write")).await.unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        assert!(resolved.entries.is_empty());
    }

    #[tokio::test]
    async fn test_check_decisions() {
        let f = fixture().await;
        f.grants
            .issue(Grant::new(rid("manager"), code("budget:read"), Effect::Allow, "admin"))
            .await
            .unwrap();
        f.grants
            .issue(Grant::new(rid("manager"), code("budget:write"), Effect::Deny, "admin"))
            .await
            .unwrap();

        let resolver = f.resolver();
        let decision = resolver
            .check(&rid("manager"), &code("budget:read"), &Scope::Global, None)
            .await
            .unwrap();
        assert!(decision.is_granted());

        let decision = resolver
            .check(&rid("manager"), &code("budget:write"), &Scope::Global, None)
            .await
            .unwrap();
        assert!(!decision.is_granted());

        let decision = resolver
            .check(&rid("manager"), &code("crm:read"), &Scope::Global, None)
            .await
            .unwrap();
        match decision {
            AccessDecision::Denied { reason, .. } => {
                assert_eq!(reason, "no applicable grant")
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_or_inactive_role() {
        let f = fixture().await;
        let err = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("ghost"), Scope::Global))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleNotFound(_)));

        f.roles.deactivate(&rid("manager")).await.unwrap();
        let err = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleNotActive(_)));
    }

    #[tokio::test]
    async fn test_deactivated_ancestor_contributes_nothing() {
        let f = fixture().await;
        f.grants
            .issue(Grant::new(rid("clerk"), code("crm:read"), Effect::Allow, "admin"))
            .await
            .unwrap();
        f.roles.deactivate(&rid("clerk")).await.unwrap();

        let resolved = f
            .resolver()
            .resolve(&ResolveRequest::new(rid("manager"), Scope::Global))
            .await
            .unwrap();
        assert!(resolved.entries.is_empty());
    }
}
