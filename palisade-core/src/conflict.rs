#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::catalog::PermissionCode;
use crate::grant::Effect;
use crate::resolver::{Candidate, EffectivePermissionResolver};
use crate::role::RoleId;
use crate::scope::Scope;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingGrant {
    pub grant_id: Uuid,
    pub origin: RoleId,
    pub depth: usize,
    pub effect: Effect,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The role's own grants and inherited grants disagree on effect.
    DirectVsInherited,
    /// Two grants in the deciding priority stratum disagree; deny-overrides
    /// was applied.
    OpposingEffects,
    /// A lower-priority grant disagrees with the resolved effect but can
    /// never win against the higher-priority stratum.
    ShadowedGrant,
}

/// A disagreement the resolver settled mechanically, surfaced for manual
/// review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub permission: PermissionCode,
    pub kind: ConflictKind,
    pub resolved_effect: Effect,
    pub grants: Vec<ConflictingGrant>,
}

pub struct ConflictDetector {
    resolver: EffectivePermissionResolver,
}

impl ConflictDetector {
    pub fn new(resolver: EffectivePermissionResolver) -> Self {
        Self { resolver }
    }

    pub async fn detect(
        &self,
        role: &RoleId,
        scope: &Scope,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<Conflict>> {
        let at = at.unwrap_or_else(Utc::now);
        let graph = self.resolver.load_graph().await?;
        let (candidates, _) = self
            .resolver
            .collect_candidates(&graph, role, scope, at)
            .await?;

        let mut by_code: BTreeMap<PermissionCode, Vec<Candidate>> = BTreeMap::new();
        for candidate in candidates {
            by_code
                .entry(candidate.permission.clone())
                .or_default()
                .push(candidate);
        }

        let mut conflicts = Vec::new();
        for (permission, group) in by_code {
            let top_priority = group
                .iter()
                .map(|c| c.grant_priority)
                .max()
                .expect("group is non-empty");
            let stratum: Vec<&Candidate> = group
                .iter()
                .filter(|c| c.grant_priority == top_priority)
                .collect();
            let resolved_effect = if stratum.iter().any(|c| c.effect == Effect::Deny) {
                Effect::Deny
            } else {
                Effect::Allow
            };

            if stratum.iter().any(|c| c.effect == Effect::Allow)
                && stratum.iter().any(|c| c.effect == Effect::Deny)
            {
                conflicts.push(Conflict {
                    permission: permission.clone(),
                    kind: ConflictKind::OpposingEffects,
                    resolved_effect,
                    grants: stratum.iter().map(|c| describe(c)).collect(),
                });
            }

            let direct: Vec<&Candidate> = group.iter().filter(|c| c.depth == 0).collect();
            let inherited: Vec<&Candidate> = group.iter().filter(|c| c.depth > 0).collect();
            if !direct.is_empty() && !inherited.is_empty() {
                let direct_disagrees = direct.iter().any(|d| {
                    inherited.iter().any(|i| i.effect != d.effect)
                });
                if direct_disagrees {
                    conflicts.push(Conflict {
                        permission: permission.clone(),
                        kind: ConflictKind::DirectVsInherited,
                        resolved_effect,
                        grants: group.iter().map(describe).collect(),
                    });
                }
            }

            let shadowed: Vec<&Candidate> = group
                .iter()
                .filter(|c| c.grant_priority < top_priority && c.effect != resolved_effect)
                .collect();
            if !shadowed.is_empty() {
                conflicts.push(Conflict {
                    permission,
                    kind: ConflictKind::ShadowedGrant,
                    resolved_effect,
                    grants: shadowed.into_iter().map(describe).collect(),
                });
            }
        }

        Ok(conflicts)
    }
}

fn describe(candidate: &Candidate) -> ConflictingGrant {
    ConflictingGrant {
        grant_id: candidate.grant_id,
        origin: candidate.origin.clone(),
        depth: candidate.depth,
        effect: candidate.effect,
        priority: candidate.grant_priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, InMemoryCatalogStore, Permission};
    use crate::grant::Grant;
    use crate::role::{InheritanceRule, Role};
    use crate::store::{GrantStore, InMemoryGrantStore, InMemoryRoleStore, RoleStore};
    use std::sync::Arc;

    fn code(s: &str) -> PermissionCode {
        PermissionCode::new(s).unwrap()
    }

    fn rid(s: &str) -> RoleId {
        RoleId::new_unchecked(s)
    }

    async fn detector_with(
        grants: Vec<Grant>,
    ) -> ConflictDetector {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        catalog
            .register(Permission::new(code("budget:read"), "budget"))
            .await
            .unwrap();
        let roles = Arc::new(InMemoryRoleStore::new());
        roles
            .create(Role::new(rid("clerk"), "Clerk"))
            .await
            .unwrap();
        roles
            .create(Role::new(rid("manager"), "Manager"))
            .await
            .unwrap();
        roles
            .link(InheritanceRule::new(rid("manager"), rid("clerk")))
            .await
            .unwrap();
        let grant_store = Arc::new(InMemoryGrantStore::new());
        for g in grants {
            grant_store.issue(g).await.unwrap();
        }
        ConflictDetector::new(EffectivePermissionResolver::new(
            catalog,
            roles,
            grant_store,
        ))
    }

    #[tokio::test]
    async fn test_direct_deny_vs_inherited_allow() {
        let detector = detector_with(vec![
            Grant::new(rid("clerk"), code("budget:read"), Effect::Allow, "admin"),
            Grant::new(rid("manager"), code("budget:read"), Effect::Deny, "admin"),
        ])
        .await;

        let conflicts = detector
            .detect(&rid("manager"), &Scope::Global, None)
            .await
            .unwrap();

        assert!(conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::DirectVsInherited
                && c.resolved_effect == Effect::Deny));
        assert!(conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::OpposingEffects));
    }

    #[tokio::test]
    async fn test_shadowed_grant_flagged() {
        let detector = detector_with(vec![
            Grant::new(rid("manager"), code("budget:read"), Effect::Deny, "admin")
                .with_priority(1),
            Grant::new(rid("manager"), code("budget:read"), Effect::Allow, "admin")
                .with_priority(10),
        ])
        .await;

        let conflicts = detector
            .detect(&rid("manager"), &Scope::Global, None)
            .await
            .unwrap();

        let shadowed = conflicts
            .iter()
            .find(|c| c.kind == ConflictKind::ShadowedGrant)
            .unwrap();
        assert_eq!(shadowed.resolved_effect, Effect::Allow);
        assert_eq!(shadowed.grants.len(), 1);
        assert_eq!(shadowed.grants[0].effect, Effect::Deny);
    }

    #[tokio::test]
    async fn test_agreement_is_not_a_conflict() {
        let detector = detector_with(vec![
            Grant::new(rid("clerk"), code("budget:read"), Effect::Allow, "admin"),
            Grant::new(rid("manager"), code("budget:read"), Effect::Allow, "admin"),
        ])
        .await;

        let conflicts = detector
            .detect(&rid("manager"), &Scope::Global, None)
            .await
            .unwrap();
        assert!(conflicts.is_empty());
    }
}
