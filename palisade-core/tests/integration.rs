#![forbid(unsafe_code)]

use chrono::{Duration, Utc};
use std::sync::Arc;

use palisade_core::{
    AccessDecision, AccessModel, CatalogStore, Conflict, ConflictKind, Effect, Grant,
    GrantStore, InMemoryAuditStore, InMemoryCatalogStore, InMemoryGrantStore, InMemoryRoleStore,
    InheritanceMode, InheritanceRule, Permission, PermissionCode, PermissionEngine, RedbStorage,
    ResolveRequest, Role, RoleId, RoleStore, Scope,
};

fn code(s: &str) -> PermissionCode {
    PermissionCode::new(s).unwrap()
}

fn rid(s: &str) -> RoleId {
    RoleId::new_unchecked(s)
}

async fn engine() -> PermissionEngine<InMemoryAuditStore> {
    PermissionEngine::new(
        Arc::new(InMemoryCatalogStore::new()),
        Arc::new(InMemoryRoleStore::new()),
        Arc::new(InMemoryGrantStore::new()),
        InMemoryAuditStore::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_full_resolution_flow() {
    let engine = engine().await;

    for (c, cat) in [
        ("budget:read", "budget"),
        ("budget:write", "budget"),
        ("budget:approve", "budget"),
        ("inventory:read", "inventory"),
        ("inventory:adjust", "inventory"),
    ] {
        engine
            .register_permission(Permission::new(code(c), cat), "admin")
            .await
            .unwrap();
    }

    for (id, name) in [
        ("clerk", "Clerk"),
        ("accountant", "Accountant"),
        ("finance-manager", "Finance Manager"),
    ] {
        engine
            .create_role(Role::new(rid(id), name), "admin")
            .await
            .unwrap();
    }
    engine
        .link_roles(InheritanceRule::new(rid("accountant"), rid("clerk")), "admin")
        .await
        .unwrap();
    engine
        .link_roles(
            InheritanceRule::new(rid("finance-manager"), rid("accountant")).with_priority(5),
            "admin",
        )
        .await
        .unwrap();

    let acme = Scope::organization("acme").unwrap();
    let finance = Scope::department("acme", "finance").unwrap();

    // Clerk can read budgets anywhere in acme; accountants can write.
    engine
        .issue_grant(
            Grant::new(rid("clerk"), code("budget:read"), Effect::Allow, "admin")
                .with_scope(acme.clone()),
            "admin",
            false,
        )
        .await
        .unwrap();
    engine
        .issue_grant(
            Grant::new(rid("accountant"), code("budget:write"), Effect::Allow, "admin")
                .with_scope(acme.clone()),
            "admin",
            false,
        )
        .await
        .unwrap();
    // Finance managers approve, but only inside their own department.
    engine
        .issue_grant(
            Grant::new(
                rid("finance-manager"),
                code("budget:approve"),
                Effect::Allow,
                "admin",
            )
            .with_scope(finance.clone()),
            "admin",
            false,
        )
        .await
        .unwrap();

    let resolved = engine
        .resolve(
            &ResolveRequest::new(rid("finance-manager"), finance.clone()),
            "admin",
        )
        .await
        .unwrap();

    let allowed = resolved.allowed();
    assert!(allowed.contains(&code("budget:read")));
    assert!(allowed.contains(&code("budget:write")));
    assert!(allowed.contains(&code("budget:approve")));
    assert!(!allowed.contains(&code("inventory:read")));

    // In another department the approve grant no longer applies.
    let hr = Scope::department("acme", "hr").unwrap();
    let resolved = engine
        .resolve(&ResolveRequest::new(rid("finance-manager"), hr), "admin")
        .await
        .unwrap();
    let allowed = resolved.allowed();
    assert!(allowed.contains(&code("budget:read")));
    assert!(!allowed.contains(&code("budget:approve")));

    assert!(engine.verify_audit_chain().await.unwrap().is_valid());
}

#[tokio::test]
async fn test_deny_override_and_conflict_reporting() {
    let engine = engine().await;
    engine
        .register_permission(Permission::new(code("payroll:run"), "payroll"), "admin")
        .await
        .unwrap();
    engine
        .create_role(Role::new(rid("operator"), "Operator"), "admin")
        .await
        .unwrap();
    engine
        .create_role(Role::new(rid("supervisor"), "Supervisor"), "admin")
        .await
        .unwrap();
    engine
        .link_roles(
            InheritanceRule::new(rid("supervisor"), rid("operator")),
            "admin",
        )
        .await
        .unwrap();

    engine
        .issue_grant(
            Grant::new(rid("operator"), code("payroll:run"), Effect::Allow, "admin"),
            "admin",
            false,
        )
        .await
        .unwrap();
    engine
        .issue_grant(
            Grant::new(rid("supervisor"), code("payroll:run"), Effect::Deny, "admin"),
            "admin",
            false,
        )
        .await
        .unwrap();

    // Inherited allow vs direct deny: deny wins at equal priority.
    let decision = engine
        .check(
            &rid("supervisor"),
            &code("payroll:run"),
            &Scope::Global,
            None,
            "admin",
        )
        .await
        .unwrap();
    assert!(!decision.is_granted());

    let conflicts: Vec<Conflict> = engine
        .detect_conflicts(&rid("supervisor"), &Scope::Global, None, "admin")
        .await
        .unwrap();
    assert!(conflicts
        .iter()
        .any(|c| c.kind == ConflictKind::DirectVsInherited));

    // The operator itself is unaffected.
    let decision = engine
        .check(
            &rid("operator"),
            &code("payroll:run"),
            &Scope::Global,
            None,
            "admin",
        )
        .await
        .unwrap();
    assert!(decision.is_granted());
}

#[tokio::test]
async fn test_expiring_grant_lifecycle() {
    let engine = engine().await;
    engine
        .register_permission(Permission::new(code("audit:export"), "audit"), "admin")
        .await
        .unwrap();
    engine
        .create_role(Role::new(rid("auditor"), "Auditor"), "admin")
        .await
        .unwrap();

    let expiry = Utc::now() + Duration::hours(8);
    let issued = engine
        .issue_grant(
            Grant::new(rid("auditor"), code("audit:export"), Effect::Allow, "admin")
                .with_expiry(expiry),
            "admin",
            false,
        )
        .await
        .unwrap();

    // Effective now, gone after expiry.
    let now_decision = engine
        .check(
            &rid("auditor"),
            &code("audit:export"),
            &Scope::Global,
            None,
            "admin",
        )
        .await
        .unwrap();
    assert!(now_decision.is_granted());

    let later = engine
        .check(
            &rid("auditor"),
            &code("audit:export"),
            &Scope::Global,
            Some(expiry + Duration::seconds(1)),
            "admin",
        )
        .await
        .unwrap();
    match later {
        AccessDecision::Denied { reason, .. } => assert_eq!(reason, "no applicable grant"),
        other => panic!("expected denial, got {:?}", other),
    }

    // Revocation is a soft delete visible to later resolutions only.
    let before_revoke = Utc::now();
    engine.revoke_grant(&issued[0].id, "admin").await.unwrap();
    let decision = engine
        .check(
            &rid("auditor"),
            &code("audit:export"),
            &Scope::Global,
            None,
            "admin",
        )
        .await
        .unwrap();
    assert!(!decision.is_granted());
    let decision = engine
        .check(
            &rid("auditor"),
            &code("audit:export"),
            &Scope::Global,
            Some(before_revoke),
            "admin",
        )
        .await
        .unwrap();
    assert!(decision.is_granted());

    // The revoked row survives for audit.
    let grant = engine
        .grant_store()
        .get(&issued[0].id)
        .await
        .unwrap()
        .unwrap();
    assert!(grant.revoked_at.is_some());
}

#[tokio::test]
async fn test_selected_inheritance_end_to_end() {
    let engine = engine().await;
    for c in ["crm:read", "crm:write", "crm:delete"] {
        engine
            .register_permission(Permission::new(code(c), "crm"), "admin")
            .await
            .unwrap();
    }
    engine
        .create_role(Role::new(rid("crm-admin"), "CRM Admin"), "admin")
        .await
        .unwrap();
    engine
        .create_role(Role::new(rid("intern"), "Intern"), "admin")
        .await
        .unwrap();
    engine
        .link_roles(
            InheritanceRule::new(rid("intern"), rid("crm-admin"))
                .with_mode(InheritanceMode::selected([code("crm:read")])),
            "admin",
        )
        .await
        .unwrap();
    engine
        .issue_grant(
            Grant::new(
                rid("crm-admin"),
                PermissionCode::wildcard("crm:*").unwrap(),
                Effect::Allow,
                "admin",
            ),
            "admin",
            false,
        )
        .await
        .unwrap();

    let resolved = engine
        .resolve(&ResolveRequest::new(rid("intern"), Scope::Global), "admin")
        .await
        .unwrap();
    let allowed = resolved.allowed();
    assert!(allowed.contains(&code("crm:read")));
    assert!(!allowed.contains(&code("crm:write")));
    assert!(!allowed.contains(&code("crm:delete")));

    let resolved = engine
        .resolve(&ResolveRequest::new(rid("crm-admin"), Scope::Global), "admin")
        .await
        .unwrap();
    assert_eq!(resolved.allowed().len(), 3);
}

#[tokio::test]
async fn test_model_load_into_redb_backed_engine() {
    let dir = tempfile::tempdir().unwrap();
    let storage = RedbStorage::open(dir.path().join("palisade.db")).unwrap();

    let engine = PermissionEngine::new(
        Arc::new(storage.catalog_store()),
        Arc::new(storage.role_store()),
        Arc::new(storage.grant_store()),
        InMemoryAuditStore::new(),
    )
    .await
    .unwrap();

    let model = AccessModel::from_yaml(
        r#"
version: "1.0"
permissions:
  - code: orders:read
    category: orders
  - code: orders:create
    category: orders
roles:
  - id: sales
    name: Sales
grants:
  - role: sales
    permission: orders:read
    effect: ALLOW
    granted_by: admin
"#,
    )
    .unwrap();
    model.apply(&engine, "admin").await.unwrap();

    let decision = engine
        .check(
            &rid("sales"),
            &code("orders:read"),
            &Scope::Global,
            None,
            "admin",
        )
        .await
        .unwrap();
    assert!(decision.is_granted());

    // Data survives a fresh set of store handles over the same database.
    let catalog = storage.catalog_store();
    assert_eq!(catalog.list().await.unwrap().len(), 2);
    let roles = storage.role_store();
    assert_eq!(roles.list().await.unwrap().len(), 1);
    let grants = storage.grant_store();
    assert_eq!(grants.list().await.unwrap().len(), 1);
}
