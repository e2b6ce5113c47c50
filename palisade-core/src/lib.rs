#![forbid(unsafe_code)]

pub mod audit;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod grant;
pub mod hierarchy;
pub mod model;
pub mod pattern;
pub mod resolver;
pub mod role;
pub mod scope;
pub mod store;

pub use audit::{
    ActorInfo, ActorType, AuditEvent, AuditEventType, AuditLog, AuditQuery, AuditStore,
    ChainVerification, EventId, InMemoryAuditStore, ResourceInfo,
};
pub use catalog::{CatalogStore, InMemoryCatalogStore, Permission, PermissionCode};
pub use config::Config;
pub use conflict::{Conflict, ConflictDetector, ConflictKind, ConflictingGrant};
pub use dependency::{DependencyIndex, MissingPrerequisite};
pub use engine::PermissionEngine;
pub use error::{Error, Result};
pub use grant::{Effect, Grant, MAX_GRANT_PRIORITY};
pub use model::{AccessModel, DependencyEntry};
pub use pattern::{matches_pattern, validate_actor_id, validate_code};
pub use resolver::{
    AccessDecision, EffectiveEntry, EffectivePermissionResolver, EffectivePermissions,
    ResolveRequest, TraceEntry, WinningSource,
};
pub use role::{InheritanceMode, InheritancePath, InheritanceRule, Role, RoleGraph, RoleId};
pub use scope::Scope;
pub use store::{
    GrantStore, InMemoryGrantStore, InMemoryRoleStore, RedbCatalogStore, RedbGrantStore,
    RedbRoleStore, RedbStorage, RoleStore,
};
