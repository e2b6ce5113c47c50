#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::catalog::PermissionCode;
use crate::hierarchy::{max_depth, TransitiveClosure};
use crate::pattern::validate_id;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id("role", &id)?;
        Ok(Self(id))
    }

    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
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

impl Role {
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
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
        validate_id("role", self.id.as_str())?;
        if self.name.is_empty() {
            return Err(Error::Validation("role name is required".into()));
        }
        if self.name.len() > 128 {
            return Err(Error::Validation(
                "role name must be 128 chars or less".into(),
            ));
        }
        Ok(())
    }
}

/// What a child inherits through one edge: everything, or only the listed
/// permission codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceMode {
    All,
    Selected(BTreeSet<PermissionCode>),
}

impl InheritanceMode {
    pub fn selected<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = PermissionCode>,
    {
        Self::Selected(codes.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritanceRule {
    pub child: RoleId,
    pub parent: RoleId,
    #[serde(default = "default_mode")]
    pub mode: InheritanceMode,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_mode() -> InheritanceMode {
    InheritanceMode::All
}

impl InheritanceRule {
    pub fn new(child: RoleId, parent: RoleId) -> Self {
        Self {
            child,
            parent,
            mode: InheritanceMode::All,
            priority: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: InheritanceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("role", self.child.as_str())?;
        validate_id("role", self.parent.as_str())?;
        if self.child == self.parent {
            return Err(Error::InheritanceCycle(format!(
                "{} -> {}",
                self.child, self.parent
            )));
        }
        if let InheritanceMode::Selected(permissions) = &self.mode {
            if permissions.is_empty() {
                return Err(Error::Validation(format!(
                    "selected inheritance {} -> {} lists no permissions",
                    self.child, self.parent
                )));
            }
            for code in permissions {
                code.validate(false)?;
            }
        }
        Ok(())
    }
}

/// One way a role reaches an ancestor.
///
/// `filter` is the intersection of every `Selected` set along the path
/// (`None` when all edges inherit everything). `edge_priority` is the
/// priority of the first edge out of the starting role, used as a late
/// tie-break by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritancePath {
    pub ancestor: RoleId,
    pub depth: usize,
    pub filter: Option<BTreeSet<PermissionCode>>,
    pub edge_priority: u32,
}

impl InheritancePath {
    pub fn admits(&self, code: &PermissionCode) -> bool {
        match &self.filter {
            None => true,
            Some(allowed) => allowed.contains(code),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleGraph {
    roles: HashMap<RoleId, Role>,
    parents: HashMap<RoleId, Vec<InheritanceRule>>,
}

impl RoleGraph {
    pub const DEFAULT_MAX_DEPTH: usize = 10;

    pub fn build(roles: Vec<Role>, rules: Vec<InheritanceRule>) -> Result<Self> {
        Self::build_with_max_depth(roles, rules, Self::DEFAULT_MAX_DEPTH)
    }

    pub fn build_with_max_depth(
        roles: Vec<Role>,
        rules: Vec<InheritanceRule>,
        max: usize,
    ) -> Result<Self> {
        let role_map: HashMap<RoleId, Role> =
            roles.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut closure: TransitiveClosure<RoleId> = TransitiveClosure::new();
        for id in role_map.keys() {
            closure.add_node(id.clone());
        }

        let mut parents: HashMap<RoleId, Vec<InheritanceRule>> = HashMap::new();
        for rule in rules {
            rule.validate()?;
            for end in [&rule.child, &rule.parent] {
                if !role_map.contains_key(end) {
                    return Err(Error::RoleNotFound(end.to_string()));
                }
            }
            let existing = parents.entry(rule.child.clone()).or_default();
            if existing.iter().any(|r| r.parent == rule.parent) {
                return Err(Error::InheritanceExists {
                    child: rule.child.to_string(),
                    parent: rule.parent.to_string(),
                });
            }
            closure
                .add_edge(rule.child.clone(), rule.parent.clone())
                .map_err(|e| Error::InheritanceCycle(e.describe()))?;
            existing.push(rule);
        }

        let adjacency: HashMap<RoleId, Vec<RoleId>> = parents
            .iter()
            .map(|(child, rules)| {
                (
                    child.clone(),
                    rules.iter().map(|r| r.parent.clone()).collect(),
                )
            })
            .collect();
        for (role, depth) in max_depth(&adjacency) {
            if depth > max {
                return Err(Error::DepthExceeded {
                    role: role.to_string(),
                    depth,
                    max,
                });
            }
        }

        Ok(Self {
            roles: role_map,
            parents,
        })
    }

    pub fn get(&self, id: &RoleId) -> Option<&Role> {
        self.roles.get(id)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn rules_for(&self, child: &RoleId) -> &[InheritanceRule] {
        self.parents.get(child).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn inherits_from(&self, role: &RoleId, ancestor: &RoleId) -> bool {
        self.inheritance_paths(role)
            .iter()
            .any(|p| &p.ancestor == ancestor)
    }

    /// Enumerates every path from `role` to each ancestor.
    ///
    /// The graph is acyclic by construction and bounded in depth, so plain
    /// path enumeration is fine at the scale roles exist in practice.
    pub fn inheritance_paths(&self, role: &RoleId) -> Vec<InheritancePath> {
        let mut out = Vec::new();
        let mut stack: Vec<(RoleId, usize, Option<BTreeSet<PermissionCode>>, Option<u32>)> =
            vec![(role.clone(), 0, None, None)];

        while let Some((current, depth, filter, first_priority)) = stack.pop() {
            for rule in self.rules_for(&current) {
                let next_filter = match (&filter, &rule.mode) {
                    (None, InheritanceMode::All) => None,
                    (None, InheritanceMode::Selected(permissions)) => {
                        Some(permissions.clone())
                    }
                    (Some(f), InheritanceMode::All) => Some(f.clone()),
                    (Some(f), InheritanceMode::Selected(permissions)) => {
                        Some(f.intersection(permissions).cloned().collect())
                    }
                };
                let edge_priority = first_priority.unwrap_or(rule.priority);
                out.push(InheritancePath {
                    ancestor: rule.parent.clone(),
                    depth: depth + 1,
                    filter: next_filter.clone(),
                    edge_priority,
                });
                stack.push((rule.parent.clone(), depth + 1, next_filter, Some(edge_priority)));
            }
        }

        out
    }
}
