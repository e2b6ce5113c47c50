#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::PermissionCode;
use crate::hierarchy::TransitiveClosure;
use crate::{Error, Result};

/// A permission that is effectively held without one of its prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPrerequisite {
    pub permission: PermissionCode,
    pub requires: PermissionCode,
}

/// Prerequisite edges between permissions, e.g. `budget:approve` requires
/// `budget:read`. Used to validate effective sets and to auto-expand grants.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    prerequisites: BTreeMap<PermissionCode, BTreeSet<PermissionCode>>,
    closure: TransitiveClosure<PermissionCode>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, permission: PermissionCode, requires: PermissionCode) -> Result<()> {
        if permission.is_wildcard() || requires.is_wildcard() {
            return Err(Error::Validation(
                "dependency edges must use concrete permission codes".into(),
            ));
        }
        self.closure
            .add_edge(permission.clone(), requires.clone())
            .map_err(|e| Error::DependencyCycle(e.describe()))?;
        self.prerequisites
            .entry(permission)
            .or_default()
            .insert(requires);
        Ok(())
    }

    pub fn direct_prerequisites(&self, permission: &PermissionCode) -> BTreeSet<PermissionCode> {
        self.prerequisites
            .get(permission)
            .cloned()
            .unwrap_or_default()
    }

    /// The transitive prerequisite set of one permission.
    pub fn closure_of(&self, permission: &PermissionCode) -> BTreeSet<PermissionCode> {
        self.closure
            .reachable_from(permission)
            .into_iter()
            .collect()
    }

    /// Flags every held permission whose direct prerequisite is not held.
    pub fn validate(&self, held: &BTreeSet<PermissionCode>) -> Vec<MissingPrerequisite> {
        let mut missing = Vec::new();
        for permission in held {
            for requires in self.direct_prerequisites(permission) {
                if !held.contains(&requires) {
                    missing.push(MissingPrerequisite {
                        permission: permission.clone(),
                        requires,
                    });
                }
            }
        }
        missing
    }

    /// The input set plus its full prerequisite closure.
    pub fn expand(&self, held: &BTreeSet<PermissionCode>) -> BTreeSet<PermissionCode> {
        let mut out = held.clone();
        for permission in held {
            out.extend(self.closure_of(permission));
        }
        out
    }

    pub fn edges(&self) -> impl Iterator<Item = (&PermissionCode, &PermissionCode)> {
        self.prerequisites
            .iter()
            .flat_map(|(p, reqs)| reqs.iter().map(move |r| (p, r)))
    }

    pub fn is_empty(&self) -> bool {
        self.prerequisites.is_empty()
    }
}
