#![forbid(unsafe_code)]

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::pattern::validate_id;
use crate::{Error, Result};

/// The organizational context a grant applies to.
///
/// Containment runs global ⊃ organization ⊃ department: a grant scoped to an
/// organization covers every department of that organization, a department
/// grant covers only itself. Serialized as its textual form (`global`,
/// `org:<id>`, `dept:<org>/<dept>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Organization { org: String },
    Department { org: String, dept: String },
}

impl Scope {
    pub fn organization(org: impl Into<String>) -> Result<Self> {
        let org = org.into();
        validate_id("organization", &org)?;
        Ok(Scope::Organization { org })
    }

    pub fn department(org: impl Into<String>, dept: impl Into<String>) -> Result<Self> {
        let org = org.into();
        let dept = dept.into();
        validate_id("organization", &org)?;
        validate_id("department", &dept)?;
        Ok(Scope::Department { org, dept })
    }

    pub fn contains(&self, other: &Scope) -> bool {
        match (self, other) {
            (Scope::Global, _) => true,
            (Scope::Organization { org }, Scope::Organization { org: o }) => org == o,
            (Scope::Organization { org }, Scope::Department { org: o, .. }) => org == o,
            (Scope::Department { org, dept }, Scope::Department { org: o, dept: d }) => {
                org == o && dept == d
            }
            _ => false,
        }
    }

    /// Specificity rank used by tie-breaks: department > organization > global.
    pub fn specificity(&self) -> u8 {
        match self {
            Scope::Global => 0,
            Scope::Organization { .. } => 1,
            Scope::Department { .. } => 2,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Organization { org } => write!(f, "org:{}", org),
            Scope::Department { org, dept } => write!(f, "dept:{}/{}", org, dept),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "global" {
            return Ok(Scope::Global);
        }
        if let Some(org) = s.strip_prefix("org:") {
            return Scope::organization(org);
        }
        if let Some(rest) = s.strip_prefix("dept:") {
            let Some((org, dept)) = rest.split_once('/') else {
                return Err(Error::InvalidInput(format!(
                    "department scope '{}' must be dept:<org>/<dept>",
                    s
                )));
            };
            return Scope::department(org, dept);
        }
        Err(Error::InvalidInput(format!(
            "scope '{}' must be global, org:<id>, or dept:<org>/<dept>",
            s
        )))
    }
}
