#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model parse error: {0}")]
    ModelParse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission not found: {0}")]
    PermissionNotFound(String),

    #[error("permission already registered: {0}")]
    PermissionExists(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("role already exists: {0}")]
    RoleExists(String),

    #[error("role not active: {0}")]
    RoleNotActive(String),

    #[error("inheritance cycle: {0}")]
    InheritanceCycle(String),

    #[error("inheritance rule already exists: {child} -> {parent}")]
    InheritanceExists { child: String, parent: String },

    #[error("role {role} at inheritance depth {depth} exceeds maximum {max}")]
    DepthExceeded {
        role: String,
        depth: usize,
        max: usize,
    },

    #[error("grant not found: {0}")]
    GrantNotFound(String),

    #[error("grant already revoked: {0}")]
    AlreadyRevoked(String),

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("audit error: {0}")]
    Audit(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::ModelParse(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
