#![forbid(unsafe_code)]

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;
use crate::role::RoleGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_filename: String,
    pub max_hierarchy_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().unwrap_or_else(|_| {
                let fallback = std::env::temp_dir().join("palisade");
                tracing::warn!(
                    path = %fallback.display(),
                    "Could not determine platform data directory; using ephemeral temp directory"
                );
                fallback
            }),
            db_filename: "palisade.db".to_string(),
            max_hierarchy_depth: RoleGraph::DEFAULT_MAX_DEPTH,
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            data_dir: default_data_dir()?,
            db_filename: "palisade.db".to_string(),
            max_hierarchy_depth: RoleGraph::DEFAULT_MAX_DEPTH,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_filename)
    }

    pub fn with_data_dir(mut self, path: PathBuf) -> Self {
        self.data_dir = path;
        self
    }

    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn default_data_dir() -> Result<PathBuf, Error> {
    ProjectDirs::from("io", "palisade", "palisade")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            Error::Config(
                "Could not determine platform data directory; \
                 please specify --data-dir or set $HOME"
                    .to_string(),
            )
        })
}
