//! Configuration types and parsing for rekon.yml

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default directory for persisted state (catalog, OLAP file)
pub const DEFAULT_STATE_PATH: &str = ".rekon";

/// Project configuration from rekon.yml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name, also the default instance id
    pub name: String,

    /// OLAP connection
    #[serde(default)]
    pub olap: OlapConfig,

    /// Persist the catalog inside the OLAP store instead of a JSON file
    #[serde(default)]
    pub embed_catalog: bool,

    /// Directory for persisted state, relative to the project root
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Entries migrated concurrently within one dependency level
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Variables available to templates
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

/// Supported OLAP drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OlapDriver {
    #[default]
    DuckDb,
}

impl std::fmt::Display for OlapDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OlapDriver::DuckDb => write!(f, "duckdb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OlapConfig {
    #[serde(default)]
    pub driver: OlapDriver,

    /// Database file path relative to the project root, or `:memory:`
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

impl Default for OlapConfig {
    fn default() -> Self {
        Self {
            driver: OlapDriver::default(),
            dsn: default_dsn(),
        }
    }
}

fn default_state_path() -> String {
    DEFAULT_STATE_PATH.to_string()
}

fn default_threads() -> usize {
    1
}

fn default_dsn() -> String {
    format!("{DEFAULT_STATE_PATH}/olap.duckdb")
}

impl ProjectConfig {
    /// Minimal configuration for a project created programmatically
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            olap: OlapConfig::default(),
            embed_catalog: false,
            state_path: default_state_path(),
            threads: default_threads(),
            vars: BTreeMap::new(),
        }
    }

    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: ProjectConfig =
            serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParseError {
                message: format!("{}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a project directory.
    /// Looks for rekon.yml or rekon.yaml
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        let yml_path = dir.join("rekon.yml");
        let yaml_path = dir.join("rekon.yaml");

        if yml_path.exists() {
            Self::load(&yml_path)
        } else if yaml_path.exists() {
            Self::load(&yaml_path)
        } else {
            Err(CoreError::ConfigNotFound {
                path: yml_path.display().to_string(),
            })
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "Project name cannot be empty".to_string(),
            });
        }
        if self.threads == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "threads must be at least 1".to_string(),
            });
        }
        if self.olap.dsn.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "olap.dsn cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get a variable value by name
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Config vars overlaid with `overrides` (overrides win)
    pub fn merged_vars(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    pub fn is_in_memory(&self) -> bool {
        self.olap.dsn == ":memory:"
    }

    pub fn state_path_absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.state_path)
    }

    /// Absolute OLAP file path, or `None` for an in-memory database
    pub fn olap_path_absolute(&self, root: &Path) -> Option<PathBuf> {
        if self.is_in_memory() {
            None
        } else {
            Some(root.join(&self.olap.dsn))
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
