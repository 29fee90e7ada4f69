//! Engine configuration.
//!
//! Loaded from an optional YAML file; every field has a default so a
//! partial file (or none at all) is valid.
//!
//! ```yaml
//! packs_path: /opt/packs
//! rbac_path: /etc/orchestra/rbac
//! rbac:
//!   enabled: true
//!   permission_isolation: true
//! api:
//!   max_limit: 200
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Access-control settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RbacConfig {
    /// When false every check allows and no RBAC context is stamped
    pub enabled: bool,

    /// Restrict listings and reads to the caller's own executions
    pub permission_isolation: bool,

    /// Role given to users with no assignment
    pub default_role: String,

    /// Service identity that always holds `system_admin`
    pub system_user: String,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            permission_isolation: false,
            default_role: "observer".to_string(),
            system_user: "stanley".to_string(),
        }
    }
}

/// Record store settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Compare-and-swap attempts before a write is reported as failed
    pub max_write_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 10,
        }
    }
}

/// Listing settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Page size when the caller gives no limit
    pub default_limit: usize,

    /// Largest bounded page a caller may ask for
    pub max_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

/// Top-level engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub rbac: RbacConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,

    /// Root of the packs directory
    pub packs_path: PathBuf,

    /// Directory holding `roles/` and `assignments/`
    pub rbac_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rbac: RbacConfig::default(),
            store: StoreConfig::default(),
            api: ApiConfig::default(),
            packs_path: PathBuf::from("packs"),
            rbac_path: None,
        }
    }
}

impl EngineConfig {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the engine misbehave.
    pub fn validate(&self) -> EngineResult<()> {
        if self.store.max_write_attempts == 0 {
            return Err(EngineError::Config(
                "store.max_write_attempts must be at least 1".to_string(),
            ));
        }
        if self.api.default_limit == 0 || self.api.default_limit > self.api.max_limit {
            return Err(EngineError::Config(format!(
                "api.default_limit must be between 1 and api.max_limit ({})",
                self.api.max_limit
            )));
        }
        if self.rbac.default_role.trim().is_empty() {
            return Err(EngineError::Config("rbac.default_role must not be empty".to_string()));
        }
        if self.rbac.system_user.trim().is_empty() {
            return Err(EngineError::Config("rbac.system_user must not be empty".to_string()));
        }
        Ok(())
    }
}
