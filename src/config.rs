//! Host configuration.
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial one still yields a working host.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where data and domain logs live.
    pub storage: StorageConfig,
    /// Operational ceilings.
    pub limits: LimitsConfig,
    /// Host identity and seeding.
    pub host: HostConfig,
}

/// Storage paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of all host state.
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("data"),
        }
    }
}

/// Operational ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Most live sessions at once; further logins are rejected.
    pub max_sessions: usize,
    /// Most live domains at once.
    pub max_domains: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 512,
            max_domains: 1024,
        }
    }
}

/// Host identity and the seeded administrator account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Display name of the host.
    pub name: String,
    /// Id of the administrator account seeded at open.
    pub admin_id: String,
    /// Display name of the seeded administrator.
    pub admin_name: String,
    /// Initial password of the seeded administrator.
    pub admin_password: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "tabularium".to_string(),
            admin_id: "admin".to_string(),
            admin_name: "Administrator".to_string(),
            admin_password: "admin".to_string(),
        }
    }
}

impl Config {
    /// Read a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&text).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject impossible settings.
    pub fn validate(&self) -> Result<()> {
        if self.storage.base_path.as_os_str().is_empty() {
            return Err(CoreError::Config("storage.base_path is empty".to_string()));
        }
        if self.limits.max_sessions == 0 {
            return Err(CoreError::Config("limits.max_sessions is zero".to_string()));
        }
        if self.limits.max_domains == 0 {
            return Err(CoreError::Config("limits.max_domains is zero".to_string()));
        }
        if self.host.admin_id.is_empty() {
            return Err(CoreError::Config("host.admin_id is empty".to_string()));
        }
        Ok(())
    }
}
