//! Operator configuration (`fabricctl.toml`).
//!
//! ```toml
//! [settings]
//! step_timeout_secs = 30
//! verify_after_commit = true
//!
//! [[devices]]
//! name = "leaf1"
//! host = "10.0.0.11"
//! username = "admin"
//! password_env = "LEAF1_PASSWORD"
//! vendor = "netconf"
//! services = ["leaf", "internal_link", "l2_slice", "l3_slice"]
//! command = ["ssh", "-p", "{port}", "{user}@{host}", "-s", "netconf"]
//! ```

use crate::paths;
use anyhow::{Context, Result, bail};
use netconfig::{DeviceProfile, Settings};
use serde::{Deserialize, Serialize};
use statestore::{SqliteStore, StateStore};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
}

impl Config {
    /// Load from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => paths::config_file()?,
        };
        let content =
            fs::read_to_string(&path).with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))?;
        log::debug!("Loaded {} devices from {}", config.devices.len(), path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                bail!("device with host {} has no name", device.host);
            }
            if !seen.insert(device.name.as_str()) {
                bail!("device {} is configured twice", device.name);
            }
            if device.command.is_empty() {
                log::debug!("Device {} has no session command", device.name);
            }
        }
        Ok(())
    }

    /// State database location.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.settings.store_path {
            Some(path) => Ok(paths::expand(path)),
            None => paths::store_file(),
        }
    }

    /// Open the state database.
    pub fn open_store(&self) -> Result<Arc<dyn StateStore>> {
        let path = self.store_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let store = SqliteStore::open(&path).with_context(|| format!("Could not open {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Build the engine context.
    pub fn into_context(self) -> Result<netconfig::Context> {
        let store = self.open_store()?;
        Ok(netconfig::Context::new(self.settings, self.devices, store))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use netconfig::{ServiceType, Vendor};

    const SAMPLE: &str = r#"
[settings]
step_timeout_secs = 10
jobs = 4
verify_after_commit = true

[[devices]]
name = "spine1"
host = "10.0.0.1"
username = "admin"
vendor = "cli"
services = ["spine", "internal_link"]
command = ["ssh", "{user}@{host}"]
prompt = "spine1# "

[[devices]]
name = "leaf1"
host = "10.0.0.11"
username = "admin"
password_env = "LEAF1_PASSWORD"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.settings.step_timeout_secs, 10);
        assert_eq!(config.settings.confirm_timeout_secs, 600);
        assert!(config.settings.verify_after_commit);
        assert_eq!(config.devices.len(), 2);

        let spine = &config.devices[0];
        assert_eq!(spine.vendor, Vendor::Cli);
        assert!(spine.supports(ServiceType::InternalLink));
        assert!(!spine.supports(ServiceType::L2Slice));

        let leaf = &config.devices[1];
        assert_eq!(leaf.port, 830);
        assert_eq!(leaf.vendor, Vendor::Netconf);
        assert!(leaf.supports(ServiceType::L3Slice));
    }

    #[test]
    fn test_empty_config() {
        let config = Config::parse("").unwrap();
        assert!(config.devices.is_empty());
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let text = r#"
[[devices]]
name = "leaf1"
host = "10.0.0.11"
username = "admin"

[[devices]]
name = "leaf1"
host = "10.0.0.12"
username = "admin"
"#;
        let err = Config::parse(text).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_unknown_vendor_rejected() {
        let text = r#"
[[devices]]
name = "leaf1"
host = "10.0.0.11"
username = "admin"
vendor = "telnet"
"#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_store_path_override() {
        let config = Config::parse("[settings]\nstore_path = \"/var/lib/fabricctl/state.db\"\n").unwrap();
        assert_eq!(config.store_path().unwrap(), PathBuf::from("/var/lib/fabricctl/state.db"));
    }

    #[test]
    fn test_open_store_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("state.db");
        let config = Config {
            settings: Settings {
                store_path: Some(db.display().to_string()),
                ..Settings::default()
            },
            devices: Vec::new(),
        };

        let ctx = config.into_context().unwrap();

        assert!(db.exists());
        assert!(ctx.store.devices().unwrap().is_empty());
    }
}
