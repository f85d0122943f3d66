//! Provider configuration
//!
//! Loaded once at startup from an optional YAML file; every field has a
//! default so an empty file (or no file) yields a working configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default prefix of every generated InstanceID
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "LMI";

/// Default CIM namespace
pub const DEFAULT_NAMESPACE: &str = "root/cimv2";

/// Default creation class of the hosting computer system
pub const DEFAULT_SYSTEM_CLASS_NAME: &str = "Linux_ComputerSystem";

/// Configuration of the provider core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// CIM namespace the providers are registered in
    pub namespace: String,
    /// Prefix of generated InstanceIDs (`<prefix>:<class>:<n>`)
    pub instance_id_prefix: String,
    /// Name of the hosting computer system
    pub system_name: String,
    /// Creation class of the hosting computer system
    pub system_class_name: String,
    /// Directory with admin supplied, read-only settings
    pub preconfigured_dir: PathBuf,
    /// Directory where persistent settings are stored
    pub persistent_dir: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            instance_id_prefix: DEFAULT_INSTANCE_ID_PREFIX.to_string(),
            system_name: default_system_name(),
            system_class_name: DEFAULT_SYSTEM_CLASS_NAME.to_string(),
            preconfigured_dir: PathBuf::from("/etc/cim-storage/setting"),
            persistent_dir: PathBuf::from("/var/lib/cim-storage/setting"),
        }
    }
}

fn default_system_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

impl ProviderConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading provider configuration from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ProviderConfig = if content.trim().is_empty() {
            ProviderConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the core cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.instance_id_prefix.is_empty() || self.instance_id_prefix.contains(':') {
            return Err(Error::Configuration(format!(
                "instance_id_prefix must be non-empty and must not contain ':' (got {:?})",
                self.instance_id_prefix
            )));
        }
        if self.system_name.is_empty() {
            return Err(Error::Configuration("system_name must not be empty".into()));
        }
        if self.system_class_name.is_empty() {
            return Err(Error::Configuration("system_class_name must not be empty".into()));
        }
        if self.preconfigured_dir == self.persistent_dir {
            return Err(Error::Configuration(
                "preconfigured_dir and persistent_dir must differ".into(),
            ));
        }
        Ok(())
    }

    /// Configuration rooted in a scratch directory, for tests and demos
    pub fn with_state_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            preconfigured_dir: root.join("preconfigured"),
            persistent_dir: root.join("persistent"),
            system_name: "host.example.com".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.instance_id_prefix, "LMI");
        assert_eq!(config.namespace, "root/cimv2");
        assert!(!config.system_name.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = ProviderConfig::from_yaml("system_name: storage01\ninstance_id_prefix: ACME\n").unwrap();
        assert_eq!(config.system_name, "storage01");
        assert_eq!(config.instance_id_prefix, "ACME");
        assert_eq!(config.system_class_name, DEFAULT_SYSTEM_CLASS_NAME);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = ProviderConfig::from_yaml("   \n").unwrap();
        assert_eq!(config.instance_id_prefix, DEFAULT_INSTANCE_ID_PREFIX);
    }

    #[test]
    fn test_invalid_prefix() {
        let result = ProviderConfig::from_yaml("instance_id_prefix: \"A:B\"\n");
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_same_dirs_rejected() {
        let mut config = ProviderConfig::default();
        config.persistent_dir = config.preconfigured_dir.clone();
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }
}
