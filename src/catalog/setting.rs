//! Settings and their persistence tiers

use crate::domain::name::InstanceName;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Setting Type
// =============================================================================

/// Persistence tier of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    /// Lives in memory only
    Transient,
    /// Stored in the persistent directory, rewritten on every change
    Persistent,
    /// Supplied by the administrator, read-only
    Preconfigured,
    /// Describes the current configuration of a live device, never stored
    Configuration,
}

impl SettingType {
    /// CIM `ChangeableType` value
    pub fn changeable_type(&self) -> u16 {
        match self {
            SettingType::Preconfigured => 0,
            SettingType::Transient => 1,
            SettingType::Persistent => 2,
            SettingType::Configuration => 3,
        }
    }

    pub fn from_changeable_type(value: u16) -> Option<Self> {
        match value {
            0 => Some(SettingType::Preconfigured),
            1 => Some(SettingType::Transient),
            2 => Some(SettingType::Persistent),
            3 => Some(SettingType::Configuration),
            _ => None,
        }
    }

    /// Check whether settings of this type can be modified or deleted
    pub fn is_mutable(&self) -> bool {
        matches!(self, SettingType::Transient | SettingType::Persistent)
    }

    /// Allowed type transitions: TRANSIENT and PERSISTENT convert into each other
    pub fn can_become(&self, target: SettingType) -> bool {
        *self == target || (self.is_mutable() && target.is_mutable())
    }
}

impl std::fmt::Display for SettingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingType::Transient => write!(f, "transient"),
            SettingType::Persistent => write!(f, "persistent"),
            SettingType::Preconfigured => write!(f, "preconfigured"),
            SettingType::Configuration => write!(f, "configuration"),
        }
    }
}

// =============================================================================
// Setting
// =============================================================================

/// A named bag of configuration properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub class_name: String,
    pub instance_id: String,
    pub setting_type: SettingType,
    pub element_name: Option<String>,
    /// Property values; `None` is an explicitly absent value
    pub properties: BTreeMap<String, Option<String>>,
}

impl Setting {
    pub fn new(class_name: impl Into<String>, instance_id: impl Into<String>, setting_type: SettingType) -> Self {
        Self {
            class_name: class_name.into(),
            instance_id: instance_id.into(),
            setting_type,
            element_name: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_element_name(mut self, element_name: impl Into<String>) -> Self {
        self.element_name = Some(element_name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_deref())
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Option<String>) {
        self.properties.insert(key.into(), value);
    }

    pub fn uint_property(&self, key: &str) -> Result<Option<u64>> {
        self.property(key)
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|_| Error::invalid(key, format!("{:?} is not an unsigned integer", raw)))
            })
            .transpose()
    }

    pub fn bool_property(&self, key: &str) -> Result<Option<bool>> {
        self.property(key).map(|raw| parse_bool(key, raw)).transpose()
    }

    /// Name of this setting instance
    pub fn instance_name(&self) -> InstanceName {
        InstanceName::with_instance_id(self.class_name.clone(), self.instance_id.clone())
    }
}

/// Parse a boolean property value the way CIM text values are written
pub fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::invalid(key, format!("{:?} is not a boolean", raw))),
    }
}

// =============================================================================
// Instance IDs
// =============================================================================

/// Split `<prefix>:<class>:<rest>` into class and rest
pub fn split_instance_id<'a>(prefix: &str, instance_id: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = instance_id.strip_prefix(prefix)?.strip_prefix(':')?;
    let (class_name, tail) = rest.split_once(':')?;
    if class_name.is_empty() || tail.is_empty() {
        return None;
    }
    Some((class_name, tail))
}

/// Counter of an allocated `<prefix>:<class>:<n>` ID
pub fn instance_counter(prefix: &str, class_name: &str, instance_id: &str) -> Option<u64> {
    match split_instance_id(prefix, instance_id) {
        Some((class, tail)) if class == class_name => tail.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_changeable_type_values() {
        assert_eq!(SettingType::Transient.changeable_type(), 1);
        assert_eq!(SettingType::Persistent.changeable_type(), 2);
        assert_eq!(SettingType::Preconfigured.changeable_type(), 0);
        assert_eq!(SettingType::Configuration.changeable_type(), 3);
        assert_eq!(SettingType::from_changeable_type(2), Some(SettingType::Persistent));
        assert_eq!(SettingType::from_changeable_type(4), None);
    }

    #[test]
    fn test_type_transitions() {
        assert!(SettingType::Transient.can_become(SettingType::Persistent));
        assert!(SettingType::Persistent.can_become(SettingType::Transient));
        assert!(!SettingType::Preconfigured.can_become(SettingType::Persistent));
        assert!(!SettingType::Transient.can_become(SettingType::Configuration));
        assert!(SettingType::Configuration.can_become(SettingType::Configuration));
    }

    #[test]
    fn test_instance_id_parsing() {
        assert_eq!(
            split_instance_id("LMI", "LMI:LMI_VGStorageSetting:12"),
            Some(("LMI_VGStorageSetting", "12"))
        );
        assert_eq!(instance_counter("LMI", "LMI_VGStorageSetting", "LMI:LMI_VGStorageSetting:12"), Some(12));
        assert_eq!(instance_counter("LMI", "LMI_LVStorageSetting", "LMI:LMI_VGStorageSetting:12"), None);
        assert_eq!(
            instance_counter("LMI", "LMI_VGStorageSetting", "LMI:LMI_VGStorageSetting:dev:/dev/vg0"),
            None
        );
        assert_eq!(split_instance_id("LMI", "OTHER:LMI_VGStorageSetting:1"), None);
        assert_eq!(split_instance_id("LMI", "LMI:LMI_VGStorageSetting:"), None);
    }

    #[test]
    fn test_typed_properties() {
        let setting = Setting::new("LMI_VGStorageSetting", "LMI:LMI_VGStorageSetting:1", SettingType::Transient)
            .with_property("ExtentSize", Some("4194304".into()))
            .with_property("NoSinglePointOfFailure", Some("True".into()))
            .with_property("DataRedundancyGoal", None);

        assert_eq!(setting.uint_property("ExtentSize").unwrap(), Some(4194304));
        assert_eq!(setting.bool_property("NoSinglePointOfFailure").unwrap(), Some(true));
        assert_eq!(setting.uint_property("DataRedundancyGoal").unwrap(), None);
        assert_matches!(
            setting.bool_property("ExtentSize"),
            Err(Error::InvalidParameter { .. })
        );
    }
}
