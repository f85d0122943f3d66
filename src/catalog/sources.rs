//! Setting classes
//!
//! Each setting class declares the properties it understands, validates
//! client supplied values, and synthesizes the CONFIGURATION setting that
//! describes a live device.

use super::setting::{parse_bool, split_instance_id, Setting, SettingType};
use crate::domain::ports::{Device, DeviceKind, StorageEngine};
use crate::error::{Error, Result};
use crate::redundancy::{redundancy_for_device, Redundancy};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CLASS_VG_SETTING: &str = "LMI_VGStorageSetting";
pub const CLASS_LV_SETTING: &str = "LMI_LVStorageSetting";
pub const CLASS_MD_RAID_SETTING: &str = "LMI_MDRAIDStorageSetting";
pub const CLASS_PARTITION_SETTING: &str = "LMI_DiskPartitionConfigurationSetting";

// =============================================================================
// Property Specs
// =============================================================================

/// Value domain of a setting property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    UInt { min: u64, max: u64 },
    Text,
}

/// Declared property of a setting class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
}

impl PropertySpec {
    pub const fn new(name: &'static str, kind: PropertyKind) -> Self {
        Self { name, kind }
    }

    /// Check a single value against this spec
    pub fn validate(&self, value: &str) -> Result<()> {
        match self.kind {
            PropertyKind::Bool => parse_bool(self.name, value).map(|_| ()),
            PropertyKind::UInt { min, max } => {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| Error::invalid(self.name, format!("{:?} is not an unsigned integer", value)))?;
                if parsed < min || parsed > max {
                    return Err(Error::invalid(
                        self.name,
                        format!("{} is outside {}..={}", parsed, min, max),
                    ));
                }
                Ok(())
            }
            PropertyKind::Text => Ok(()),
        }
    }
}

const MAX_REDUNDANCY: u64 = 64;
const MAX_STRIPE: u64 = 256;

/// (min, goal, max) property triples that must stay ordered
const RANGE_TRIPLES: &[(&str, &str, &str)] = &[
    ("DataRedundancyMin", "DataRedundancyGoal", "DataRedundancyMax"),
    ("PackageRedundancyMin", "PackageRedundancyGoal", "PackageRedundancyMax"),
    ("ExtentStripeLengthMin", "ExtentStripeLength", "ExtentStripeLengthMax"),
];

macro_rules! redundancy_specs {
    ($($extra:expr),* $(,)?) => {
        &[
            PropertySpec::new("NoSinglePointOfFailure", PropertyKind::Bool),
            PropertySpec::new("DataRedundancyGoal", PropertyKind::UInt { min: 1, max: MAX_REDUNDANCY }),
            PropertySpec::new("DataRedundancyMin", PropertyKind::UInt { min: 1, max: MAX_REDUNDANCY }),
            PropertySpec::new("DataRedundancyMax", PropertyKind::UInt { min: 1, max: MAX_REDUNDANCY }),
            PropertySpec::new("PackageRedundancyGoal", PropertyKind::UInt { min: 0, max: MAX_REDUNDANCY }),
            PropertySpec::new("PackageRedundancyMin", PropertyKind::UInt { min: 0, max: MAX_REDUNDANCY }),
            PropertySpec::new("PackageRedundancyMax", PropertyKind::UInt { min: 0, max: MAX_REDUNDANCY }),
            PropertySpec::new("ExtentStripeLength", PropertyKind::UInt { min: 1, max: MAX_STRIPE }),
            PropertySpec::new("ExtentStripeLengthMin", PropertyKind::UInt { min: 1, max: MAX_STRIPE }),
            PropertySpec::new("ExtentStripeLengthMax", PropertyKind::UInt { min: 1, max: MAX_STRIPE }),
            PropertySpec::new("ParityLayout", PropertyKind::UInt { min: 1, max: 2 }),
            $($extra,)*
        ]
    };
}

const VG_SPECS: &[PropertySpec] = redundancy_specs![PropertySpec::new(
    "ExtentSize",
    PropertyKind::UInt {
        min: 1024,
        max: 1 << 40
    }
)];

const REDUNDANCY_SPECS: &[PropertySpec] = redundancy_specs![];

const PARTITION_SPECS: &[PropertySpec] = &[
    PropertySpec::new("Bootable", PropertyKind::Bool),
    PropertySpec::new("Hidden", PropertyKind::Bool),
    PropertySpec::new("PartitionType", PropertyKind::UInt { min: 1, max: 3 }),
];

/// Setting properties describing a redundancy record exactly
pub fn redundancy_setting_properties(redundancy: &Redundancy) -> BTreeMap<String, Option<String>> {
    let data = redundancy.data_redundancy.to_string();
    let package = redundancy.package_redundancy.to_string();
    let stripe = redundancy.stripe_length.to_string();

    let mut properties = BTreeMap::new();
    properties.insert(
        "NoSinglePointOfFailure".to_string(),
        Some(redundancy.no_single_point_of_failure.to_string()),
    );
    for (key, value) in [
        ("DataRedundancyGoal", &data),
        ("DataRedundancyMin", &data),
        ("DataRedundancyMax", &data),
        ("PackageRedundancyGoal", &package),
        ("PackageRedundancyMin", &package),
        ("PackageRedundancyMax", &package),
        ("ExtentStripeLength", &stripe),
        ("ExtentStripeLengthMin", &stripe),
        ("ExtentStripeLengthMax", &stripe),
    ] {
        properties.insert(key.to_string(), Some(value.clone()));
    }
    properties.insert(
        "ParityLayout".to_string(),
        redundancy.parity_layout.map(|p| p.cim_value().to_string()),
    );
    properties
}

/// Min <= Goal <= Max for every range present in `properties`
fn check_ranges(properties: &BTreeMap<String, Option<String>>) -> Result<()> {
    let uint = |key: &str| -> Option<u64> { properties.get(key)?.as_deref()?.parse().ok() };
    for (min_key, goal_key, max_key) in RANGE_TRIPLES {
        let (min, goal, max) = (uint(min_key), uint(goal_key), uint(max_key));
        let ordered = |low: Option<u64>, high: Option<u64>| match (low, high) {
            (Some(low), Some(high)) => low <= high,
            _ => true,
        };
        if !ordered(min, goal) || !ordered(goal, max) || !ordered(min, max) {
            return Err(Error::invalid(
                *goal_key,
                format!("{} <= {} <= {} does not hold", min_key, goal_key, max_key),
            ));
        }
    }
    Ok(())
}

// =============================================================================
// SettingSource Port
// =============================================================================

/// One setting class
pub trait SettingSource: Send + Sync {
    fn class_name(&self) -> &'static str;

    /// Properties this class understands
    fn property_specs(&self) -> &'static [PropertySpec];

    /// Check whether a device has a CONFIGURATION setting of this class
    fn accepts_device(&self, device: &Device) -> bool;

    /// Current property values of a live device
    fn current_properties(
        &self,
        engine: &dyn StorageEngine,
        device: &Device,
    ) -> Result<BTreeMap<String, Option<String>>>;

    /// Reject undeclared properties and values outside their domain
    fn validate(&self, properties: &BTreeMap<String, Option<String>>) -> Result<()> {
        let specs = self.property_specs();
        for (key, value) in properties {
            let spec = specs
                .iter()
                .find(|spec| spec.name == key.as_str())
                .ok_or_else(|| Error::invalid(key.as_str(), format!("not a property of {}", self.class_name())))?;
            if let Some(value) = value {
                spec.validate(value)?;
            }
        }
        check_ranges(properties)
    }

    /// Validate changed properties, then the ranges of the setting they produce
    fn validate_change(
        &self,
        current: &BTreeMap<String, Option<String>>,
        changed: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        self.validate(changed)?;
        let mut merged = current.clone();
        merged.extend(changed.iter().map(|(key, value)| (key.clone(), value.clone())));
        check_ranges(&merged)
    }

    /// Reconstructible InstanceID of a device's CONFIGURATION setting
    fn configuration_id(&self, prefix: &str, device: &Device) -> String {
        format!("{}:{}:dev:{}", prefix, self.class_name(), device.path)
    }

    /// Device path encoded in a CONFIGURATION setting ID
    fn configuration_path<'a>(&self, prefix: &str, instance_id: &'a str) -> Option<&'a str> {
        match split_instance_id(prefix, instance_id) {
            Some((class_name, tail)) if class_name == self.class_name() => tail.strip_prefix("dev:"),
            _ => None,
        }
    }

    /// Synthesize the CONFIGURATION setting of a live device
    fn configuration_for(&self, prefix: &str, engine: &dyn StorageEngine, device: &Device) -> Result<Setting> {
        if !self.accepts_device(device) {
            return Err(Error::NotSupported(format!(
                "{} has no {} configuration",
                device.path,
                self.class_name()
            )));
        }
        let mut setting = Setting::new(
            self.class_name(),
            self.configuration_id(prefix, device),
            SettingType::Configuration,
        )
        .with_element_name(device.name.clone());
        setting.properties = self.current_properties(engine, device)?;
        Ok(setting)
    }
}

pub type SettingSourceRef = Arc<dyn SettingSource>;

// =============================================================================
// Storage Settings
// =============================================================================

/// LMI_VGStorageSetting: goals for new volume groups
#[derive(Debug, Default, Clone)]
pub struct VgSettingSource;

impl SettingSource for VgSettingSource {
    fn class_name(&self) -> &'static str {
        CLASS_VG_SETTING
    }

    fn property_specs(&self) -> &'static [PropertySpec] {
        VG_SPECS
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_volume_group()
    }

    fn current_properties(
        &self,
        engine: &dyn StorageEngine,
        device: &Device,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = redundancy_setting_properties(&redundancy_for_device(engine, device)?);
        if let DeviceKind::VolumeGroup { extent_size } = device.kind {
            properties.insert("ExtentSize".to_string(), Some(extent_size.to_string()));
        }
        Ok(properties)
    }
}

/// LMI_LVStorageSetting: goals for new logical volumes
#[derive(Debug, Default, Clone)]
pub struct LvSettingSource;

impl SettingSource for LvSettingSource {
    fn class_name(&self) -> &'static str {
        CLASS_LV_SETTING
    }

    fn property_specs(&self) -> &'static [PropertySpec] {
        REDUNDANCY_SPECS
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_logical_volume()
    }

    fn current_properties(
        &self,
        engine: &dyn StorageEngine,
        device: &Device,
    ) -> Result<BTreeMap<String, Option<String>>> {
        Ok(redundancy_setting_properties(&redundancy_for_device(engine, device)?))
    }
}

/// LMI_MDRAIDStorageSetting: goals for new MD RAID arrays
#[derive(Debug, Default, Clone)]
pub struct MdRaidSettingSource;

impl SettingSource for MdRaidSettingSource {
    fn class_name(&self) -> &'static str {
        CLASS_MD_RAID_SETTING
    }

    fn property_specs(&self) -> &'static [PropertySpec] {
        REDUNDANCY_SPECS
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_md_raid()
    }

    fn current_properties(
        &self,
        engine: &dyn StorageEngine,
        device: &Device,
    ) -> Result<BTreeMap<String, Option<String>>> {
        Ok(redundancy_setting_properties(&redundancy_for_device(engine, device)?))
    }
}

// =============================================================================
// Partition Settings
// =============================================================================

/// LMI_DiskPartitionConfigurationSetting: partition type and flags
#[derive(Debug, Default, Clone)]
pub struct PartitionSettingSource;

impl SettingSource for PartitionSettingSource {
    fn class_name(&self) -> &'static str {
        CLASS_PARTITION_SETTING
    }

    fn property_specs(&self) -> &'static [PropertySpec] {
        PARTITION_SPECS
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_partition()
    }

    fn current_properties(
        &self,
        _engine: &dyn StorageEngine,
        device: &Device,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = BTreeMap::new();
        if let DeviceKind::Partition { role, .. } = device.kind {
            properties.insert("PartitionType".to_string(), Some(role.cim_value().to_string()));
        }
        properties.insert("Bootable".to_string(), Some("false".to_string()));
        properties.insert("Hidden".to_string(), Some("false".to_string()));
        Ok(properties)
    }
}

/// Every built-in setting class
pub fn default_setting_sources() -> Vec<SettingSourceRef> {
    vec![
        Arc::new(VgSettingSource),
        Arc::new(LvSettingSource),
        Arc::new(MdRaidSettingSource),
        Arc::new(PartitionSettingSource),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{PartitionRole, PartitionTableType};
    use crate::engine::MemoryEngine;
    use assert_matches::assert_matches;

    fn props(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_validate_accepts_declared_values() {
        let source = VgSettingSource;
        source
            .validate(&props(&[
                ("ExtentSize", Some("4194304")),
                ("NoSinglePointOfFailure", Some("true")),
                ("DataRedundancyGoal", None),
            ]))
            .unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let source = VgSettingSource;
        assert_matches!(
            source.validate(&props(&[("Colour", Some("blue"))])),
            Err(Error::InvalidParameter { parameter, .. }) if parameter == "Colour"
        );
        assert_matches!(
            source.validate(&props(&[("ExtentSize", Some("12"))])),
            Err(Error::InvalidParameter { .. })
        );
        assert_matches!(
            source.validate(&props(&[("NoSinglePointOfFailure", Some("maybe"))])),
            Err(Error::InvalidParameter { .. })
        );
        assert_matches!(
            source.validate(&props(&[("DataRedundancyMin", Some("3")), ("DataRedundancyGoal", Some("2"))])),
            Err(Error::InvalidParameter { .. })
        );
    }

    #[test]
    fn test_validate_change_checks_merged_ranges() {
        let source = LvSettingSource;
        let stored = props(&[
            ("DataRedundancyMin", Some("2")),
            ("DataRedundancyGoal", Some("2")),
            ("DataRedundancyMax", Some("2")),
        ]);
        assert_matches!(
            source.validate_change(&stored, &props(&[("DataRedundancyGoal", Some("1"))])),
            Err(Error::InvalidParameter { parameter, .. }) if parameter == "DataRedundancyGoal"
        );
        // Moving the whole range at once is fine, as is clearing one end
        source
            .validate_change(
                &stored,
                &props(&[("DataRedundancyMin", Some("1")), ("DataRedundancyGoal", Some("1"))]),
            )
            .unwrap();
        source
            .validate_change(&stored, &props(&[("DataRedundancyMin", None), ("DataRedundancyGoal", Some("1"))]))
            .unwrap();
        // Stray stored keys do not block a change
        let mut stray = stored.clone();
        stray.insert("Legacy".to_string(), Some("x".to_string()));
        source
            .validate_change(&stray, &props(&[("DataRedundancyMax", Some("3"))]))
            .unwrap();
    }

    #[test]
    fn test_configuration_id_round_trip() {
        let source = MdRaidSettingSource;
        let md = Device::new("/dev/md/data", "data", DeviceKind::MdRaid { level: "raid1".into() }, 1);
        let id = source.configuration_id("LMI", &md);
        assert_eq!(id, "LMI:LMI_MDRAIDStorageSetting:dev:/dev/md/data");
        assert_eq!(source.configuration_path("LMI", &id), Some("/dev/md/data"));
        assert_eq!(source.configuration_path("LMI", "LMI:LMI_MDRAIDStorageSetting:4"), None);
        assert_eq!(LvSettingSource.configuration_path("LMI", &id), None);
    }

    #[test]
    fn test_md_configuration_reports_redundancy() {
        let engine = MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30),
            Device::new("/dev/sdb", "sdb", DeviceKind::Disk, 1 << 30),
            Device::new("/dev/md0", "md0", DeviceKind::MdRaid { level: "raid1".into() }, 1 << 30)
                .with_parents(["/dev/sda", "/dev/sdb"]),
        ]);
        let md = engine.device("/dev/md0").unwrap();
        let setting = MdRaidSettingSource.configuration_for("LMI", &engine, &md).unwrap();

        assert_eq!(setting.setting_type, SettingType::Configuration);
        assert_eq!(setting.property("DataRedundancyGoal"), Some("2"));
        assert_eq!(setting.property("PackageRedundancyGoal"), Some("1"));
        assert_eq!(setting.property("NoSinglePointOfFailure"), Some("true"));
        assert_eq!(setting.properties.get("ParityLayout"), Some(&None));
        MdRaidSettingSource.validate(&setting.properties).unwrap();
    }

    #[test]
    fn test_partition_configuration() {
        let engine = MemoryEngine::new();
        let partition = Device::new(
            "/dev/sda5",
            "sda5",
            DeviceKind::Partition {
                number: 5,
                table: PartitionTableType::Msdos,
                role: PartitionRole::Logical,
                start_sector: 4096,
                end_sector: 8191,
            },
            2 << 20,
        );
        let setting = PartitionSettingSource
            .configuration_for("LMI", &engine, &partition)
            .unwrap();
        assert_eq!(setting.property("PartitionType"), Some("3"));

        let disk = Device::new("/dev/sda", "sda", DeviceKind::Disk, 1);
        assert_matches!(
            PartitionSettingSource.configuration_for("LMI", &engine, &disk),
            Err(Error::NotSupported(_))
        );
    }
}
