//! Capabilities
//!
//! A capability describes what can be configured; a setting derived from it
//! is one concrete choice. Partition table and volume group capabilities are
//! static, logical volume capabilities exist once per volume group.

use super::manager::SettingManager;
use super::setting::{Setting, SettingType};
use super::sources::{
    redundancy_setting_properties, CLASS_LV_SETTING, CLASS_PARTITION_SETTING, CLASS_VG_SETTING,
};
use crate::domain::ports::{Device, DeviceKind, PartitionRole, PartitionTableType, StorageEngine};
use crate::error::{Error, Result};
use crate::redundancy::{redundancy_for_device, Redundancy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const CLASS_PARTITION_CAPABILITIES: &str = "LMI_DiskPartitionConfigurationCapabilities";
pub const CLASS_VG_CAPABILITIES: &str = "LMI_VGStorageCapabilities";
pub const CLASS_LV_CAPABILITIES: &str = "LMI_LVStorageCapabilities";

/// Default extent size of new volume groups
pub const DEFAULT_EXTENT_SIZE: u64 = 4 << 20;

/// An immutable capability instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub class_name: String,
    pub instance_id: String,
    pub element_name: String,
    pub properties: BTreeMap<String, Option<String>>,
    /// Device the capability was derived from, for per-device capabilities
    pub element: Option<String>,
}

impl Capability {
    pub fn new(class_name: &str, instance_id: String, element_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.to_string(),
            instance_id,
            element_name: element_name.into(),
            properties: BTreeMap::new(),
            element: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl ToString) -> Self {
        self.properties.insert(key.to_string(), Some(value.to_string()));
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_deref())
    }
}

/// Which setting to derive from a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingGoal {
    /// Default values
    Default,
    /// Widest acceptable ranges
    Goal,
}

// =============================================================================
// CapabilitiesProvider Port
// =============================================================================

/// One capabilities class
pub trait CapabilitiesProvider: Send + Sync {
    fn class_name(&self) -> &'static str;

    /// Class of the settings derived from these capabilities
    fn setting_class(&self) -> &'static str;

    fn enumerate(&self, engine: &dyn StorageEngine) -> Result<Vec<Capability>>;

    /// Capability by InstanceID
    fn get(&self, engine: &dyn StorageEngine, instance_id: &str) -> Result<Capability> {
        self.enumerate(engine)?
            .into_iter()
            .find(|c| c.instance_id == instance_id)
            .ok_or_else(|| Error::NotFound(format!("{} {}", self.class_name(), instance_id)))
    }

    /// Capability describing a device, if this class has one for it
    fn capability_for_device(&self, engine: &dyn StorageEngine, device: &Device) -> Result<Option<Capability>>;

    /// Properties of the setting derived for a goal
    fn setting_properties(
        &self,
        engine: &dyn StorageEngine,
        capability: &Capability,
        goal: SettingGoal,
    ) -> Result<BTreeMap<String, Option<String>>>;

    /// Create a TRANSIENT setting from a capability
    fn create_setting(
        &self,
        engine: &dyn StorageEngine,
        manager: &SettingManager,
        capability: &Capability,
        goal: SettingGoal,
    ) -> Result<Setting> {
        let properties = self.setting_properties(engine, capability, goal)?;
        debug!("Creating {:?} setting from {}", goal, capability.instance_id);
        manager.create_setting(
            self.setting_class(),
            SettingType::Transient,
            Some(capability.element_name.clone()),
            properties,
        )
    }
}

pub type CapabilitiesProviderRef = Arc<dyn CapabilitiesProvider>;

fn goal_ranges(redundancy: &Redundancy, min: &Redundancy, max: &Redundancy) -> BTreeMap<String, Option<String>> {
    let mut properties = redundancy_setting_properties(redundancy);
    for (key, value) in [
        ("DataRedundancyMin", min.data_redundancy),
        ("DataRedundancyMax", max.data_redundancy),
        ("PackageRedundancyMin", min.package_redundancy),
        ("PackageRedundancyMax", max.package_redundancy),
        ("ExtentStripeLengthMin", min.stripe_length),
        ("ExtentStripeLengthMax", max.stripe_length),
    ] {
        properties.insert(key.to_string(), Some(value.to_string()));
    }
    properties
}

// =============================================================================
// Partition Table Capabilities
// =============================================================================

/// Partition table style advertised by a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStyle {
    Mbr,
    Gpt,
    /// Logical partitions inside an extended partition
    Embr,
}

impl PartitionStyle {
    pub const ALL: [PartitionStyle; 3] = [PartitionStyle::Mbr, PartitionStyle::Gpt, PartitionStyle::Embr];

    /// CIM `PartitionStyle` value
    pub fn cim_value(&self) -> u16 {
        match self {
            PartitionStyle::Mbr => 2,
            PartitionStyle::Gpt => 3,
            PartitionStyle::Embr => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStyle::Mbr => "MBR",
            PartitionStyle::Gpt => "GPT",
            PartitionStyle::Embr => "EMBR",
        }
    }

    pub fn max_partitions(&self) -> u32 {
        match self {
            PartitionStyle::Mbr => 4,
            PartitionStyle::Gpt => 128,
            PartitionStyle::Embr => 60,
        }
    }

    /// Sectors taken by the table itself
    pub fn table_size(&self) -> u64 {
        match self {
            PartitionStyle::Mbr | PartitionStyle::Embr => 1,
            PartitionStyle::Gpt => 68,
        }
    }

    /// Table type written when a disk gets this style
    pub fn table_type(&self) -> Option<PartitionTableType> {
        match self {
            PartitionStyle::Mbr => Some(PartitionTableType::Msdos),
            PartitionStyle::Gpt => Some(PartitionTableType::Gpt),
            PartitionStyle::Embr => None,
        }
    }

    fn default_role(&self) -> PartitionRole {
        match self {
            PartitionStyle::Embr => PartitionRole::Logical,
            _ => PartitionRole::Primary,
        }
    }
}

/// Static MBR, GPT and EMBR capabilities
#[derive(Debug, Clone)]
pub struct PartitionCapabilitiesProvider {
    prefix: String,
}

impl PartitionCapabilitiesProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn instance_id(&self, style: PartitionStyle) -> String {
        format!("{}:{}:{}", self.prefix, CLASS_PARTITION_CAPABILITIES, style.as_str())
    }

    pub fn capability(&self, style: PartitionStyle) -> Capability {
        Capability::new(
            CLASS_PARTITION_CAPABILITIES,
            self.instance_id(style),
            format!("{} partition table", style.as_str()),
        )
        .with_property("PartitionStyle", style.cim_value())
        .with_property("MaxNumberOfPartitions", style.max_partitions())
        .with_property("PartitionTableSize", style.table_size())
        .with_property("OverlapAllowed", false)
    }

    /// Style named by a capability InstanceID
    pub fn style_for_id(&self, instance_id: &str) -> Option<PartitionStyle> {
        PartitionStyle::ALL
            .into_iter()
            .find(|style| self.instance_id(*style) == instance_id)
    }
}

impl CapabilitiesProvider for PartitionCapabilitiesProvider {
    fn class_name(&self) -> &'static str {
        CLASS_PARTITION_CAPABILITIES
    }

    fn setting_class(&self) -> &'static str {
        CLASS_PARTITION_SETTING
    }

    fn enumerate(&self, _engine: &dyn StorageEngine) -> Result<Vec<Capability>> {
        Ok(PartitionStyle::ALL.iter().map(|style| self.capability(*style)).collect())
    }

    fn capability_for_device(&self, _engine: &dyn StorageEngine, device: &Device) -> Result<Option<Capability>> {
        let style = match (&device.kind, device.partition_table) {
            (_, Some(PartitionTableType::Msdos)) => Some(PartitionStyle::Mbr),
            (_, Some(PartitionTableType::Gpt)) => Some(PartitionStyle::Gpt),
            (
                DeviceKind::Partition {
                    role: PartitionRole::Extended,
                    ..
                },
                None,
            ) => Some(PartitionStyle::Embr),
            _ => None,
        };
        Ok(style.map(|style| self.capability(style)))
    }

    fn setting_properties(
        &self,
        _engine: &dyn StorageEngine,
        capability: &Capability,
        goal: SettingGoal,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let style = self
            .style_for_id(&capability.instance_id)
            .ok_or_else(|| Error::invalid("Capabilities", format!("unknown capability {}", capability.instance_id)))?;

        let mut properties = BTreeMap::new();
        properties.insert("Bootable".to_string(), Some("false".to_string()));
        properties.insert("Hidden".to_string(), Some("false".to_string()));
        let partition_type = match goal {
            SettingGoal::Default => Some(style.default_role().cim_value().to_string()),
            SettingGoal::Goal => None,
        };
        properties.insert("PartitionType".to_string(), partition_type);
        Ok(properties)
    }
}

// =============================================================================
// Volume Group Capabilities
// =============================================================================

/// Static capabilities of volume group creation
#[derive(Debug, Clone)]
pub struct VgCapabilitiesProvider {
    prefix: String,
}

impl VgCapabilitiesProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn capability(&self) -> Capability {
        Capability::new(
            CLASS_VG_CAPABILITIES,
            format!("{}:{}:default", self.prefix, CLASS_VG_CAPABILITIES),
            "Volume group creation",
        )
        .with_property("ExtentSizeDefault", DEFAULT_EXTENT_SIZE)
        .with_property("ElementType", 6)
    }
}

impl CapabilitiesProvider for VgCapabilitiesProvider {
    fn class_name(&self) -> &'static str {
        CLASS_VG_CAPABILITIES
    }

    fn setting_class(&self) -> &'static str {
        CLASS_VG_SETTING
    }

    fn enumerate(&self, _engine: &dyn StorageEngine) -> Result<Vec<Capability>> {
        Ok(vec![self.capability()])
    }

    fn capability_for_device(&self, _engine: &dyn StorageEngine, _device: &Device) -> Result<Option<Capability>> {
        Ok(None)
    }

    fn setting_properties(
        &self,
        _engine: &dyn StorageEngine,
        _capability: &Capability,
        goal: SettingGoal,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let base = Redundancy::BASE;
        let mut properties = match goal {
            SettingGoal::Default => redundancy_setting_properties(&base),
            SettingGoal::Goal => {
                let max = Redundancy {
                    no_single_point_of_failure: true,
                    data_redundancy: 64,
                    package_redundancy: 64,
                    stripe_length: 256,
                    parity_layout: None,
                };
                goal_ranges(&base, &base, &max)
            }
        };
        properties.insert("ExtentSize".to_string(), Some(DEFAULT_EXTENT_SIZE.to_string()));
        Ok(properties)
    }
}

// =============================================================================
// Logical Volume Capabilities
// =============================================================================

/// Per volume group capabilities of logical volume creation
#[derive(Debug, Clone)]
pub struct LvCapabilitiesProvider {
    prefix: String,
}

impl LvCapabilitiesProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn instance_id(&self, vg: &Device) -> String {
        format!("{}:{}:{}", self.prefix, CLASS_LV_CAPABILITIES, vg.name)
    }

    fn capability(&self, engine: &dyn StorageEngine, vg: &Device) -> Result<Capability> {
        let redundancy = redundancy_for_device(engine, vg)?;
        let mut capability = Capability::new(CLASS_LV_CAPABILITIES, self.instance_id(vg), vg.name.clone());
        capability.properties = redundancy.to_properties();
        capability.element = Some(vg.path.clone());
        Ok(capability)
    }
}

impl CapabilitiesProvider for LvCapabilitiesProvider {
    fn class_name(&self) -> &'static str {
        CLASS_LV_CAPABILITIES
    }

    fn setting_class(&self) -> &'static str {
        CLASS_LV_SETTING
    }

    fn enumerate(&self, engine: &dyn StorageEngine) -> Result<Vec<Capability>> {
        engine
            .devices()
            .iter()
            .filter(|d| d.is_volume_group())
            .map(|vg| self.capability(engine, vg))
            .collect()
    }

    fn capability_for_device(&self, engine: &dyn StorageEngine, device: &Device) -> Result<Option<Capability>> {
        if !device.is_volume_group() {
            return Ok(None);
        }
        self.capability(engine, device).map(Some)
    }

    fn setting_properties(
        &self,
        engine: &dyn StorageEngine,
        capability: &Capability,
        _goal: SettingGoal,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let vg = capability
            .element
            .as_deref()
            .and_then(|path| engine.device(path))
            .ok_or_else(|| Error::NotFound(format!("volume group of {}", capability.instance_id)))?;
        // A logical volume inherits its pool's redundancy, so default and goal coincide
        let redundancy = redundancy_for_device(engine, &vg)?;
        Ok(goal_ranges(&redundancy, &redundancy, &redundancy))
    }
}

/// Every built-in capabilities class
pub fn default_capabilities_providers(prefix: &str) -> Vec<CapabilitiesProviderRef> {
    vec![
        Arc::new(PartitionCapabilitiesProvider::new(prefix)),
        Arc::new(VgCapabilitiesProvider::new(prefix)),
        Arc::new(LvCapabilitiesProvider::new(prefix)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sources::{LvSettingSource, PartitionSettingSource, SettingSource, VgSettingSource};
    use crate::engine::MemoryEngine;
    use tempfile::TempDir;

    fn engine() -> MemoryEngine {
        MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30).with_partition_table(PartitionTableType::Gpt),
            Device::new("/dev/sdb", "sdb", DeviceKind::Disk, 1 << 30),
            Device::new("/dev/sdc", "sdc", DeviceKind::Disk, 1 << 30),
            Device::new("/dev/md0", "md0", DeviceKind::MdRaid { level: "raid1".into() }, 1 << 30)
                .with_parents(["/dev/sdb", "/dev/sdc"]),
            Device::new("/dev/vg0", "vg0", DeviceKind::VolumeGroup { extent_size: 4 << 20 }, 1 << 30)
                .with_parents(["/dev/md0"]),
        ])
    }

    #[test]
    fn test_partition_capabilities_are_static() {
        let engine = engine();
        let provider = PartitionCapabilitiesProvider::new("LMI");
        let all = provider.enumerate(&engine).unwrap();
        assert_eq!(all.len(), 3);

        let gpt = provider.get(&engine, "LMI:LMI_DiskPartitionConfigurationCapabilities:GPT").unwrap();
        assert_eq!(gpt.property("PartitionStyle"), Some("3"));
        assert_eq!(gpt.property("MaxNumberOfPartitions"), Some("128"));

        let disk = engine.device("/dev/sda").unwrap();
        assert_eq!(provider.capability_for_device(&engine, &disk).unwrap(), Some(gpt));
        let bare = engine.device("/dev/sdb").unwrap();
        assert_eq!(provider.capability_for_device(&engine, &bare).unwrap(), None);
    }

    #[test]
    fn test_lv_capabilities_follow_vg_redundancy() {
        let engine = engine();
        let provider = LvCapabilitiesProvider::new("LMI");
        let caps = provider.enumerate(&engine).unwrap();
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].instance_id, "LMI:LMI_LVStorageCapabilities:vg0");
        assert_eq!(caps[0].property("DataRedundancy"), Some("2"));
        assert_eq!(caps[0].property("NoSinglePointOfFailure"), Some("true"));
    }

    #[test]
    fn test_create_settings_from_capabilities() {
        let engine = engine();
        let dir = TempDir::new().unwrap();
        let manager = SettingManager::new("LMI", dir.path().join("pre"), dir.path().join("persist"));

        let lv = LvCapabilitiesProvider::new("LMI");
        let cap = lv.get(&engine, "LMI:LMI_LVStorageCapabilities:vg0").unwrap();
        let setting = lv.create_setting(&engine, &manager, &cap, SettingGoal::Goal).unwrap();
        assert_eq!(setting.setting_type, SettingType::Transient);
        assert_eq!(setting.class_name, CLASS_LV_SETTING);
        assert_eq!(setting.property("PackageRedundancyMax"), Some("1"));
        LvSettingSource.validate(&setting.properties).unwrap();

        let vg = VgCapabilitiesProvider::new("LMI");
        let cap = vg.enumerate(&engine).unwrap().remove(0);
        for goal in [SettingGoal::Default, SettingGoal::Goal] {
            let setting = vg.create_setting(&engine, &manager, &cap, goal).unwrap();
            assert_eq!(setting.property("ExtentSize"), Some("4194304"));
            VgSettingSource.validate(&setting.properties).unwrap();
        }

        let parts = PartitionCapabilitiesProvider::new("LMI");
        let embr = parts.capability(PartitionStyle::Embr);
        let setting = parts
            .create_setting(&engine, &manager, &embr, SettingGoal::Default)
            .unwrap();
        assert_eq!(setting.property("PartitionType"), Some("3"));
        PartitionSettingSource.validate(&setting.properties).unwrap();
    }

    #[test]
    fn test_unknown_capability() {
        let engine = engine();
        let provider = VgCapabilitiesProvider::new("LMI");
        assert_eq!(
            provider.get(&engine, "LMI:LMI_VGStorageCapabilities:nope").unwrap_err().category(),
            crate::error::FaultCategory::NotFound
        );
    }
}
