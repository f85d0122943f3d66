//! Device name resolvers
//!
//! One resolver per device family. Each resolver owns the mapping between
//! the devices it accepts and their CIM instance names. The families must
//! not overlap: the generic extent resolver explicitly refuses every
//! device one of the specific resolvers claims.

use crate::config::ProviderConfig;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, DeviceKind, PartitionTableType, StorageEngine};
use std::sync::Arc;

// =============================================================================
// Class Names
// =============================================================================

pub const CLASS_STORAGE_EXTENT: &str = "LMI_StorageExtent";
pub const CLASS_DISK_PARTITION: &str = "LMI_DiskPartition";
pub const CLASS_GENERIC_DISK_PARTITION: &str = "LMI_GenericDiskPartition";
pub const CLASS_LV_EXTENT: &str = "LMI_LVStorageExtent";
pub const CLASS_VG_POOL: &str = "LMI_VGStoragePool";
pub const CLASS_MD_RAID_EXTENT: &str = "LMI_MDRAIDStorageExtent";

/// Every extent class, most specific first
pub const EXTENT_CLASSES: &[&str] = &[
    CLASS_DISK_PARTITION,
    CLASS_GENERIC_DISK_PARTITION,
    CLASS_LV_EXTENT,
    CLASS_MD_RAID_EXTENT,
    CLASS_STORAGE_EXTENT,
];

// =============================================================================
// System Identity
// =============================================================================

/// Identity of the hosting system, shared by every generated name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub system_name: String,
    pub system_class_name: String,
    pub instance_id_prefix: String,
}

impl SystemIdentity {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            system_name: config.system_name.clone(),
            system_class_name: config.system_class_name.clone(),
            instance_id_prefix: config.instance_id_prefix.clone(),
        }
    }

    /// Name of the hosting computer system
    pub fn system_instance_name(&self) -> InstanceName {
        InstanceName::new(self.system_class_name.clone())
            .with_key("CreationClassName", self.system_class_name.clone())
            .with_key("Name", self.system_name.clone())
    }

    /// Check whether a name designates the hosting computer system
    pub fn is_system(&self, name: &InstanceName) -> bool {
        name.same_instance(&self.system_instance_name())
    }

    /// Build a storage extent name for a device
    pub fn extent_name(&self, class_name: &str, device: &Device) -> InstanceName {
        InstanceName::new(class_name)
            .with_key("CreationClassName", class_name)
            .with_key("DeviceID", device.path.clone())
            .with_key("SystemCreationClassName", self.system_class_name.clone())
            .with_key("SystemName", self.system_name.clone())
    }

    /// Device path of an extent name hosted on this system
    pub fn extent_path<'a>(&self, name: &'a InstanceName) -> Option<&'a str> {
        if name.key_str("SystemName") != Some(self.system_name.as_str())
            || name.key_str("SystemCreationClassName") != Some(self.system_class_name.as_str())
            || !name
                .key_str("CreationClassName")
                .is_some_and(|class| class.eq_ignore_ascii_case(name.class_name()))
        {
            return None;
        }
        name.key_str("DeviceID")
    }

    /// InstanceID with this system's prefix
    pub fn instance_id(&self, parts: &[&str]) -> String {
        let mut id = self.instance_id_prefix.clone();
        for part in parts {
            id.push(':');
            id.push_str(part);
        }
        id
    }
}

// =============================================================================
// Device Families
// =============================================================================

/// Device family a resolver is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    Partition,
    LogicalVolume,
    VolumeGroup,
    MdRaid,
    Extent,
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFamily::Partition => write!(f, "partition"),
            DeviceFamily::LogicalVolume => write!(f, "logical_volume"),
            DeviceFamily::VolumeGroup => write!(f, "volume_group"),
            DeviceFamily::MdRaid => write!(f, "md_raid"),
            DeviceFamily::Extent => write!(f, "extent"),
        }
    }
}

// =============================================================================
// NameResolver Port
// =============================================================================

/// Maps the devices of one family to CIM instance names and back
pub trait NameResolver: Send + Sync {
    /// Family this resolver serves
    fn family(&self) -> DeviceFamily;

    /// CIM classes this resolver produces
    fn class_names(&self) -> &'static [&'static str];

    /// Check whether a name belongs to this resolver
    fn accepts_name(&self, name: &InstanceName) -> bool {
        self.class_names().iter().any(|class| name.is_class(class))
    }

    /// Check whether a device belongs to this resolver
    fn accepts_device(&self, device: &Device) -> bool;

    /// CIM name of an accepted device
    fn name_for_device(&self, device: &Device) -> InstanceName;

    /// Live device a name designates, if any
    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>>;

    /// All live devices this resolver accepts
    fn devices(&self, engine: &dyn StorageEngine) -> Vec<Arc<Device>> {
        engine
            .devices()
            .into_iter()
            .filter(|device| self.accepts_device(device))
            .collect()
    }
}

/// Shared resolver handle
pub type NameResolverRef = Arc<dyn NameResolver>;

/// Resolve an extent name and confirm the device maps back to exactly that name
fn resolve_extent(
    resolver: &dyn NameResolver,
    identity: &SystemIdentity,
    engine: &dyn StorageEngine,
    name: &InstanceName,
) -> Option<Arc<Device>> {
    let path = identity.extent_path(name)?;
    let device = engine.device(path)?;
    if resolver.accepts_device(&device) && resolver.name_for_device(&device).same_instance(name) {
        Some(device)
    } else {
        None
    }
}

// =============================================================================
// Partitions
// =============================================================================

/// Partitions; MS-DOS partitions are `LMI_DiskPartition`, GPT ones `LMI_GenericDiskPartition`
#[derive(Debug, Clone)]
pub struct PartitionResolver {
    identity: SystemIdentity,
}

impl PartitionResolver {
    pub fn new(identity: SystemIdentity) -> Self {
        Self { identity }
    }
}

impl NameResolver for PartitionResolver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Partition
    }

    fn class_names(&self) -> &'static [&'static str] {
        &[CLASS_DISK_PARTITION, CLASS_GENERIC_DISK_PARTITION]
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_partition()
    }

    fn name_for_device(&self, device: &Device) -> InstanceName {
        let class_name = match device.kind {
            DeviceKind::Partition {
                table: PartitionTableType::Gpt,
                ..
            } => CLASS_GENERIC_DISK_PARTITION,
            _ => CLASS_DISK_PARTITION,
        };
        self.identity.extent_name(class_name, device)
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        resolve_extent(self, &self.identity, engine, name)
    }
}

// =============================================================================
// Logical Volumes
// =============================================================================

#[derive(Debug, Clone)]
pub struct LogicalVolumeResolver {
    identity: SystemIdentity,
}

impl LogicalVolumeResolver {
    pub fn new(identity: SystemIdentity) -> Self {
        Self { identity }
    }
}

impl NameResolver for LogicalVolumeResolver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::LogicalVolume
    }

    fn class_names(&self) -> &'static [&'static str] {
        &[CLASS_LV_EXTENT]
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_logical_volume()
    }

    fn name_for_device(&self, device: &Device) -> InstanceName {
        self.identity.extent_name(CLASS_LV_EXTENT, device)
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        resolve_extent(self, &self.identity, engine, name)
    }
}

// =============================================================================
// Volume Groups
// =============================================================================

/// Volume groups are pools, keyed by `InstanceID = <prefix>:VG:<name>`
#[derive(Debug, Clone)]
pub struct VolumeGroupResolver {
    identity: SystemIdentity,
}

impl VolumeGroupResolver {
    pub fn new(identity: SystemIdentity) -> Self {
        Self { identity }
    }

    /// Volume group name encoded in a pool InstanceID
    pub fn vg_name<'a>(&self, instance_id: &'a str) -> Option<&'a str> {
        instance_id
            .strip_prefix(self.identity.instance_id_prefix.as_str())?
            .strip_prefix(":VG:")
            .filter(|name| !name.is_empty())
    }
}

impl NameResolver for VolumeGroupResolver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::VolumeGroup
    }

    fn class_names(&self) -> &'static [&'static str] {
        &[CLASS_VG_POOL]
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_volume_group()
    }

    fn name_for_device(&self, device: &Device) -> InstanceName {
        InstanceName::with_instance_id(CLASS_VG_POOL, self.identity.instance_id(&["VG", device.name.as_str()]))
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        if !self.accepts_name(name) || name.keys.len() != 1 {
            return None;
        }
        let vg_name = self.vg_name(name.instance_id()?)?;
        engine.volume_group(vg_name)
    }
}

// =============================================================================
// MD RAID
// =============================================================================

#[derive(Debug, Clone)]
pub struct MdRaidResolver {
    identity: SystemIdentity,
}

impl MdRaidResolver {
    pub fn new(identity: SystemIdentity) -> Self {
        Self { identity }
    }
}

impl NameResolver for MdRaidResolver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::MdRaid
    }

    fn class_names(&self) -> &'static [&'static str] {
        &[CLASS_MD_RAID_EXTENT]
    }

    fn accepts_device(&self, device: &Device) -> bool {
        device.is_md_raid()
    }

    fn name_for_device(&self, device: &Device) -> InstanceName {
        self.identity.extent_name(CLASS_MD_RAID_EXTENT, device)
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        resolve_extent(self, &self.identity, engine, name)
    }
}

// =============================================================================
// Generic Extents
// =============================================================================

/// Fallback for every block device no specific resolver claims (disks, loop devices, ...)
#[derive(Debug, Clone)]
pub struct ExtentResolver {
    identity: SystemIdentity,
}

impl ExtentResolver {
    pub fn new(identity: SystemIdentity) -> Self {
        Self { identity }
    }
}

impl NameResolver for ExtentResolver {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Extent
    }

    fn class_names(&self) -> &'static [&'static str] {
        &[CLASS_STORAGE_EXTENT]
    }

    fn accepts_device(&self, device: &Device) -> bool {
        !(device.is_volume_group() || device.is_md_raid() || device.is_partition() || device.is_logical_volume())
    }

    fn name_for_device(&self, device: &Device) -> InstanceName {
        self.identity.extent_name(CLASS_STORAGE_EXTENT, device)
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        resolve_extent(self, &self.identity, engine, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PartitionRole;
    use crate::engine::MemoryEngine;

    fn identity() -> SystemIdentity {
        SystemIdentity {
            system_name: "host.example.com".into(),
            system_class_name: "Linux_ComputerSystem".into(),
            instance_id_prefix: "LMI".into(),
        }
    }

    fn partition(path: &str, table: PartitionTableType) -> Device {
        Device::new(
            path,
            path.trim_start_matches("/dev/"),
            DeviceKind::Partition {
                number: 1,
                table,
                role: PartitionRole::Primary,
                start_sector: 2048,
                end_sector: 4095,
            },
            1 << 20,
        )
        .with_parents(["/dev/sda"])
    }

    #[test]
    fn test_partition_class_follows_table() {
        let resolver = PartitionResolver::new(identity());
        let msdos = resolver.name_for_device(&partition("/dev/sda1", PartitionTableType::Msdos));
        assert_eq!(msdos.class_name(), CLASS_DISK_PARTITION);
        let gpt = resolver.name_for_device(&partition("/dev/sda1", PartitionTableType::Gpt));
        assert_eq!(gpt.class_name(), CLASS_GENERIC_DISK_PARTITION);
    }

    #[test]
    fn test_wrong_partition_class_does_not_resolve() {
        let engine = MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30),
            partition("/dev/sda1", PartitionTableType::Gpt),
        ]);
        let resolver = PartitionResolver::new(identity());
        let device = engine.device("/dev/sda1").unwrap();

        let name = resolver.name_for_device(&device);
        assert_eq!(resolver.device_for_name(&engine, &name), Some(device.clone()));

        let forged = identity().extent_name(CLASS_DISK_PARTITION, &device);
        assert!(resolver.device_for_name(&engine, &forged).is_none());
    }

    #[test]
    fn test_class_name_case_is_ignored() {
        let engine = MemoryEngine::from_devices([Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30)]);
        let resolver = ExtentResolver::new(identity());
        let device = engine.device("/dev/sda").unwrap();

        let mut name = resolver.name_for_device(&device);
        name.class_name = CLASS_STORAGE_EXTENT.to_ascii_lowercase();
        assert!(resolver.accepts_name(&name));
        assert_eq!(resolver.device_for_name(&engine, &name), Some(device));
    }

    #[test]
    fn test_foreign_system_does_not_resolve() {
        let engine = MemoryEngine::from_devices([Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30)]);
        let resolver = ExtentResolver::new(identity());
        let device = engine.device("/dev/sda").unwrap();

        let mut other = identity();
        other.system_name = "elsewhere".into();
        let name = other.extent_name(CLASS_STORAGE_EXTENT, &device);
        assert!(resolver.device_for_name(&engine, &name).is_none());
    }

    #[test]
    fn test_generic_extent_rejects_specific_devices() {
        let resolver = ExtentResolver::new(identity());
        assert!(resolver.accepts_device(&Device::new("/dev/sda", "sda", DeviceKind::Disk, 1)));
        assert!(resolver.accepts_device(&Device::new("/dev/loop0", "loop0", DeviceKind::Other, 1)));
        assert!(!resolver.accepts_device(&partition("/dev/sda1", PartitionTableType::Msdos)));
        assert!(!resolver.accepts_device(&Device::new(
            "/dev/vg0",
            "vg0",
            DeviceKind::VolumeGroup { extent_size: 1 },
            1
        )));
        assert!(!resolver.accepts_device(&Device::new(
            "/dev/md0",
            "md0",
            DeviceKind::MdRaid { level: "raid1".into() },
            1
        )));
        assert!(!resolver.accepts_device(&Device::new(
            "/dev/mapper/vg0-lv",
            "lv",
            DeviceKind::LogicalVolume { vg_name: "vg0".into() },
            1
        )));
    }

    #[test]
    fn test_volume_group_instance_id() {
        let engine = MemoryEngine::from_devices([Device::new(
            "/dev/vg0",
            "vg0",
            DeviceKind::VolumeGroup { extent_size: 4 << 20 },
            1 << 30,
        )]);
        let resolver = VolumeGroupResolver::new(identity());
        let vg = engine.device("/dev/vg0").unwrap();
        let name = resolver.name_for_device(&vg);
        assert_eq!(name.instance_id(), Some("LMI:VG:vg0"));
        assert_eq!(resolver.device_for_name(&engine, &name), Some(vg));

        assert_eq!(resolver.vg_name("LMI:VG:"), None);
        assert_eq!(resolver.vg_name("OTHER:VG:vg0"), None);
    }
}
