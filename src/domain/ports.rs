//! Domain Ports - Device model and the storage engine port
//!
//! The storage engine owns the live device graph. The provider core only
//! observes devices and asks the engine to perform mutations after it has
//! validated the request.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// Partition Types
// =============================================================================

/// On-disk partition table format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    /// MS-DOS / MBR table
    Msdos,
    /// GUID partition table
    Gpt,
}

impl std::fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionTableType::Msdos => write!(f, "msdos"),
            PartitionTableType::Gpt => write!(f, "gpt"),
        }
    }
}

/// Role of a partition inside its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    Primary,
    Extended,
    Logical,
}

impl PartitionRole {
    /// CIM `PartitionType` value of the LMI_DiskPartitionConfigurationSetting
    pub fn cim_value(&self) -> u16 {
        match self {
            PartitionRole::Primary => 1,
            PartitionRole::Extended => 2,
            PartitionRole::Logical => 3,
        }
    }

    /// Parse a CIM `PartitionType` value
    pub fn from_cim_value(value: u16) -> Option<Self> {
        match value {
            1 => Some(PartitionRole::Primary),
            2 => Some(PartitionRole::Extended),
            3 => Some(PartitionRole::Logical),
            _ => None,
        }
    }
}

impl std::fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionRole::Primary => write!(f, "primary"),
            PartitionRole::Extended => write!(f, "extended"),
            PartitionRole::Logical => write!(f, "logical"),
        }
    }
}

// =============================================================================
// RAID Levels
// =============================================================================

/// MD RAID level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Linear,
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    /// Parse an engine level string (`raid5`, `5`, `linear`, ...)
    pub fn parse(level: &str) -> Option<Self> {
        let lowered = level.trim().to_lowercase();
        let normalized = lowered.strip_prefix("raid").unwrap_or(lowered.as_str());
        match normalized {
            "linear" => Some(RaidLevel::Linear),
            "0" | "stripe" => Some(RaidLevel::Raid0),
            "1" | "mirror" => Some(RaidLevel::Raid1),
            "4" => Some(RaidLevel::Raid4),
            "5" => Some(RaidLevel::Raid5),
            "6" => Some(RaidLevel::Raid6),
            "10" => Some(RaidLevel::Raid10),
            _ => None,
        }
    }

    /// Parse the numeric level used by the CreateOrModifyMDRAID method
    pub fn from_number(level: u64) -> Option<Self> {
        match level {
            0 => Some(RaidLevel::Raid0),
            1 => Some(RaidLevel::Raid1),
            4 => Some(RaidLevel::Raid4),
            5 => Some(RaidLevel::Raid5),
            6 => Some(RaidLevel::Raid6),
            10 => Some(RaidLevel::Raid10),
            _ => None,
        }
    }

    /// Level string understood by the engine
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidLevel::Linear => "linear",
            RaidLevel::Raid0 => "raid0",
            RaidLevel::Raid1 => "raid1",
            RaidLevel::Raid4 => "raid4",
            RaidLevel::Raid5 => "raid5",
            RaidLevel::Raid6 => "raid6",
            RaidLevel::Raid10 => "raid10",
        }
    }

    /// Minimum number of member devices
    pub fn min_members(&self) -> usize {
        match self {
            RaidLevel::Linear | RaidLevel::Raid0 | RaidLevel::Raid1 => 2,
            RaidLevel::Raid4 | RaidLevel::Raid5 => 3,
            RaidLevel::Raid6 | RaidLevel::Raid10 => 4,
        }
    }
}

impl std::fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Formats
// =============================================================================

/// Content written on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormatKind {
    /// Local filesystem (ext4, xfs, ...)
    Filesystem { fs_type: String },
    /// LVM physical volume
    LvmPv {
        #[serde(default)]
        vg_name: Option<String>,
    },
    /// MD RAID member
    MdMember {
        #[serde(default)]
        array: Option<String>,
    },
}

/// Format information of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub kind: FormatKind,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Format {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind,
            uuid: None,
            label: None,
        }
    }

    pub fn is_filesystem(&self) -> bool {
        matches!(self.kind, FormatKind::Filesystem { .. })
    }

    pub fn is_lvm_pv(&self) -> bool {
        matches!(self.kind, FormatKind::LvmPv { .. })
    }

    pub fn is_md_member(&self) -> bool {
        matches!(self.kind, FormatKind::MdMember { .. })
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Engine specific device type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceKind {
    /// Whole disk
    Disk,
    /// Partition on a disk
    Partition {
        number: u32,
        table: PartitionTableType,
        role: PartitionRole,
        start_sector: u64,
        end_sector: u64,
    },
    /// LVM logical volume
    LogicalVolume { vg_name: String },
    /// LVM volume group
    VolumeGroup { extent_size: u64 },
    /// MD RAID array, level as reported by the engine
    MdRaid { level: String },
    /// Anything else (loop devices, device mapper, ...)
    Other,
}

fn default_block_size() -> u32 {
    512
}

/// A node of the engine's device graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable path-like identifier (e.g. /dev/sda1)
    pub path: String,
    /// Short name (sda1, vg0, md127)
    pub name: String,
    /// Device type
    pub kind: DeviceKind,
    /// Size in bytes
    pub size_bytes: u64,
    /// Logical block size
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Paths of the devices this one is built from
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    /// Format on the device, if any
    #[serde(default)]
    pub format: Option<Format>,
    /// Partition table on the device, if any
    #[serde(default)]
    pub partition_table: Option<PartitionTableType>,
}

impl Device {
    /// Create a device with no parents, format or partition table
    pub fn new(path: impl Into<String>, name: impl Into<String>, kind: DeviceKind, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind,
            size_bytes,
            block_size: default_block_size(),
            parents: Vec::new(),
            uuid: None,
            format: None,
            partition_table: None,
        }
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_partition_table(mut self, table: PartitionTableType) -> Self {
        self.partition_table = Some(table);
        self
    }

    pub fn is_disk(&self) -> bool {
        matches!(self.kind, DeviceKind::Disk)
    }

    pub fn is_partition(&self) -> bool {
        matches!(self.kind, DeviceKind::Partition { .. })
    }

    pub fn is_logical_volume(&self) -> bool {
        matches!(self.kind, DeviceKind::LogicalVolume { .. })
    }

    pub fn is_volume_group(&self) -> bool {
        matches!(self.kind, DeviceKind::VolumeGroup { .. })
    }

    pub fn is_md_raid(&self) -> bool {
        matches!(self.kind, DeviceKind::MdRaid { .. })
    }

    /// Number of logical blocks
    pub fn block_count(&self) -> u64 {
        if self.block_size == 0 {
            0
        } else {
            self.size_bytes / self.block_size as u64
        }
    }

    /// Name of the volume group this device belongs to (LVs only)
    pub fn vg_name(&self) -> Option<&str> {
        match &self.kind {
            DeviceKind::LogicalVolume { vg_name } => Some(vg_name),
            _ => None,
        }
    }
}

// =============================================================================
// Storage Engine Port
// =============================================================================

/// Port to the storage engine owning the device graph
///
/// Queries never fail; lookups that find nothing return `None`. Mutations
/// return the engine's fault as [`crate::Error::EngineFailed`] or a more
/// specific client fault.
pub trait StorageEngine: Send + Sync {
    /// All devices, in the engine's iteration order
    fn devices(&self) -> Vec<Arc<Device>>;

    /// Look up a device by path
    fn device(&self, path: &str) -> Option<Arc<Device>>;

    /// Devices this device is built from
    fn parents(&self, device: &Device) -> Vec<Arc<Device>> {
        device
            .parents
            .iter()
            .filter_map(|path| {
                let parent = self.device(path);
                if parent.is_none() {
                    warn!("Device {} references unknown parent {}", device.path, path);
                }
                parent
            })
            .collect()
    }

    /// Devices built directly on top of this device
    fn children(&self, device: &Device) -> Vec<Arc<Device>> {
        self.devices()
            .into_iter()
            .filter(|d| d.parents.iter().any(|p| p == &device.path))
            .collect()
    }

    /// Look up a volume group by name
    fn volume_group(&self, name: &str) -> Option<Arc<Device>> {
        self.devices()
            .into_iter()
            .find(|d| d.is_volume_group() && d.name == name)
    }

    /// Create a volume group from physical volumes
    fn create_volume_group(&self, name: &str, members: &[String], extent_size: u64) -> Result<Arc<Device>>;

    /// Create a logical volume in a volume group
    fn create_logical_volume(&self, vg_name: &str, name: &str, size_bytes: u64) -> Result<Arc<Device>>;

    /// Create an MD RAID array
    fn create_md_raid(&self, name: &str, members: &[String], level: RaidLevel) -> Result<Arc<Device>>;

    /// Write a new, empty partition table
    fn create_partition_table(&self, disk: &str, table: PartitionTableType) -> Result<Arc<Device>>;

    /// Create a partition; the start sector defaults to the first free one
    fn create_partition(
        &self,
        disk: &str,
        role: PartitionRole,
        start_sector: Option<u64>,
        size_bytes: u64,
    ) -> Result<Arc<Device>>;

    /// Destroy a device that has no children
    fn destroy_device(&self, path: &str) -> Result<()>;
}

/// Shared storage engine handle
pub type StorageEngineRef = Arc<dyn StorageEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raid_level_parse() {
        assert_eq!(RaidLevel::parse("raid5"), Some(RaidLevel::Raid5));
        assert_eq!(RaidLevel::parse("RAID10"), Some(RaidLevel::Raid10));
        assert_eq!(RaidLevel::parse("1"), Some(RaidLevel::Raid1));
        assert_eq!(RaidLevel::parse("linear"), Some(RaidLevel::Linear));
        assert_eq!(RaidLevel::parse("raid7"), None);
        assert_eq!(RaidLevel::from_number(6), Some(RaidLevel::Raid6));
        assert_eq!(RaidLevel::from_number(3), None);
    }

    #[test]
    fn test_partition_role_cim_values() {
        for role in [PartitionRole::Primary, PartitionRole::Extended, PartitionRole::Logical] {
            assert_eq!(PartitionRole::from_cim_value(role.cim_value()), Some(role));
        }
        assert_eq!(PartitionRole::from_cim_value(9), None);
    }

    #[test]
    fn test_device_kind_predicates() {
        let disk = Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30);
        assert!(disk.is_disk());
        assert_eq!(disk.block_count(), (1 << 30) / 512);

        let lv = Device::new(
            "/dev/mapper/vg0-home",
            "home",
            DeviceKind::LogicalVolume {
                vg_name: "vg0".into(),
            },
            1 << 20,
        );
        assert_eq!(lv.vg_name(), Some("vg0"));
        assert!(!lv.is_volume_group());
    }

    #[test]
    fn test_device_yaml() {
        let yaml = r#"
path: /dev/md0
name: md0
kind:
  type: md_raid
  level: raid1
size_bytes: 1024
parents: [/dev/sda1, /dev/sdb1]
"#;
        let device: Device = serde_yaml::from_str(yaml).unwrap();
        assert!(device.is_md_raid());
        assert_eq!(device.parents.len(), 2);
        assert_eq!(device.block_size, 512);
    }
}
