//! In-memory storage engine
//!
//! Holds a device graph in insertion order and performs mutations on it
//! with the same preconditions a real engine enforces. All mutations run
//! under a single write lock, so concurrent mutating requests are
//! serialized here rather than in the provider core.

use crate::domain::ports::{
    Device, DeviceKind, Format, FormatKind, PartitionRole, PartitionTableType, RaidLevel,
    StorageEngine,
};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// First usable sector of a fresh partition table (1 MiB alignment)
const FIRST_USABLE_SECTOR: u64 = 2048;

/// Sectors reserved at the end of a GPT disk for the backup table
const GPT_BACKUP_SECTORS: u64 = 34;

/// Primary + extended partitions allowed in an MS-DOS table
const MSDOS_MAX_PRIMARY: u32 = 4;

/// First number of a logical partition
const MSDOS_FIRST_LOGICAL: u32 = 5;

/// Serialized device graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub devices: Vec<Device>,
}

/// Storage engine keeping its device graph in memory
pub struct MemoryEngine {
    devices: RwLock<IndexMap<String, Arc<Device>>>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("device_count", &self.devices.read().len())
            .finish()
    }
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(IndexMap::new()),
        }
    }

    /// Create an engine from a list of devices
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let engine = Self::new();
        {
            let mut map = engine.devices.write();
            for device in devices {
                map.insert(device.path.clone(), Arc::new(device));
            }
        }
        engine
    }

    /// Load a YAML device snapshot
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let snapshot: DeviceSnapshot = serde_yaml::from_str(&content)?;
        info!("Loaded {} devices from {:?}", snapshot.devices.len(), path);
        Ok(Self::from_devices(snapshot.devices))
    }

    /// Dump the current device graph
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            devices: self.devices.read().values().map(|d| (**d).clone()).collect(),
        }
    }

    /// Insert or replace a device
    pub fn insert(&self, device: Device) -> Arc<Device> {
        let device = Arc::new(device);
        self.devices.write().insert(device.path.clone(), device.clone());
        device
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Graph helpers (run under the engine lock)
// =============================================================================

fn engine_error(operation: &str, reason: impl Into<String>) -> Error {
    Error::EngineFailed {
        operation: operation.to_string(),
        reason: reason.into(),
    }
}

fn lookup<'a>(map: &'a IndexMap<String, Arc<Device>>, path: &str) -> Result<&'a Arc<Device>> {
    map.get(path).ok_or_else(|| Error::DeviceNotFound {
        device: path.to_string(),
    })
}

fn children_of<'a>(
    map: &'a IndexMap<String, Arc<Device>>,
    path: &'a str,
) -> impl Iterator<Item = &'a Arc<Device>> + 'a {
    map.values().filter(move |d| d.parents.iter().any(|p| p == path))
}

fn has_children(map: &IndexMap<String, Arc<Device>>, path: &str) -> bool {
    children_of(map, path).next().is_some()
}

/// Check that a device can be consumed by a new VG or MD array
fn ensure_unused(map: &IndexMap<String, Arc<Device>>, operation: &str, path: &str) -> Result<()> {
    let device = lookup(map, path)?;
    if device.is_volume_group() || (device.is_logical_volume() && operation == "create_md_raid") {
        return Err(engine_error(operation, format!("{} cannot be used as a member", path)));
    }
    if has_children(map, path) {
        return Err(engine_error(operation, format!("{} is in use", path)));
    }
    if device.partition_table.is_some() {
        return Err(engine_error(operation, format!("{} holds a partition table", path)));
    }
    match &device.format {
        None => Ok(()),
        Some(Format {
            kind: FormatKind::LvmPv { vg_name: None },
            ..
        }) if operation == "create_volume_group" => Ok(()),
        Some(_) => Err(engine_error(operation, format!("{} is already formatted", path))),
    }
}

fn reformat(map: &mut IndexMap<String, Arc<Device>>, path: &str, format: Option<Format>) {
    if let Some(device) = map.get(path) {
        let mut updated = (**device).clone();
        updated.format = format;
        map.insert(path.to_string(), Arc::new(updated));
    }
}

fn partition_path(disk_path: &str, number: u32) -> String {
    if disk_path.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk_path, number)
    } else {
        format!("{}{}", disk_path, number)
    }
}

fn raid_size(level: RaidLevel, sizes: &[u64]) -> u64 {
    let n = sizes.len() as u64;
    let smallest = sizes.iter().copied().min().unwrap_or(0);
    match level {
        RaidLevel::Linear | RaidLevel::Raid0 => sizes.iter().sum(),
        RaidLevel::Raid1 => smallest,
        RaidLevel::Raid4 | RaidLevel::Raid5 => smallest * n.saturating_sub(1),
        RaidLevel::Raid6 => smallest * n.saturating_sub(2),
        RaidLevel::Raid10 => smallest * n / 2,
    }
}

// =============================================================================
// StorageEngine implementation
// =============================================================================

impl StorageEngine for MemoryEngine {
    fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }

    fn device(&self, path: &str) -> Option<Arc<Device>> {
        self.devices.read().get(path).cloned()
    }

    fn create_volume_group(&self, name: &str, members: &[String], extent_size: u64) -> Result<Arc<Device>> {
        const OP: &str = "create_volume_group";
        let mut map = self.devices.write();

        if name.is_empty() || name.contains('/') {
            return Err(engine_error(OP, format!("invalid volume group name {:?}", name)));
        }
        if extent_size == 0 {
            return Err(engine_error(OP, "extent size must be non-zero"));
        }
        let path = format!("/dev/{}", name);
        if map.contains_key(&path) || map.values().any(|d| d.is_volume_group() && d.name == name) {
            return Err(engine_error(OP, format!("{} already exists", name)));
        }
        if members.is_empty() {
            return Err(engine_error(OP, "at least one physical volume is required"));
        }

        let mut size_bytes = 0u64;
        for member in members {
            ensure_unused(&map, OP, member)?;
            let device = lookup(&map, member)?;
            size_bytes += device.size_bytes / extent_size * extent_size;
        }

        for member in members {
            reformat(
                &mut map,
                member,
                Some(Format::new(FormatKind::LvmPv {
                    vg_name: Some(name.to_string()),
                })),
            );
        }

        let vg = Arc::new(
            Device::new(path.clone(), name, DeviceKind::VolumeGroup { extent_size }, size_bytes)
                .with_parents(members.iter().cloned()),
        );
        map.insert(path, vg.clone());
        info!("Created volume group {} on {:?}", name, members);
        Ok(vg)
    }

    fn create_logical_volume(&self, vg_name: &str, name: &str, size_bytes: u64) -> Result<Arc<Device>> {
        const OP: &str = "create_logical_volume";
        let mut map = self.devices.write();

        let vg = map
            .values()
            .find(|d| d.is_volume_group() && d.name == vg_name)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                device: format!("volume group {}", vg_name),
            })?;
        let extent_size = match vg.kind {
            DeviceKind::VolumeGroup { extent_size } => extent_size,
            _ => return Err(engine_error(OP, "not a volume group")),
        };

        if name.is_empty() || name.contains('/') {
            return Err(engine_error(OP, format!("invalid logical volume name {:?}", name)));
        }
        let path = format!("/dev/mapper/{}-{}", vg_name, name);
        if map.contains_key(&path) {
            return Err(engine_error(OP, format!("{} already exists", path)));
        }

        let rounded = size_bytes
            .div_ceil(extent_size)
            .checked_mul(extent_size)
            .ok_or_else(|| engine_error(OP, format!("requested {} bytes exceed any volume group", size_bytes)))?;
        let used: u64 = children_of(&map, &vg.path).map(|d| d.size_bytes).sum();
        let free = vg.size_bytes.saturating_sub(used);
        if rounded == 0 || rounded > free {
            return Err(engine_error(
                OP,
                format!("requested {} bytes, {} bytes free in {}", rounded, free, vg_name),
            ));
        }

        let lv = Arc::new(
            Device::new(
                path.clone(),
                name,
                DeviceKind::LogicalVolume {
                    vg_name: vg_name.to_string(),
                },
                rounded,
            )
            .with_parents([vg.path.clone()]),
        );
        map.insert(path, lv.clone());
        info!("Created logical volume {}/{} ({} bytes)", vg_name, name, rounded);
        Ok(lv)
    }

    fn create_md_raid(&self, name: &str, members: &[String], level: RaidLevel) -> Result<Arc<Device>> {
        const OP: &str = "create_md_raid";
        let mut map = self.devices.write();

        if name.is_empty() || name.contains('/') {
            return Err(engine_error(OP, format!("invalid array name {:?}", name)));
        }
        let path = format!("/dev/md/{}", name);
        if map.contains_key(&path) {
            return Err(engine_error(OP, format!("{} already exists", path)));
        }
        if members.len() < level.min_members() {
            return Err(engine_error(
                OP,
                format!("{} needs at least {} members", level, level.min_members()),
            ));
        }

        let mut sizes = Vec::with_capacity(members.len());
        for member in members {
            ensure_unused(&map, OP, member)?;
            sizes.push(lookup(&map, member)?.size_bytes);
        }

        for member in members {
            reformat(
                &mut map,
                member,
                Some(Format::new(FormatKind::MdMember {
                    array: Some(path.clone()),
                })),
            );
        }

        let array = Arc::new(
            Device::new(
                path.clone(),
                name,
                DeviceKind::MdRaid {
                    level: level.as_str().to_string(),
                },
                raid_size(level, &sizes),
            )
            .with_parents(members.iter().cloned()),
        );
        map.insert(path, array.clone());
        info!("Created {} array {} on {:?}", level, name, members);
        Ok(array)
    }

    fn create_partition_table(&self, disk: &str, table: PartitionTableType) -> Result<Arc<Device>> {
        const OP: &str = "create_partition_table";
        let mut map = self.devices.write();

        let device = lookup(&map, disk)?.clone();
        if !(device.is_disk() || device.is_md_raid()) {
            return Err(engine_error(OP, format!("{} cannot hold a partition table", disk)));
        }
        if has_children(&map, disk) {
            return Err(engine_error(OP, format!("{} is in use", disk)));
        }
        if device.format.is_some() {
            return Err(engine_error(OP, format!("{} is formatted", disk)));
        }

        let mut updated = (*device).clone();
        updated.partition_table = Some(table);
        let updated = Arc::new(updated);
        map.insert(disk.to_string(), updated.clone());
        info!("Created {} partition table on {}", table, disk);
        Ok(updated)
    }

    fn create_partition(
        &self,
        disk: &str,
        role: PartitionRole,
        start_sector: Option<u64>,
        size_bytes: u64,
    ) -> Result<Arc<Device>> {
        const OP: &str = "create_partition";
        let mut map = self.devices.write();

        let device = lookup(&map, disk)?.clone();
        let table = device
            .partition_table
            .ok_or_else(|| engine_error(OP, format!("{} has no partition table", disk)))?;
        let block_size = device.block_size.max(1) as u64;
        if size_bytes < block_size {
            return Err(engine_error(OP, "partition size is smaller than one block"));
        }

        let siblings: Vec<(u32, PartitionRole, u64, u64)> = children_of(&map, disk)
            .filter_map(|d| match d.kind {
                DeviceKind::Partition {
                    number,
                    role,
                    start_sector,
                    end_sector,
                    ..
                } => Some((number, role, start_sector, end_sector)),
                _ => None,
            })
            .collect();
        let extended = siblings.iter().find(|s| s.1 == PartitionRole::Extended).copied();

        // Region the new partition has to fit in, and its number
        let last_sector = match table {
            PartitionTableType::Gpt => device.block_count().saturating_sub(GPT_BACKUP_SECTORS + 1),
            PartitionTableType::Msdos => device.block_count().saturating_sub(1),
        };
        let (region_start, region_end, number) = match (table, role) {
            (PartitionTableType::Gpt, PartitionRole::Primary) => {
                let number = (1..).find(|n| siblings.iter().all(|s| s.0 != *n)).unwrap_or(1);
                (FIRST_USABLE_SECTOR, last_sector, number)
            }
            (PartitionTableType::Gpt, _) => {
                return Err(engine_error(OP, "GPT supports primary partitions only"));
            }
            (PartitionTableType::Msdos, PartitionRole::Logical) => {
                let (_, _, ext_start, ext_end) = extended
                    .ok_or_else(|| engine_error(OP, "logical partition requires an extended partition"))?;
                let number = siblings
                    .iter()
                    .filter(|s| s.1 == PartitionRole::Logical)
                    .map(|s| s.0 + 1)
                    .max()
                    .unwrap_or(MSDOS_FIRST_LOGICAL);
                (ext_start + 1, ext_end, number)
            }
            (PartitionTableType::Msdos, role) => {
                if role == PartitionRole::Extended && extended.is_some() {
                    return Err(engine_error(OP, "only one extended partition is allowed"));
                }
                let number = (1..=MSDOS_MAX_PRIMARY)
                    .find(|n| siblings.iter().all(|s| s.0 != *n))
                    .ok_or_else(|| engine_error(OP, "no free primary partition slot"))?;
                (FIRST_USABLE_SECTOR, last_sector, number)
            }
        };

        // Partitions competing for the same region
        let occupied: Vec<(u64, u64)> = siblings
            .iter()
            .filter(|s| match role {
                PartitionRole::Logical => s.1 == PartitionRole::Logical,
                _ => s.1 != PartitionRole::Logical,
            })
            .map(|s| (s.2, s.3))
            .collect();

        let sectors = size_bytes / block_size;
        let start = match start_sector {
            Some(start) => start,
            None => occupied
                .iter()
                .map(|(_, end)| end + 1)
                .filter(|s| *s >= region_start)
                .max()
                .unwrap_or(region_start),
        };
        let end = start
            .checked_add(sectors)
            .and_then(|end| end.checked_sub(1))
            .ok_or_else(|| engine_error(OP, format!("{} sectors from {} overflow the disk", sectors, start)))?;
        if start < region_start || end > region_end {
            return Err(engine_error(
                OP,
                format!("sectors {}-{} do not fit into {}-{}", start, end, region_start, region_end),
            ));
        }
        if occupied.iter().any(|(s, e)| start <= *e && *s <= end) {
            return Err(engine_error(OP, format!("sectors {}-{} overlap an existing partition", start, end)));
        }

        let path = partition_path(disk, number);
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let partition = Arc::new(
            Device::new(
                path.clone(),
                name,
                DeviceKind::Partition {
                    number,
                    table,
                    role,
                    start_sector: start,
                    end_sector: end,
                },
                sectors * block_size,
            )
            .with_parents([disk.to_string()]),
        );
        map.insert(path.clone(), partition.clone());
        info!("Created {} partition {} ({}-{})", role, path, start, end);
        Ok(partition)
    }

    fn destroy_device(&self, path: &str) -> Result<()> {
        const OP: &str = "destroy_device";
        let mut map = self.devices.write();

        let device = lookup(&map, path)?.clone();
        if has_children(&map, path) {
            return Err(engine_error(OP, format!("{} is in use", path)));
        }
        if device.is_disk() {
            return Err(engine_error(OP, format!("{} is a disk", path)));
        }

        map.shift_remove(path);
        if device.is_volume_group() || device.is_md_raid() {
            for parent in &device.parents {
                reformat(&mut map, parent, None);
            }
        }
        debug!("Destroyed {}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const GIB: u64 = 1 << 30;
    const MIB: u64 = 1 << 20;

    fn engine() -> MemoryEngine {
        MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 10 * GIB),
            Device::new("/dev/sdb", "sdb", DeviceKind::Disk, 10 * GIB),
            Device::new("/dev/sdc", "sdc", DeviceKind::Disk, 20 * GIB),
            Device::new("/dev/nvme0n1", "nvme0n1", DeviceKind::Disk, 20 * GIB),
        ])
    }

    #[test]
    fn test_volume_group_lifecycle() {
        let engine = engine();
        let vg = engine
            .create_volume_group("vg0", &["/dev/sda".into(), "/dev/sdb".into()], 4 * MIB)
            .unwrap();
        assert_eq!(vg.size_bytes, 20 * GIB);
        assert!(engine.device("/dev/sda").unwrap().format.as_ref().unwrap().is_lvm_pv());

        let lv = engine.create_logical_volume("vg0", "home", 5 * GIB).unwrap();
        assert_eq!(lv.path, "/dev/mapper/vg0-home");
        assert_eq!(engine.children(&vg).len(), 1);

        // Volume group with a logical volume cannot go away
        assert!(engine.destroy_device("/dev/vg0").is_err());
        engine.destroy_device(&lv.path).unwrap();
        engine.destroy_device("/dev/vg0").unwrap();
        assert!(engine.device("/dev/sda").unwrap().format.is_none());
    }

    #[test]
    fn test_logical_volume_out_of_space() {
        let engine = engine();
        engine
            .create_volume_group("vg0", &["/dev/sda".into()], 4 * MIB)
            .unwrap();
        let result = engine.create_logical_volume("vg0", "big", 11 * GIB);
        assert_matches!(result, Err(Error::EngineFailed { .. }));
        let result = engine.create_logical_volume("nope", "lv", GIB);
        assert_matches!(result, Err(Error::DeviceNotFound { .. }));
        let result = engine.create_logical_volume("vg0", "huge", u64::MAX);
        assert_matches!(result, Err(Error::EngineFailed { .. }));
    }

    #[test]
    fn test_md_raid_sizes() {
        let engine = engine();
        let md = engine
            .create_md_raid(
                "data",
                &["/dev/sda".into(), "/dev/sdb".into(), "/dev/sdc".into()],
                RaidLevel::Raid5,
            )
            .unwrap();
        assert_eq!(md.size_bytes, 20 * GIB);
        assert_eq!(md.parents.len(), 3);

        // Members are taken now
        let again = engine.create_md_raid("other", &["/dev/sda".into(), "/dev/nvme0n1".into()], RaidLevel::Raid1);
        assert!(again.is_err());
    }

    #[test]
    fn test_md_raid_too_few_members() {
        let engine = engine();
        let result = engine.create_md_raid("r5", &["/dev/sda".into(), "/dev/sdb".into()], RaidLevel::Raid5);
        assert_matches!(result, Err(Error::EngineFailed { .. }));
    }

    #[test]
    fn test_gpt_partitions() {
        let engine = engine();
        engine.create_partition_table("/dev/nvme0n1", PartitionTableType::Gpt).unwrap();

        let p1 = engine
            .create_partition("/dev/nvme0n1", PartitionRole::Primary, None, GIB)
            .unwrap();
        assert_eq!(p1.path, "/dev/nvme0n1p1");
        let p2 = engine
            .create_partition("/dev/nvme0n1", PartitionRole::Primary, None, GIB)
            .unwrap();
        assert_eq!(p2.path, "/dev/nvme0n1p2");
        match (&p1.kind, &p2.kind) {
            (
                DeviceKind::Partition { end_sector: end1, .. },
                DeviceKind::Partition { start_sector: start2, .. },
            ) => assert_eq!(*start2, end1 + 1),
            _ => panic!("expected partitions"),
        }

        let logical = engine.create_partition("/dev/nvme0n1", PartitionRole::Logical, None, GIB);
        assert!(logical.is_err());

        let past_end = engine.create_partition("/dev/nvme0n1", PartitionRole::Primary, Some(u64::MAX), GIB);
        assert_matches!(past_end, Err(Error::EngineFailed { .. }));
        assert_eq!(engine.children(&engine.device("/dev/nvme0n1").unwrap()).len(), 2);
    }

    #[test]
    fn test_msdos_extended_and_logical() {
        let engine = engine();
        engine.create_partition_table("/dev/sda", PartitionTableType::Msdos).unwrap();
        engine
            .create_partition("/dev/sda", PartitionRole::Primary, None, GIB)
            .unwrap();
        let ext = engine
            .create_partition("/dev/sda", PartitionRole::Extended, None, 4 * GIB)
            .unwrap();
        assert_eq!(ext.path, "/dev/sda2");

        let l5 = engine
            .create_partition("/dev/sda", PartitionRole::Logical, None, GIB)
            .unwrap();
        assert_eq!(l5.path, "/dev/sda5");
        let l6 = engine
            .create_partition("/dev/sda", PartitionRole::Logical, None, GIB)
            .unwrap();
        assert_eq!(l6.path, "/dev/sda6");

        assert!(engine
            .create_partition("/dev/sda", PartitionRole::Extended, None, GIB)
            .is_err());
    }

    #[test]
    fn test_overlap_rejected() {
        let engine = engine();
        engine.create_partition_table("/dev/sdb", PartitionTableType::Msdos).unwrap();
        engine
            .create_partition("/dev/sdb", PartitionRole::Primary, Some(2048), GIB)
            .unwrap();
        let result = engine.create_partition("/dev/sdb", PartitionRole::Primary, Some(4096), GIB);
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let engine = engine();
        let yaml = serde_yaml::to_string(&engine.snapshot()).unwrap();
        let snapshot: DeviceSnapshot = serde_yaml::from_str(&yaml).unwrap();
        let reloaded = MemoryEngine::from_devices(snapshot.devices);
        assert_eq!(reloaded.len(), engine.len());
        assert_eq!(reloaded.devices()[0].path, "/dev/sda");
    }
}
