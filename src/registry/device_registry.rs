//! Device Registry
//!
//! Ordered list of device name resolvers with first-match-wins lookups in
//! both directions. Registration order is part of the contract: specific
//! families go before the generic extent fallback.

use super::resolvers::{
    ExtentResolver, LogicalVolumeResolver, MdRaidResolver, NameResolverRef, PartitionResolver,
    SystemIdentity, VolumeGroupResolver,
};
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, StorageEngine};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Lookup counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub name_lookups: AtomicU64,
    pub device_lookups: AtomicU64,
    pub misses: AtomicU64,
}

/// Snapshot of the lookup counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub name_lookups: u64,
    pub device_lookups: u64,
    pub misses: u64,
}

impl RegistryStats {
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            name_lookups: self.name_lookups.load(Ordering::Relaxed),
            device_lookups: self.device_lookups.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Central device <-> name lookup
#[derive(Default)]
pub struct DeviceRegistry {
    resolvers: Vec<NameResolverRef>,
    stats: RegistryStats,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field(
                "families",
                &self.resolvers.iter().map(|r| r.family()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in family, fallback last
    pub fn with_default_resolvers(identity: SystemIdentity) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PartitionResolver::new(identity.clone())));
        registry.register(Arc::new(LogicalVolumeResolver::new(identity.clone())));
        registry.register(Arc::new(VolumeGroupResolver::new(identity.clone())));
        registry.register(Arc::new(MdRaidResolver::new(identity.clone())));
        registry.register(Arc::new(ExtentResolver::new(identity)));
        registry
    }

    /// Append a resolver; earlier registrations win
    pub fn register(&mut self, resolver: NameResolverRef) {
        debug!(
            "Registered {} resolver at position {}",
            resolver.family(),
            self.resolvers.len()
        );
        self.resolvers.push(resolver);
    }

    pub fn resolvers(&self) -> &[NameResolverRef] {
        &self.resolvers
    }

    /// All classes produced by registered resolvers
    pub fn class_names(&self) -> Vec<&'static str> {
        self.resolvers
            .iter()
            .flat_map(|r| r.class_names().iter().copied())
            .collect()
    }

    /// First resolver accepting the name
    pub fn provider_for_name(&self, name: &InstanceName) -> Option<&NameResolverRef> {
        self.resolvers.iter().find(|r| r.accepts_name(name))
    }

    /// Live device designated by a name; `None` when nothing matches
    pub fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        self.stats.name_lookups.fetch_add(1, Ordering::Relaxed);
        let device = self
            .provider_for_name(name)
            .and_then(|resolver| resolver.device_for_name(engine, name));
        if device.is_none() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!("No device for {}", name);
        }
        device
    }

    /// First resolver accepting the device
    pub fn provider_for_device(&self, device: &Device) -> Option<&NameResolverRef> {
        self.resolvers.iter().find(|r| r.accepts_device(device))
    }

    /// Name of a device; `None` when no resolver accepts it
    pub fn name_for_device(&self, device: &Device) -> Option<InstanceName> {
        self.stats.device_lookups.fetch_add(1, Ordering::Relaxed);
        let name = self
            .provider_for_device(device)
            .map(|resolver| resolver.name_for_device(device));
        if name.is_none() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!("No resolver accepts {}", device.path);
        }
        name
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{DeviceKind, PartitionRole, PartitionTableType};
    use crate::engine::MemoryEngine;
    use crate::registry::resolvers::{DeviceFamily, NameResolver};

    fn identity() -> SystemIdentity {
        SystemIdentity {
            system_name: "host.example.com".into(),
            system_class_name: "Linux_ComputerSystem".into(),
            instance_id_prefix: "LMI".into(),
        }
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 8 << 30).with_partition_table(PartitionTableType::Gpt),
            Device::new(
                "/dev/sda1",
                "sda1",
                DeviceKind::Partition {
                    number: 1,
                    table: PartitionTableType::Gpt,
                    role: PartitionRole::Primary,
                    start_sector: 2048,
                    end_sector: 2099199,
                },
                1 << 30,
            )
            .with_parents(["/dev/sda"]),
            Device::new("/dev/sdb", "sdb", DeviceKind::Disk, 8 << 30),
            Device::new(
                "/dev/md/data",
                "data",
                DeviceKind::MdRaid { level: "raid1".into() },
                1 << 30,
            )
            .with_parents(["/dev/sda1", "/dev/sdb"]),
            Device::new("/dev/vg0", "vg0", DeviceKind::VolumeGroup { extent_size: 4 << 20 }, 1 << 30)
                .with_parents(["/dev/md/data"]),
            Device::new(
                "/dev/mapper/vg0-root",
                "root",
                DeviceKind::LogicalVolume { vg_name: "vg0".into() },
                512 << 20,
            )
            .with_parents(["/dev/vg0"]),
            Device::new("/dev/loop0", "loop0", DeviceKind::Other, 1 << 20),
        ])
    }

    #[test]
    fn test_round_trip_every_device() {
        let engine = engine();
        let registry = DeviceRegistry::with_default_resolvers(identity());

        for device in engine.devices() {
            let name = registry.name_for_device(&device).unwrap();
            let resolved = registry.device_for_name(&engine, &name).unwrap();
            assert_eq!(resolved, device, "round trip failed for {}", name);

            // Text form survives as well
            let reparsed: InstanceName = name.to_string().parse().unwrap();
            assert_eq!(reparsed, name);
        }
    }

    #[test]
    fn test_first_match_is_deterministic() {
        let engine = engine();
        let registry = DeviceRegistry::with_default_resolvers(identity());
        let expected = [
            ("/dev/sda", DeviceFamily::Extent),
            ("/dev/sda1", DeviceFamily::Partition),
            ("/dev/md/data", DeviceFamily::MdRaid),
            ("/dev/vg0", DeviceFamily::VolumeGroup),
            ("/dev/mapper/vg0-root", DeviceFamily::LogicalVolume),
            ("/dev/loop0", DeviceFamily::Extent),
        ];

        for _ in 0..3 {
            for (path, family) in expected {
                let device = engine.device(path).unwrap();
                assert_eq!(registry.provider_for_device(&device).unwrap().family(), family);
            }
        }
    }

    #[test]
    fn test_each_device_accepted_by_exactly_one_resolver() {
        let engine = engine();
        let registry = DeviceRegistry::with_default_resolvers(identity());
        for device in engine.devices() {
            let accepting = registry
                .resolvers()
                .iter()
                .filter(|r| r.accepts_device(&device))
                .count();
            assert_eq!(accepting, 1, "{} accepted by {} resolvers", device.path, accepting);
        }
    }

    #[test]
    fn test_fallback_first_shadows_specific_resolvers() {
        // Registering the fallback first breaks nothing for disks, but partitions
        // still resolve to their own family because the fallback refuses them
        let engine = engine();
        let mut registry = DeviceRegistry::new();
        registry.register(Arc::new(ExtentResolver::new(identity())));
        registry.register(Arc::new(PartitionResolver::new(identity())));

        let partition = engine.device("/dev/sda1").unwrap();
        assert_eq!(
            registry.provider_for_device(&partition).unwrap().family(),
            DeviceFamily::Partition
        );
    }

    #[test]
    fn test_unknown_name_is_none() {
        let engine = engine();
        let registry = DeviceRegistry::with_default_resolvers(identity());

        let unknown_class = InstanceName::new("LMI_Nothing").with_key("DeviceID", "/dev/sda");
        assert!(registry.provider_for_name(&unknown_class).is_none());
        assert!(registry.device_for_name(&engine, &unknown_class).is_none());

        let gone = InstanceName::with_instance_id("LMI_VGStoragePool", "LMI:VG:missing");
        assert!(registry.device_for_name(&engine, &gone).is_none());
        assert_eq!(registry.stats().misses, 2);
    }

    #[test]
    fn test_empty_registry() {
        let engine = engine();
        let registry = DeviceRegistry::new();
        let device = engine.device("/dev/sda").unwrap();
        assert!(registry.name_for_device(&device).is_none());
        assert!(registry.class_names().is_empty());
    }
}
