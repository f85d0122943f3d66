//! Format resolvers
//!
//! Formats (filesystems, LVM physical volumes, MD RAID members) are named
//! after the device that carries them. Like device resolvers they form an
//! ordered first-match list; the format kinds never overlap.

use super::resolvers::SystemIdentity;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, FormatKind, StorageEngine};
use std::sync::Arc;
use tracing::debug;

pub const CLASS_LOCAL_FILESYSTEM: &str = "LMI_LocalFileSystem";
pub const CLASS_PV_FORMAT: &str = "LMI_PVFormat";
pub const CLASS_MD_RAID_FORMAT: &str = "LMI_MDRAIDFormat";

/// Every format class
pub const FORMAT_CLASSES: &[&str] = &[CLASS_LOCAL_FILESYSTEM, CLASS_PV_FORMAT, CLASS_MD_RAID_FORMAT];

/// Maps device formats of one kind to CIM names and back
pub trait FormatResolver: Send + Sync {
    fn class_name(&self) -> &'static str;

    fn accepts_name(&self, name: &InstanceName) -> bool {
        name.is_class(self.class_name())
    }

    /// Check whether the device carries a format of this kind
    fn accepts_format(&self, device: &Device) -> bool;

    fn name_for_format(&self, device: &Device) -> InstanceName;

    /// Device carrying the format a name designates
    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>>;
}

pub type FormatResolverRef = Arc<dyn FormatResolver>;

// =============================================================================
// Local Filesystems
// =============================================================================

/// Filesystems, keyed like CIM_FileSystem with `Name = DEVICE=<path>`
#[derive(Debug, Clone)]
pub struct LocalFileSystemResolver {
    identity: SystemIdentity,
}

impl LocalFileSystemResolver {
    pub fn new(identity: SystemIdentity) -> Self {
        Self { identity }
    }
}

impl FormatResolver for LocalFileSystemResolver {
    fn class_name(&self) -> &'static str {
        CLASS_LOCAL_FILESYSTEM
    }

    fn accepts_format(&self, device: &Device) -> bool {
        device.format.as_ref().is_some_and(|f| f.is_filesystem())
    }

    fn name_for_format(&self, device: &Device) -> InstanceName {
        InstanceName::new(CLASS_LOCAL_FILESYSTEM)
            .with_key("CSCreationClassName", self.identity.system_class_name.clone())
            .with_key("CSName", self.identity.system_name.clone())
            .with_key("CreationClassName", CLASS_LOCAL_FILESYSTEM)
            .with_key("Name", format!("DEVICE={}", device.path))
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        let path = name.key_str("Name")?.strip_prefix("DEVICE=")?;
        let device = engine.device(path)?;
        (self.accepts_format(&device) && self.name_for_format(&device).same_instance(name)).then_some(device)
    }
}

// =============================================================================
// InstanceID keyed formats
// =============================================================================

/// Formats keyed by `InstanceID = <prefix>:<class>:<path>`
#[derive(Debug, Clone)]
pub struct InstanceIdFormatResolver {
    identity: SystemIdentity,
    class_name: &'static str,
    matches: fn(&FormatKind) -> bool,
}

impl InstanceIdFormatResolver {
    /// LVM physical volumes
    pub fn physical_volume(identity: SystemIdentity) -> Self {
        Self {
            identity,
            class_name: CLASS_PV_FORMAT,
            matches: |kind| matches!(kind, FormatKind::LvmPv { .. }),
        }
    }

    /// MD RAID members
    pub fn md_member(identity: SystemIdentity) -> Self {
        Self {
            identity,
            class_name: CLASS_MD_RAID_FORMAT,
            matches: |kind| matches!(kind, FormatKind::MdMember { .. }),
        }
    }
}

impl FormatResolver for InstanceIdFormatResolver {
    fn class_name(&self) -> &'static str {
        self.class_name
    }

    fn accepts_format(&self, device: &Device) -> bool {
        device.format.as_ref().is_some_and(|f| (self.matches)(&f.kind))
    }

    fn name_for_format(&self, device: &Device) -> InstanceName {
        InstanceName::with_instance_id(self.class_name, self.identity.instance_id(&[self.class_name, device.path.as_str()]))
    }

    fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        let prefix = self.identity.instance_id(&[self.class_name, ""]);
        let path = name.instance_id()?.strip_prefix(prefix.as_str())?;
        let device = engine.device(path)?;
        self.accepts_format(&device).then_some(device)
    }
}

// =============================================================================
// Format Registry
// =============================================================================

/// Ordered, first-match list of format resolvers
#[derive(Default)]
pub struct FormatRegistry {
    resolvers: Vec<FormatResolverRef>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with filesystem, PV and MD member resolvers
    pub fn with_default_resolvers(identity: SystemIdentity) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalFileSystemResolver::new(identity.clone())));
        registry.register(Arc::new(InstanceIdFormatResolver::physical_volume(identity.clone())));
        registry.register(Arc::new(InstanceIdFormatResolver::md_member(identity)));
        registry
    }

    pub fn register(&mut self, resolver: FormatResolverRef) {
        debug!("Registered format resolver for {}", resolver.class_name());
        self.resolvers.push(resolver);
    }

    pub fn resolvers(&self) -> &[FormatResolverRef] {
        &self.resolvers
    }

    pub fn provider_for_format(&self, device: &Device) -> Option<&FormatResolverRef> {
        self.resolvers.iter().find(|r| r.accepts_format(device))
    }

    pub fn provider_for_name(&self, name: &InstanceName) -> Option<&FormatResolverRef> {
        self.resolvers.iter().find(|r| r.accepts_name(name))
    }

    pub fn name_for_format(&self, device: &Device) -> Option<InstanceName> {
        self.provider_for_format(device).map(|r| r.name_for_format(device))
    }

    pub fn device_for_name(&self, engine: &dyn StorageEngine, name: &InstanceName) -> Option<Arc<Device>> {
        self.provider_for_name(name)?.device_for_name(engine, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{DeviceKind, Format};
    use crate::engine::MemoryEngine;

    fn identity() -> SystemIdentity {
        SystemIdentity {
            system_name: "host.example.com".into(),
            system_class_name: "Linux_ComputerSystem".into(),
            instance_id_prefix: "LMI".into(),
        }
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30).with_format(Format::new(
                FormatKind::Filesystem {
                    fs_type: "ext4".into(),
                },
            )),
            Device::new("/dev/sdb", "sdb", DeviceKind::Disk, 1 << 30)
                .with_format(Format::new(FormatKind::LvmPv { vg_name: None })),
            Device::new("/dev/sdc", "sdc", DeviceKind::Disk, 1 << 30)
                .with_format(Format::new(FormatKind::MdMember { array: None })),
            Device::new("/dev/sdd", "sdd", DeviceKind::Disk, 1 << 30),
        ])
    }

    #[test]
    fn test_format_round_trip() {
        let engine = engine();
        let registry = FormatRegistry::with_default_resolvers(identity());

        for path in ["/dev/sda", "/dev/sdb", "/dev/sdc"] {
            let device = engine.device(path).unwrap();
            let name = registry.name_for_format(&device).unwrap();
            assert_eq!(registry.device_for_name(&engine, &name), Some(device));
        }
    }

    #[test]
    fn test_format_classes() {
        let engine = engine();
        let registry = FormatRegistry::with_default_resolvers(identity());

        let fs = registry.name_for_format(&engine.device("/dev/sda").unwrap()).unwrap();
        assert_eq!(fs.class_name(), CLASS_LOCAL_FILESYSTEM);
        assert_eq!(fs.key_str("Name"), Some("DEVICE=/dev/sda"));

        let pv = registry.name_for_format(&engine.device("/dev/sdb").unwrap()).unwrap();
        assert_eq!(pv.instance_id(), Some("LMI:LMI_PVFormat:/dev/sdb"));

        assert!(registry.name_for_format(&engine.device("/dev/sdd").unwrap()).is_none());
    }

    #[test]
    fn test_format_name_for_unformatted_device() {
        let engine = engine();
        let registry = FormatRegistry::with_default_resolvers(identity());
        let name = InstanceName::with_instance_id(CLASS_PV_FORMAT, "LMI:LMI_PVFormat:/dev/sdd");
        assert!(registry.device_for_name(&engine, &name).is_none());
    }
}
