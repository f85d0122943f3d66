//! Relationship classes
//!
//! Each relation names its endpoint classes and roles and says how to walk
//! from a left object to its counterparts. Everything else is shared by
//! [`super::Association`].

use super::{Association, AssociationSourceRef, Relation};
use crate::catalog::{
    Capability, Setting, SettingType, CLASS_LV_CAPABILITIES, CLASS_LV_SETTING, CLASS_MD_RAID_SETTING,
    CLASS_PARTITION_CAPABILITIES, CLASS_PARTITION_SETTING, CLASS_VG_SETTING,
};
use crate::dispatch::ProviderContext;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, DeviceKind};
use crate::error::{Error, FaultCategory, Result};
use crate::registry::{
    CLASS_DISK_PARTITION, CLASS_GENERIC_DISK_PARTITION, CLASS_LV_EXTENT, CLASS_MD_RAID_EXTENT,
    CLASS_STORAGE_EXTENT, CLASS_VG_POOL, EXTENT_CLASSES, FORMAT_CLASSES,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CLASS_BASED_ON: &str = "LMI_BasedOn";
pub const CLASS_LV_ALLOCATED_FROM_POOL: &str = "LMI_LVAllocatedFromStoragePool";
pub const CLASS_VG_COMPONENT_EXTENT: &str = "LMI_VGAssociatedComponentExtent";
pub const CLASS_HOSTED_STORAGE_POOL: &str = "LMI_HostedStoragePool";
pub const CLASS_SYSTEM_STORAGE_DEVICE: &str = "LMI_SystemStorageDevice";
pub const CLASS_RESIDES_ON_EXTENT: &str = "LMI_ResidesOnExtent";
pub const CLASS_VG_ELEMENT_CAPABILITIES: &str = "LMI_VGElementCapabilities";
pub const CLASS_PARTITION_ELEMENT_CAPABILITIES: &str = "LMI_DiskPartitionElementCapabilities";
pub const CLASS_ELEMENT_SETTING_DATA: &str = "LMI_ElementSettingData";

/// Extents and pools, everything a setting can describe
const MANAGED_ELEMENT_CLASSES: &[&str] = &[
    CLASS_DISK_PARTITION,
    CLASS_GENERIC_DISK_PARTITION,
    CLASS_LV_EXTENT,
    CLASS_MD_RAID_EXTENT,
    CLASS_STORAGE_EXTENT,
    CLASS_VG_POOL,
];

const SETTING_CLASSES: &[&str] = &[
    CLASS_VG_SETTING,
    CLASS_LV_SETTING,
    CLASS_MD_RAID_SETTING,
    CLASS_PARTITION_SETTING,
];

/// CIM ElementCapabilities.Characteristics value "Current"
const CHARACTERISTICS_CURRENT: &str = "3";

fn is_extent(device: &Device) -> bool {
    !device.is_volume_group()
}

fn device_name(ctx: &ProviderContext, device: &Device) -> Result<InstanceName> {
    ctx.name_for_device(device)
        .ok_or_else(|| Error::NoProvider(device.path.clone()))
}

fn resolve_device(
    ctx: &ProviderContext,
    name: &InstanceName,
    accept: fn(&Device) -> bool,
) -> Result<Option<Arc<Device>>> {
    Ok(ctx.device_for_name(name).filter(|device| accept(device)))
}

/// Turn a not-found fault into an absent value, keep every other fault
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.category() == FaultCategory::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn capability_name(capability: &Capability) -> InstanceName {
    InstanceName::with_instance_id(capability.class_name.clone(), capability.instance_id.clone())
}

fn resolve_capability(ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Capability>> {
    let (provider, instance_id) = match (ctx.capabilities_provider_for_class(name.class_name()), name.instance_id()) {
        (Some(provider), Some(instance_id)) => (provider, instance_id),
        _ => return Ok(None),
    };
    found(provider.get(ctx.engine(), instance_id))
}

/// Capability of a given class describing a device
fn capability_of(ctx: &ProviderContext, class_name: &str, device: &Device) -> Result<Vec<Capability>> {
    match ctx.capabilities_provider_for_class(class_name) {
        Some(provider) => Ok(provider
            .capability_for_device(ctx.engine(), device)?
            .into_iter()
            .collect()),
        None => Ok(Vec::new()),
    }
}

// =============================================================================
// Device Topology
// =============================================================================

/// Extent built on a parent extent
#[derive(Debug, Default, Clone)]
pub struct BasedOn;

impl Relation for BasedOn {
    type Left = Arc<Device>;
    type Right = Arc<Device>;

    fn class_name(&self) -> &'static str {
        CLASS_BASED_ON
    }
    fn left_role(&self) -> &'static str {
        "Dependent"
    }
    fn right_role(&self) -> &'static str {
        "Antecedent"
    }
    fn left_classes(&self) -> Vec<&str> {
        EXTENT_CLASSES.to_vec()
    }
    fn right_classes(&self) -> Vec<&str> {
        EXTENT_CLASSES.to_vec()
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx.engine().devices().into_iter().filter(|d| is_extent(d)).collect())
    }

    fn targets(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx.engine().parents(left).into_iter().filter(|d| is_extent(d)).collect())
    }

    fn sources_for(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx.engine().children(right).into_iter().filter(|d| is_extent(d)).collect())
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, left)
    }
    fn right_name(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, right)
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, is_extent)
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, is_extent)
    }

    fn payload(
        &self,
        _ctx: &ProviderContext,
        left: &Arc<Device>,
        _right: &Arc<Device>,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = BTreeMap::new();
        if let DeviceKind::Partition {
            start_sector,
            end_sector,
            ..
        } = left.kind
        {
            properties.insert("StartingAddress".to_string(), Some(start_sector.to_string()));
            properties.insert("EndingAddress".to_string(), Some(end_sector.to_string()));
        }
        Ok(properties)
    }
}

/// Logical volume allocated from its volume group
#[derive(Debug, Default, Clone)]
pub struct LvAllocatedFromStoragePool;

impl Relation for LvAllocatedFromStoragePool {
    type Left = Arc<Device>;
    type Right = Arc<Device>;

    fn class_name(&self) -> &'static str {
        CLASS_LV_ALLOCATED_FROM_POOL
    }
    fn left_role(&self) -> &'static str {
        "Dependent"
    }
    fn right_role(&self) -> &'static str {
        "Antecedent"
    }
    fn left_classes(&self) -> Vec<&str> {
        vec![CLASS_LV_EXTENT]
    }
    fn right_classes(&self) -> Vec<&str> {
        vec![CLASS_VG_POOL]
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .devices()
            .into_iter()
            .filter(|d| d.is_logical_volume())
            .collect())
    }

    fn targets(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .parents(left)
            .into_iter()
            .filter(|d| d.is_volume_group())
            .collect())
    }

    fn sources_for(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .children(right)
            .into_iter()
            .filter(|d| d.is_logical_volume())
            .collect())
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, left)
    }
    fn right_name(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, right)
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, Device::is_logical_volume)
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, Device::is_volume_group)
    }

    fn payload(
        &self,
        _ctx: &ProviderContext,
        left: &Arc<Device>,
        _right: &Arc<Device>,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = BTreeMap::new();
        properties.insert("SpaceConsumed".to_string(), Some(left.size_bytes.to_string()));
        Ok(properties)
    }
}

/// Volume group and the physical volumes it is built from
#[derive(Debug, Default, Clone)]
pub struct VgAssociatedComponentExtent;

impl Relation for VgAssociatedComponentExtent {
    type Left = Arc<Device>;
    type Right = Arc<Device>;

    fn class_name(&self) -> &'static str {
        CLASS_VG_COMPONENT_EXTENT
    }
    fn left_role(&self) -> &'static str {
        "GroupComponent"
    }
    fn right_role(&self) -> &'static str {
        "PartComponent"
    }
    fn left_classes(&self) -> Vec<&str> {
        vec![CLASS_VG_POOL]
    }
    fn right_classes(&self) -> Vec<&str> {
        EXTENT_CLASSES.to_vec()
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .devices()
            .into_iter()
            .filter(|d| d.is_volume_group())
            .collect())
    }

    fn targets(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx.engine().parents(left))
    }

    fn sources_for(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .children(right)
            .into_iter()
            .filter(|d| d.is_volume_group())
            .collect())
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, left)
    }
    fn right_name(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, right)
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, Device::is_volume_group)
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, is_extent)
    }
}

// =============================================================================
// Hosting System
// =============================================================================

/// Volume groups hosted on this system
#[derive(Debug, Clone)]
pub struct HostedStoragePool {
    system_class: String,
}

impl HostedStoragePool {
    pub fn new(system_class: impl Into<String>) -> Self {
        Self {
            system_class: system_class.into(),
        }
    }
}

impl Relation for HostedStoragePool {
    type Left = InstanceName;
    type Right = Arc<Device>;

    fn class_name(&self) -> &'static str {
        CLASS_HOSTED_STORAGE_POOL
    }
    fn left_role(&self) -> &'static str {
        "GroupComponent"
    }
    fn right_role(&self) -> &'static str {
        "PartComponent"
    }
    fn left_classes(&self) -> Vec<&str> {
        vec![self.system_class.as_str()]
    }
    fn right_classes(&self) -> Vec<&str> {
        vec![CLASS_VG_POOL]
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<InstanceName>> {
        Ok(vec![ctx.system_name()])
    }

    fn targets(&self, ctx: &ProviderContext, _left: &InstanceName) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .devices()
            .into_iter()
            .filter(|d| d.is_volume_group())
            .collect())
    }

    fn sources_for(&self, ctx: &ProviderContext, _right: &Arc<Device>) -> Result<Vec<InstanceName>> {
        Ok(vec![ctx.system_name()])
    }

    fn left_name(&self, _ctx: &ProviderContext, left: &InstanceName) -> Result<InstanceName> {
        Ok(left.clone())
    }
    fn right_name(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, right)
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<InstanceName>> {
        Ok(ctx.identity().is_system(name).then(|| name.clone()))
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, Device::is_volume_group)
    }
}

/// Every extent of this system
#[derive(Debug, Clone)]
pub struct SystemStorageDevice {
    system_class: String,
}

impl SystemStorageDevice {
    pub fn new(system_class: impl Into<String>) -> Self {
        Self {
            system_class: system_class.into(),
        }
    }
}

impl Relation for SystemStorageDevice {
    type Left = InstanceName;
    type Right = Arc<Device>;

    fn class_name(&self) -> &'static str {
        CLASS_SYSTEM_STORAGE_DEVICE
    }
    fn left_role(&self) -> &'static str {
        "GroupComponent"
    }
    fn right_role(&self) -> &'static str {
        "PartComponent"
    }
    fn left_classes(&self) -> Vec<&str> {
        vec![self.system_class.as_str()]
    }
    fn right_classes(&self) -> Vec<&str> {
        EXTENT_CLASSES.to_vec()
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<InstanceName>> {
        Ok(vec![ctx.system_name()])
    }

    fn targets(&self, ctx: &ProviderContext, _left: &InstanceName) -> Result<Vec<Arc<Device>>> {
        Ok(ctx.engine().devices().into_iter().filter(|d| is_extent(d)).collect())
    }

    fn sources_for(&self, ctx: &ProviderContext, _right: &Arc<Device>) -> Result<Vec<InstanceName>> {
        Ok(vec![ctx.system_name()])
    }

    fn left_name(&self, _ctx: &ProviderContext, left: &InstanceName) -> Result<InstanceName> {
        Ok(left.clone())
    }
    fn right_name(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, right)
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<InstanceName>> {
        Ok(ctx.identity().is_system(name).then(|| name.clone()))
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, is_extent)
    }
}

// =============================================================================
// Formats
// =============================================================================

/// Format and the extent it is written on
#[derive(Debug, Default, Clone)]
pub struct ResidesOnExtent;

impl Relation for ResidesOnExtent {
    type Left = Arc<Device>;
    type Right = Arc<Device>;

    fn class_name(&self) -> &'static str {
        CLASS_RESIDES_ON_EXTENT
    }
    fn left_role(&self) -> &'static str {
        "Dependent"
    }
    fn right_role(&self) -> &'static str {
        "Antecedent"
    }
    fn left_classes(&self) -> Vec<&str> {
        FORMAT_CLASSES.to_vec()
    }
    fn right_classes(&self) -> Vec<&str> {
        EXTENT_CLASSES.to_vec()
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .devices()
            .into_iter()
            .filter(|d| ctx.formats().provider_for_format(d).is_some())
            .collect())
    }

    fn targets(&self, _ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(vec![left.clone()])
    }

    fn sources_for(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .formats()
            .provider_for_format(right)
            .map(|_| right.clone())
            .into_iter()
            .collect())
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        ctx.formats()
            .name_for_format(left)
            .ok_or_else(|| Error::NoProvider(format!("format on {}", left.path)))
    }
    fn right_name(&self, ctx: &ProviderContext, right: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, right)
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        Ok(ctx.formats().device_for_name(ctx.engine(), name))
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, is_extent)
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Volume group and the capabilities of logical volumes allocated from it
#[derive(Debug, Default, Clone)]
pub struct VgElementCapabilities;

impl Relation for VgElementCapabilities {
    type Left = Arc<Device>;
    type Right = Capability;

    fn class_name(&self) -> &'static str {
        CLASS_VG_ELEMENT_CAPABILITIES
    }
    fn left_role(&self) -> &'static str {
        "ManagedElement"
    }
    fn right_role(&self) -> &'static str {
        "Capabilities"
    }
    fn left_classes(&self) -> Vec<&str> {
        vec![CLASS_VG_POOL]
    }
    fn right_classes(&self) -> Vec<&str> {
        vec![CLASS_LV_CAPABILITIES]
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .devices()
            .into_iter()
            .filter(|d| d.is_volume_group())
            .collect())
    }

    fn targets(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Capability>> {
        capability_of(ctx, CLASS_LV_CAPABILITIES, left)
    }

    fn sources_for(&self, ctx: &ProviderContext, right: &Capability) -> Result<Vec<Arc<Device>>> {
        Ok(right
            .element
            .as_deref()
            .and_then(|path| ctx.engine().device(path))
            .filter(|d| d.is_volume_group())
            .into_iter()
            .collect())
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, left)
    }
    fn right_name(&self, _ctx: &ProviderContext, right: &Capability) -> Result<InstanceName> {
        Ok(capability_name(right))
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, Device::is_volume_group)
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Capability>> {
        resolve_capability(ctx, name)
    }

    fn payload(
        &self,
        _ctx: &ProviderContext,
        _left: &Arc<Device>,
        _right: &Capability,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = BTreeMap::new();
        properties.insert(
            "Characteristics".to_string(),
            Some(CHARACTERISTICS_CURRENT.to_string()),
        );
        Ok(properties)
    }
}

/// Partitionable device and the capabilities of its partition table
#[derive(Debug, Default, Clone)]
pub struct DiskPartitionElementCapabilities;

impl Relation for DiskPartitionElementCapabilities {
    type Left = Arc<Device>;
    type Right = Capability;

    fn class_name(&self) -> &'static str {
        CLASS_PARTITION_ELEMENT_CAPABILITIES
    }
    fn left_role(&self) -> &'static str {
        "ManagedElement"
    }
    fn right_role(&self) -> &'static str {
        "Capabilities"
    }
    fn left_classes(&self) -> Vec<&str> {
        EXTENT_CLASSES.to_vec()
    }
    fn right_classes(&self) -> Vec<&str> {
        vec![CLASS_PARTITION_CAPABILITIES]
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx.engine().devices().into_iter().filter(|d| is_extent(d)).collect())
    }

    fn targets(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Capability>> {
        capability_of(ctx, CLASS_PARTITION_CAPABILITIES, left)
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, left)
    }
    fn right_name(&self, _ctx: &ProviderContext, right: &Capability) -> Result<InstanceName> {
        Ok(capability_name(right))
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        resolve_device(ctx, name, is_extent)
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Capability>> {
        resolve_capability(ctx, name)
    }

    fn payload(
        &self,
        _ctx: &ProviderContext,
        _left: &Arc<Device>,
        _right: &Capability,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = BTreeMap::new();
        properties.insert(
            "Characteristics".to_string(),
            Some(CHARACTERISTICS_CURRENT.to_string()),
        );
        Ok(properties)
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Device and the CONFIGURATION settings describing it
#[derive(Debug, Default, Clone)]
pub struct ElementSettingData;

impl Relation for ElementSettingData {
    type Left = Arc<Device>;
    type Right = Setting;

    fn class_name(&self) -> &'static str {
        CLASS_ELEMENT_SETTING_DATA
    }
    fn left_role(&self) -> &'static str {
        "ManagedElement"
    }
    fn right_role(&self) -> &'static str {
        "SettingData"
    }
    fn left_classes(&self) -> Vec<&str> {
        MANAGED_ELEMENT_CLASSES.to_vec()
    }
    fn right_classes(&self) -> Vec<&str> {
        SETTING_CLASSES.to_vec()
    }

    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Arc<Device>>> {
        Ok(ctx
            .engine()
            .devices()
            .into_iter()
            .filter(|d| ctx.setting_sources().iter().any(|s| s.accepts_device(d)))
            .collect())
    }

    fn targets(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<Vec<Setting>> {
        ctx.setting_sources()
            .iter()
            .filter(|source| source.accepts_device(left))
            .map(|source| source.configuration_for(ctx.prefix(), ctx.engine(), left))
            .collect()
    }

    fn sources_for(&self, ctx: &ProviderContext, right: &Setting) -> Result<Vec<Arc<Device>>> {
        let device = ctx
            .setting_source_for_class(&right.class_name)
            .and_then(|source| source.configuration_path(ctx.prefix(), &right.instance_id))
            .and_then(|path| ctx.engine().device(path));
        Ok(device.into_iter().collect())
    }

    fn left_name(&self, ctx: &ProviderContext, left: &Arc<Device>) -> Result<InstanceName> {
        device_name(ctx, left)
    }
    fn right_name(&self, _ctx: &ProviderContext, right: &Setting) -> Result<InstanceName> {
        Ok(right.instance_name())
    }

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Arc<Device>>> {
        Ok(ctx
            .device_for_name(name)
            .filter(|d| ctx.setting_sources().iter().any(|s| s.accepts_device(d))))
    }
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Setting>> {
        let instance_id = match name.instance_id() {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(found(ctx.setting_for_id(instance_id))?
            .filter(|s| s.setting_type == SettingType::Configuration && name.is_class(&s.class_name)))
    }

    fn payload(
        &self,
        _ctx: &ProviderContext,
        _left: &Arc<Device>,
        _right: &Setting,
    ) -> Result<BTreeMap<String, Option<String>>> {
        let mut properties = BTreeMap::new();
        properties.insert("IsCurrent".to_string(), Some("1".to_string()));
        Ok(properties)
    }
}

/// Every built-in relationship class
pub fn default_associations(system_class: &str) -> Vec<AssociationSourceRef> {
    vec![
        Arc::new(Association::new(BasedOn)),
        Arc::new(Association::new(LvAllocatedFromStoragePool)),
        Arc::new(Association::new(VgAssociatedComponentExtent)),
        Arc::new(Association::new(HostedStoragePool::new(system_class))),
        Arc::new(Association::new(SystemStorageDevice::new(system_class))),
        Arc::new(Association::new(ResidesOnExtent)),
        Arc::new(Association::new(VgElementCapabilities)),
        Arc::new(Association::new(DiskPartitionElementCapabilities)),
        Arc::new(Association::new(ElementSettingData)),
    ]
}
