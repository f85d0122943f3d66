//! Provider Dispatch Table
//!
//! The [`ProviderContext`] is built once at startup and passed by reference
//! to every request handler. It owns the ordered resolver lists, the
//! setting catalog, the relationship classes, the service providers and
//! the indication queue, and answers every lookup the handlers need.

use crate::association::{default_associations, AssociationRecord, AssociationSourceRef};
use crate::catalog::{
    default_capabilities_providers, default_setting_sources, CapabilitiesProviderRef, Setting, SettingChange,
    SettingGoal, SettingManager, SettingSourceRef, SettingType,
};
use crate::config::ProviderConfig;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, StorageEngine, StorageEngineRef};
use crate::error::{Error, Result};
use crate::indication::{IndicationKind, IndicationQueue};
use crate::metrics::ProviderMetrics;
use crate::redundancy::redundancy_for_device;
use crate::registry::{DeviceRegistry, FormatRegistry, NameResolverRef, SystemIdentity, FORMAT_CLASSES};
use crate::services::{default_services, ServiceProviderRef};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A CIM instance as handed to the protocol layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub name: InstanceName,
    /// Non-key properties; empty when keys only were requested
    pub properties: BTreeMap<String, Option<String>>,
}

impl Instance {
    pub fn new(name: InstanceName) -> Self {
        Self {
            name,
            properties: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`ProviderContext`]; lists left empty get the built-in entries
pub struct ProviderContextBuilder {
    config: ProviderConfig,
    engine: Option<StorageEngineRef>,
    resolvers: Vec<NameResolverRef>,
    setting_sources: Vec<SettingSourceRef>,
    capabilities: Vec<CapabilitiesProviderRef>,
    associations: Vec<AssociationSourceRef>,
    services: Vec<ServiceProviderRef>,
}

impl ProviderContextBuilder {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            engine: None,
            resolvers: Vec::new(),
            setting_sources: Vec::new(),
            capabilities: Vec::new(),
            associations: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn engine(mut self, engine: StorageEngineRef) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Append a name resolver; order decides which one wins
    pub fn resolver(mut self, resolver: NameResolverRef) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn setting_source(mut self, source: SettingSourceRef) -> Self {
        self.setting_sources.push(source);
        self
    }

    pub fn capabilities_provider(mut self, provider: CapabilitiesProviderRef) -> Self {
        self.capabilities.push(provider);
        self
    }

    pub fn association(mut self, association: AssociationSourceRef) -> Self {
        self.associations.push(association);
        self
    }

    pub fn service(mut self, service: ServiceProviderRef) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> Result<ProviderContext> {
        self.config.validate()?;
        let engine = self
            .engine
            .ok_or_else(|| Error::Configuration("a storage engine is required".into()))?;

        let identity = SystemIdentity::from_config(&self.config);
        let prefix = self.config.instance_id_prefix.as_str();

        let devices = if self.resolvers.is_empty() {
            DeviceRegistry::with_default_resolvers(identity.clone())
        } else {
            let mut registry = DeviceRegistry::new();
            for resolver in self.resolvers {
                registry.register(resolver);
            }
            registry
        };
        let setting_sources = if self.setting_sources.is_empty() {
            default_setting_sources()
        } else {
            self.setting_sources
        };
        let capabilities = if self.capabilities.is_empty() {
            default_capabilities_providers(prefix)
        } else {
            self.capabilities
        };
        let associations = if self.associations.is_empty() {
            default_associations(&self.config.system_class_name)
        } else {
            self.associations
        };
        let services = if self.services.is_empty() {
            default_services()
        } else {
            self.services
        };

        info!(
            system = %identity.system_name,
            device_classes = devices.class_names().len(),
            setting_classes = setting_sources.len(),
            capability_classes = capabilities.len(),
            associations = associations.len(),
            services = services.len(),
            "Provider context built"
        );

        Ok(ProviderContext {
            settings: SettingManager::from_config(&self.config),
            formats: FormatRegistry::with_default_resolvers(identity.clone()),
            identity,
            config: self.config,
            engine,
            devices,
            setting_sources,
            capabilities,
            associations,
            services,
            indications: IndicationQueue::new(),
            metrics: Arc::new(ProviderMetrics::new()),
        })
    }
}

// =============================================================================
// Provider Context
// =============================================================================

/// Everything a request handler needs, built once per process
pub struct ProviderContext {
    config: ProviderConfig,
    identity: SystemIdentity,
    engine: StorageEngineRef,
    devices: DeviceRegistry,
    formats: FormatRegistry,
    settings: SettingManager,
    setting_sources: Vec<SettingSourceRef>,
    capabilities: Vec<CapabilitiesProviderRef>,
    associations: Vec<AssociationSourceRef>,
    services: Vec<ServiceProviderRef>,
    indications: IndicationQueue,
    metrics: Arc<ProviderMetrics>,
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("identity", &self.identity)
            .field("devices", &self.devices)
            .field("settings", &self.settings)
            .field("associations", &self.associations.len())
            .field("services", &self.services.len())
            .finish()
    }
}

impl ProviderContext {
    pub fn builder(config: ProviderConfig) -> ProviderContextBuilder {
        ProviderContextBuilder::new(config)
    }

    /// Context with every built-in resolver, class and service
    pub fn with_defaults(config: ProviderConfig, engine: StorageEngineRef) -> Result<Self> {
        Self::builder(config).engine(engine).build()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn identity(&self) -> &SystemIdentity {
        &self.identity
    }

    pub fn prefix(&self) -> &str {
        &self.identity.instance_id_prefix
    }

    pub fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub fn settings(&self) -> &SettingManager {
        &self.settings
    }

    pub fn setting_sources(&self) -> &[SettingSourceRef] {
        &self.setting_sources
    }

    pub fn capabilities_providers(&self) -> &[CapabilitiesProviderRef] {
        &self.capabilities
    }

    pub fn associations(&self) -> &[AssociationSourceRef] {
        &self.associations
    }

    pub fn service_providers(&self) -> &[ServiceProviderRef] {
        &self.services
    }

    pub fn indications(&self) -> &IndicationQueue {
        &self.indications
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    /// Name of the hosting computer system
    pub fn system_name(&self) -> InstanceName {
        self.identity.system_instance_name()
    }

    /// Load stored settings of every setting class
    pub fn load_settings(&self) -> Result<usize> {
        self.settings
            .load(self.setting_sources.iter().map(|source| source.class_name()))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn provider_for_device(&self, device: &Device) -> Option<&NameResolverRef> {
        self.devices.provider_for_device(device)
    }

    pub fn name_for_device(&self, device: &Device) -> Option<InstanceName> {
        self.devices.name_for_device(device)
    }

    pub fn device_for_name(&self, name: &InstanceName) -> Option<Arc<Device>> {
        self.devices.device_for_name(self.engine(), name)
    }

    /// Resolve a name that must designate a device
    pub fn require_device(&self, name: &InstanceName) -> Result<Arc<Device>> {
        self.device_for_name(name).ok_or_else(|| Error::DeviceNotFound {
            device: name.to_string(),
        })
    }

    pub fn capabilities_provider_for_class(&self, class_name: &str) -> Option<&CapabilitiesProviderRef> {
        self.capabilities
            .iter()
            .find(|provider| provider.class_name().eq_ignore_ascii_case(class_name))
    }

    pub fn setting_source_for_class(&self, class_name: &str) -> Option<&SettingSourceRef> {
        self.setting_sources
            .iter()
            .find(|source| source.class_name().eq_ignore_ascii_case(class_name))
    }

    pub fn service_for_class(&self, class_name: &str) -> Option<&ServiceProviderRef> {
        self.services
            .iter()
            .find(|service| service.class_name().eq_ignore_ascii_case(class_name))
    }

    pub fn association_for_class(&self, class_name: &str) -> Option<&AssociationSourceRef> {
        self.associations
            .iter()
            .find(|association| association.class_name().eq_ignore_ascii_case(class_name))
    }

    /// Setting by InstanceID: stored settings first, then the CONFIGURATION
    /// setting of a live device
    pub fn setting_for_id(&self, instance_id: &str) -> Result<Setting> {
        if let Some(setting) = self.settings.find(instance_id) {
            return Ok(setting);
        }
        for source in &self.setting_sources {
            if let Some(path) = source.configuration_path(self.prefix(), instance_id) {
                let device = self.engine.device(path).ok_or_else(|| Error::DeviceNotFound {
                    device: path.to_string(),
                })?;
                return source.configuration_for(self.prefix(), self.engine(), &device);
            }
        }
        Err(Error::NotFound(format!("setting {}", instance_id)))
    }

    /// Stored setting of a class that must exist
    pub fn require_setting(&self, class_name: &str, instance_id: &str) -> Result<Setting> {
        let setting = self.setting_for_id(instance_id)?;
        if !setting.class_name.eq_ignore_ascii_case(class_name) {
            return Err(Error::invalid(
                "Goal",
                format!("{} is not a {}", instance_id, class_name),
            ));
        }
        Ok(setting)
    }

    /// Emit an indication about an instance
    pub fn notify(&self, kind: IndicationKind, source: InstanceName) {
        self.metrics.record_indication();
        self.indications.enqueue(kind, source);
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Every instance of a class
    pub fn enumerate_instances(&self, class_name: &str, keys_only: bool) -> Result<Vec<Instance>> {
        self.metrics.record_enumeration();
        let result = self.collect_instances(class_name, keys_only);
        self.metrics.observe(result)
    }

    /// One instance by name
    pub fn get_instance(&self, name: &InstanceName) -> Result<Instance> {
        self.metrics.record_get();
        let result = if self.is_device_class(name.class_name()) {
            self.device_for_name(name)
                .and_then(|device| self.name_for_device(&device).map(|canonical| (device, canonical)))
                .filter(|(_, canonical)| canonical.is_class(name.class_name()))
                .ok_or_else(|| Error::NotFound(name.to_string()))
                .and_then(|(device, canonical)| self.device_instance(&device, canonical))
        } else {
            self.collect_instances(name.class_name(), false)
                .and_then(|instances| {
                    instances
                        .into_iter()
                        .find(|instance| instance.name.same_instance(name))
                        .ok_or_else(|| Error::NotFound(name.to_string()))
                })
        };
        self.metrics.observe(result)
    }

    fn is_device_class(&self, class_name: &str) -> bool {
        self.devices
            .class_names()
            .iter()
            .any(|class| class.eq_ignore_ascii_case(class_name))
    }

    fn collect_instances(&self, class_name: &str, keys_only: bool) -> Result<Vec<Instance>> {
        debug!("Enumerating instances of {}", class_name);

        if self.is_device_class(class_name) {
            return self
                .engine
                .devices()
                .into_iter()
                .filter_map(|device| self.name_for_device(&device).map(|name| (device, name)))
                .filter(|(_, name)| name.is_class(class_name))
                .map(|(device, name)| {
                    if keys_only {
                        Ok(Instance::new(name))
                    } else {
                        self.device_instance(&device, name)
                    }
                })
                .collect();
        }

        if FORMAT_CLASSES.iter().any(|class| class.eq_ignore_ascii_case(class_name)) {
            return Ok(self
                .engine
                .devices()
                .iter()
                .filter_map(|device| {
                    let name = self.formats.name_for_format(device)?;
                    if !name.is_class(class_name) {
                        return None;
                    }
                    let mut instance = Instance::new(name);
                    if let (false, Some(format)) = (keys_only, &device.format) {
                        instance
                            .properties
                            .insert("ElementName".to_string(), Some(device.name.clone()));
                        instance.properties.insert("UUID".to_string(), format.uuid.clone());
                    }
                    Some(instance)
                })
                .collect());
        }

        if let Some(provider) = self.capabilities_provider_for_class(class_name) {
            return Ok(provider
                .enumerate(self.engine())?
                .into_iter()
                .map(|capability| {
                    let mut instance = Instance::new(InstanceName::with_instance_id(
                        capability.class_name.clone(),
                        capability.instance_id.clone(),
                    ));
                    if !keys_only {
                        instance.properties = capability.properties;
                        instance
                            .properties
                            .insert("ElementName".to_string(), Some(capability.element_name));
                    }
                    instance
                })
                .collect());
        }

        if self.setting_source_for_class(class_name).is_some() {
            return Ok(self
                .enumerate_settings(class_name)?
                .into_iter()
                .map(|setting| {
                    let mut instance = Instance::new(setting.instance_name());
                    if !keys_only {
                        instance.properties = setting.properties;
                        instance
                            .properties
                            .insert("ElementName".to_string(), setting.element_name);
                        instance.properties.insert(
                            "ChangeableType".to_string(),
                            Some(setting.setting_type.changeable_type().to_string()),
                        );
                    }
                    instance
                })
                .collect());
        }

        if let Some(service) = self.service_for_class(class_name) {
            return Ok(vec![Instance::new(service.instance_name(self))]);
        }

        Err(Error::NotSupported(format!("class {}", class_name)))
    }

    fn device_instance(&self, device: &Device, name: InstanceName) -> Result<Instance> {
        let mut properties = redundancy_for_device(self.engine(), device)?.to_properties();
        properties.insert("ElementName".to_string(), Some(device.name.clone()));
        properties.insert("Name".to_string(), Some(device.path.clone()));
        if device.is_volume_group() {
            let used: u64 = self.engine.children(device).iter().map(|d| d.size_bytes).sum();
            properties.insert("TotalManagedSpace".to_string(), Some(device.size_bytes.to_string()));
            properties.insert(
                "RemainingManagedSpace".to_string(),
                Some(device.size_bytes.saturating_sub(used).to_string()),
            );
        } else {
            properties.insert("BlockSize".to_string(), Some(device.block_size.to_string()));
            properties.insert("NumberOfBlocks".to_string(), Some(device.block_count().to_string()));
        }
        Ok(Instance { name, properties })
    }

    // =========================================================================
    // Associations
    // =========================================================================

    /// Every record of a relationship class
    pub fn enumerate_associations(&self, class_name: &str, keys_only: bool) -> Result<Vec<AssociationRecord>> {
        self.metrics.record_enumeration();
        let result = self
            .association_for_class(class_name)
            .ok_or_else(|| Error::NotSupported(format!("relationship class {}", class_name)))
            .and_then(|association| association.enumerate(self, keys_only)?.collect());
        self.metrics.observe(result)
    }

    /// Records of every relationship class referencing an object, optionally
    /// restricted to those whose opposite side is of `result_class`
    pub fn references(&self, object: &InstanceName, result_class: Option<&str>) -> Result<Vec<AssociationRecord>> {
        self.metrics.record_enumeration();
        let mut records = Vec::new();
        let result = (|| -> Result<_> {
            for association in &self.associations {
                if let Some(iter) = association.references_for(self, object, result_class) {
                    for record in iter? {
                        records.push(record?);
                    }
                }
            }
            Ok(())
        })();
        self.metrics.observe(result)?;

        // Endpoint class lists are coarse; keep records whose counterpart really is of the class
        if let Some(class) = result_class {
            records.retain(|record| {
                let opposite = if record.left == *object { &record.right } else { &record.left };
                opposite.is_class(class)
            });
        }
        debug!("{} references to {}", records.len(), object);
        Ok(records)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Stored settings of a class followed by the CONFIGURATION settings of
    /// the devices the class describes
    pub fn enumerate_settings(&self, class_name: &str) -> Result<Vec<Setting>> {
        let source = self
            .setting_source_for_class(class_name)
            .ok_or_else(|| Error::NotSupported(format!("setting class {}", class_name)))?;

        let mut settings = self.settings.enumerate_settings(source.class_name());
        for device in self.engine.devices() {
            if source.accepts_device(&device) {
                settings.push(source.configuration_for(self.prefix(), self.engine(), &device)?);
            }
        }
        Ok(settings)
    }

    /// Derive a TRANSIENT setting from a capability
    pub fn create_setting_from_capability(
        &self,
        capability: &InstanceName,
        goal: SettingGoal,
    ) -> Result<Setting> {
        self.metrics.record_setting_change();
        let result = (|| -> Result<_> {
            let provider = self
                .capabilities_provider_for_class(capability.class_name())
                .ok_or_else(|| Error::NotSupported(format!("capabilities class {}", capability.class_name())))?;
            let instance_id = capability
                .instance_id()
                .ok_or_else(|| Error::InvalidObjectPath(capability.to_string()))?;
            let capability = provider.get(self.engine(), instance_id)?;
            let setting = provider.create_setting(self.engine(), &self.settings, &capability, goal)?;
            self.notify(IndicationKind::Creation, setting.instance_name());
            Ok(setting)
        })();
        self.metrics.observe(result)
    }

    /// Validate and apply a change to a stored setting
    pub fn modify_setting(&self, class_name: &str, instance_id: &str, change: SettingChange) -> Result<Setting> {
        self.metrics.record_setting_change();
        let result = (|| -> Result<_> {
            let source = self
                .setting_source_for_class(class_name)
                .ok_or_else(|| Error::NotSupported(format!("setting class {}", class_name)))?;
            let current = self.setting_for_id(instance_id)?;
            if current.setting_type == SettingType::Configuration {
                return Err(Error::ReadOnlySetting {
                    instance_id: instance_id.to_string(),
                    setting_type: SettingType::Configuration.to_string(),
                });
            }
            source.validate_change(&current.properties, &change.properties)?;
            let setting = self.settings.modify_setting(source.class_name(), instance_id, change)?;
            self.notify(IndicationKind::Modification, setting.instance_name());
            Ok(setting)
        })();
        self.metrics.observe(result)
    }

    pub fn delete_setting(&self, class_name: &str, instance_id: &str) -> Result<()> {
        self.metrics.record_setting_change();
        let result = (|| -> Result<_> {
            let source = self
                .setting_source_for_class(class_name)
                .ok_or_else(|| Error::NotSupported(format!("setting class {}", class_name)))?;
            if source.configuration_path(self.prefix(), instance_id).is_some() {
                return Err(Error::ReadOnlySetting {
                    instance_id: instance_id.to_string(),
                    setting_type: SettingType::Configuration.to_string(),
                });
            }
            self.settings.delete_setting(source.class_name(), instance_id)?;
            self.notify(
                IndicationKind::Deletion,
                InstanceName::with_instance_id(source.class_name(), instance_id),
            );
            Ok(())
        })();
        self.metrics.observe(result)
    }

    // =========================================================================
    // Methods
    // =========================================================================

    /// Invoke a service method with JSON parameters
    pub fn invoke(&self, class_name: &str, method: &str, params: &Value) -> Result<Value> {
        self.metrics.record_invocation();
        let result = self
            .service_for_class(class_name)
            .ok_or_else(|| Error::NotSupported(format!("service class {}", class_name)))
            .and_then(|service| {
                info!("Invoking {}.{}", service.class_name(), method);
                service.invoke(self, method, params)
            });
        self.metrics.observe(result)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_context;
    use super::*;
    use crate::catalog::{CLASS_LV_CAPABILITIES, CLASS_VG_SETTING};
    use crate::error::FaultCategory;
    use crate::domain::ports::DeviceKind;
    use crate::engine::MemoryEngine;
    use crate::registry::{CLASS_LV_EXTENT, CLASS_MD_RAID_EXTENT, CLASS_VG_POOL};
    use assert_matches::assert_matches;

    #[test]
    fn test_build_requires_engine() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = ProviderContext::builder(ProviderConfig::with_state_root(dir.path())).build();
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_class_lookups_ignore_case() {
        let (_dir, ctx) = sample_context();
        assert!(ctx.capabilities_provider_for_class("lmi_lvstoragecapabilities").is_some());
        assert!(ctx.setting_source_for_class("LMI_VGSTORAGESETTING").is_some());
        assert!(ctx.association_for_class("lmi_basedon").is_some());
        assert!(ctx.service_for_class("LMI_StorageConfigurationService").is_some());
        assert!(ctx.association_for_class("LMI_Nothing").is_none());
    }

    #[test]
    fn test_enumerate_device_instances() {
        let (_dir, ctx) = sample_context();
        let lvs = ctx.enumerate_instances(CLASS_LV_EXTENT, false).unwrap();
        assert_eq!(lvs.len(), 2);
        assert!(lvs.iter().all(|lv| lv.properties.contains_key("DataRedundancy")));

        let pools = ctx.enumerate_instances(CLASS_VG_POOL, true).unwrap();
        assert_eq!(pools.len(), 1);
        assert!(pools[0].properties.is_empty());

        let pool = ctx.get_instance(&pools[0].name).unwrap();
        assert_eq!(
            pool.properties.get("RemainingManagedSpace"),
            Some(&Some((5u64 << 30).to_string()))
        );

        assert_matches!(
            ctx.enumerate_instances("LMI_Unknown", false),
            Err(Error::NotSupported(_))
        );
        assert_eq!(ctx.metrics().snapshot().faults_not_supported, 1);
    }

    #[test]
    fn test_get_instance_ignores_broken_siblings() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut devices = fixtures::sample_devices();
        devices.extend([
            Device::new("/dev/sdg", "sdg", DeviceKind::Disk, 8 << 30),
            Device::new("/dev/sdh", "sdh", DeviceKind::Disk, 8 << 30),
            Device::new(
                "/dev/md/odd",
                "odd",
                DeviceKind::MdRaid {
                    level: "raid7".to_string(),
                },
                8 << 30,
            )
            .with_parents(["/dev/sdg", "/dev/sdh"]),
        ]);
        let engine: StorageEngineRef = Arc::new(MemoryEngine::from_devices(devices));
        let ctx = ProviderContext::with_defaults(ProviderConfig::with_state_root(dir.path()), engine).unwrap();

        assert!(ctx.enumerate_instances(CLASS_MD_RAID_EXTENT, false).is_err());

        let data = ctx
            .name_for_device(&ctx.engine().device("/dev/md/data").unwrap())
            .unwrap();
        let instance = ctx.get_instance(&data).unwrap();
        assert_eq!(instance.name, data);
        assert!(instance.properties.contains_key("DataRedundancy"));

        let mut lower = data.clone();
        lower.class_name = CLASS_MD_RAID_EXTENT.to_ascii_lowercase();
        assert_eq!(ctx.get_instance(&lower).unwrap().name, data);

        // Right device, wrong class
        let mut wrong = data.clone();
        wrong.class_name = CLASS_LV_EXTENT.to_string();
        assert_matches!(ctx.get_instance(&wrong), Err(Error::NotFound(_)));
    }

    #[test]
    fn test_partial_modify_keeps_ranges_ordered() {
        let (_dir, ctx) = sample_context();
        let capability = InstanceName::with_instance_id(CLASS_LV_CAPABILITIES, "LMI:LMI_LVStorageCapabilities:vg0");
        let setting = ctx
            .create_setting_from_capability(&capability, SettingGoal::Default)
            .unwrap();

        let mut change = SettingChange::default();
        for key in ["DataRedundancyMin", "DataRedundancyGoal", "DataRedundancyMax"] {
            change.properties.insert(key.to_string(), Some("2".to_string()));
        }
        ctx.modify_setting(&setting.class_name, &setting.instance_id, change)
            .unwrap();

        let mut change = SettingChange::default();
        change
            .properties
            .insert("DataRedundancyGoal".to_string(), Some("1".to_string()));
        assert_matches!(
            ctx.modify_setting(&setting.class_name, &setting.instance_id, change),
            Err(Error::InvalidParameter { .. })
        );
        let stored = ctx.setting_for_id(&setting.instance_id).unwrap();
        assert_eq!(stored.property("DataRedundancyGoal"), Some("2"));
    }

    #[test]
    fn test_setting_for_id_synthesizes_configuration() {
        let (_dir, ctx) = sample_context();
        let setting = ctx.setting_for_id("LMI:LMI_VGStorageSetting:dev:/dev/vg0").unwrap();
        assert_eq!(setting.setting_type, SettingType::Configuration);
        assert_eq!(setting.property("ExtentSize"), Some("4194304"));

        let missing = ctx.setting_for_id("LMI:LMI_VGStorageSetting:dev:/dev/vg9");
        assert_eq!(missing.unwrap_err().category(), FaultCategory::NotFound);
        assert!(ctx.setting_for_id("LMI:LMI_VGStorageSetting:42").is_err());
    }

    #[test]
    fn test_setting_lifecycle_through_context() {
        let (_dir, ctx) = sample_context();
        let capability = InstanceName::with_instance_id(CLASS_LV_CAPABILITIES, "LMI:LMI_LVStorageCapabilities:vg0");
        let setting = ctx
            .create_setting_from_capability(&capability, SettingGoal::Default)
            .unwrap();
        assert_eq!(setting.setting_type, SettingType::Transient);

        let mut change = SettingChange::default();
        change
            .properties
            .insert("DataRedundancyGoal".to_string(), Some("0".to_string()));
        assert_eq!(
            ctx.modify_setting(&setting.class_name, &setting.instance_id, change)
                .unwrap_err()
                .category(),
            FaultCategory::InvalidParameter
        );

        let mut change = SettingChange::default();
        change.setting_type = Some(SettingType::Persistent);
        let modified = ctx
            .modify_setting(&setting.class_name, &setting.instance_id, change)
            .unwrap();
        assert_eq!(modified.setting_type, SettingType::Persistent);

        // The stored setting plus the configuration of both logical volumes
        let all = ctx.enumerate_settings(&setting.class_name).unwrap();
        assert_eq!(all.len(), 3);

        ctx.delete_setting(&setting.class_name, &setting.instance_id).unwrap();
        assert_eq!(ctx.indications().enqueued(), 3);
    }

    #[test]
    fn test_configuration_settings_are_read_only() {
        let (_dir, ctx) = sample_context();
        let id = "LMI:LMI_VGStorageSetting:dev:/dev/vg0";
        assert_matches!(
            ctx.modify_setting(CLASS_VG_SETTING, id, SettingChange::default()),
            Err(Error::ReadOnlySetting { .. })
        );
        assert_matches!(ctx.delete_setting(CLASS_VG_SETTING, id), Err(Error::ReadOnlySetting { .. }));
    }

    #[test]
    fn test_references_across_classes() {
        let (_dir, ctx) = sample_context();
        let vg = ctx
            .name_for_device(&ctx.engine().device("/dev/vg0").unwrap())
            .unwrap();

        let all = ctx.references(&vg, None).unwrap();
        let classes: std::collections::BTreeSet<_> = all.iter().map(|r| r.class_name).collect();
        assert!(classes.contains("LMI_LVAllocatedFromStoragePool"));
        assert!(classes.contains("LMI_VGAssociatedComponentExtent"));
        assert!(classes.contains("LMI_HostedStoragePool"));
        assert!(classes.contains("LMI_ElementSettingData"));

        let lvs = ctx.references(&vg, Some(CLASS_LV_EXTENT)).unwrap();
        assert_eq!(lvs.len(), 2);
        assert!(lvs.iter().all(|r| r.left.is_class(CLASS_LV_EXTENT)));
    }
}
