//! Service method handlers
//!
//! Each service class validates every parameter against the device graph
//! and the setting catalog before it asks the storage engine to act, and
//! emits a lifecycle indication after a successful mutation.

pub mod configuration;
pub mod partition;

pub use configuration::*;
pub use partition::*;

use crate::catalog::Setting;
use crate::dispatch::ProviderContext;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, FormatKind};
use crate::error::{Error, Result};
use crate::indication::IndicationKind;
use crate::redundancy::Redundancy;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// CIM method return value of a successful call
pub const RETURN_OK: u32 = 0;

/// One service class and its extrinsic methods
pub trait ServiceProvider: Send + Sync {
    fn class_name(&self) -> &'static str;

    fn method_names(&self) -> &'static [&'static str];

    /// Name of the single service instance on this system
    fn instance_name(&self, ctx: &ProviderContext) -> InstanceName {
        let identity = ctx.identity();
        InstanceName::new(self.class_name())
            .with_key("CreationClassName", self.class_name())
            .with_key("Name", self.class_name())
            .with_key("SystemCreationClassName", identity.system_class_name.clone())
            .with_key("SystemName", identity.system_name.clone())
    }

    /// Run a method with JSON parameters
    fn invoke(&self, ctx: &ProviderContext, method: &str, params: &Value) -> Result<Value>;
}

pub type ServiceProviderRef = Arc<dyn ServiceProvider>;

/// Every built-in service class
pub fn default_services() -> Vec<ServiceProviderRef> {
    vec![
        Arc::new(StorageConfigurationService),
        Arc::new(PartitionConfigurationService),
    ]
}

// =============================================================================
// Parameter Helpers
// =============================================================================

/// Decode method parameters
pub(crate) fn decode<T: DeserializeOwned>(method: &str, params: &Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| Error::invalid(method, e.to_string()))
}

/// Parse an object path parameter
pub(crate) fn object_path(parameter: &str, raw: &str) -> Result<InstanceName> {
    raw.parse::<InstanceName>()
        .map_err(|e| Error::invalid(parameter, e.to_string()))
}

/// Resolve a device parameter that has to satisfy `accept`
pub(crate) fn resolve_device(
    ctx: &ProviderContext,
    parameter: &str,
    name: &InstanceName,
    expected: &str,
    accept: fn(&Device) -> bool,
) -> Result<Arc<Device>> {
    let device = ctx
        .device_for_name(name)
        .ok_or_else(|| Error::invalid(parameter, format!("{} does not resolve", name)))?;
    if !accept(&device) {
        return Err(Error::invalid(parameter, format!("{} is not {}", device.path, expected)));
    }
    Ok(device)
}

/// Check that a device can become a member of a new VG or MD array
pub(crate) fn ensure_unused(ctx: &ProviderContext, parameter: &str, device: &Device, lvm: bool) -> Result<()> {
    if device.is_volume_group() {
        return Err(Error::invalid(parameter, format!("{} is a volume group", device.path)));
    }
    if !ctx.engine().children(device).is_empty() {
        return Err(Error::invalid(parameter, format!("{} is in use", device.path)));
    }
    if device.partition_table.is_some() {
        return Err(Error::invalid(parameter, format!("{} holds a partition table", device.path)));
    }
    let free = match device.format.as_ref().map(|f| &f.kind) {
        None => true,
        Some(FormatKind::LvmPv { vg_name: None }) => lvm,
        Some(_) => false,
    };
    if !free {
        return Err(Error::invalid(parameter, format!("{} is already formatted", device.path)));
    }
    Ok(())
}

/// Resolve a list of member extents, rejecting duplicates
pub(crate) fn resolve_members(
    ctx: &ProviderContext,
    parameter: &str,
    raw: &[String],
    lvm: bool,
) -> Result<Vec<Arc<Device>>> {
    if raw.is_empty() {
        return Err(Error::invalid(parameter, "at least one extent is required"));
    }
    let mut members: Vec<Arc<Device>> = Vec::with_capacity(raw.len());
    for path in raw {
        let name = object_path(parameter, path)?;
        let device = resolve_device(ctx, parameter, &name, "an extent", |d| !d.is_volume_group())?;
        if members.iter().any(|m| m.path == device.path) {
            return Err(Error::invalid(parameter, format!("{} is listed twice", device.path)));
        }
        ensure_unused(ctx, parameter, &device, lvm)?;
        members.push(device);
    }
    Ok(members)
}

/// Resolve an optional goal setting of a given class
pub(crate) fn goal_setting(ctx: &ProviderContext, class_name: &str, raw: Option<&str>) -> Result<Option<Setting>> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let name = object_path("Goal", raw)?;
    if !name.is_class(class_name) {
        return Err(Error::invalid("Goal", format!("expected a {}, got {}", class_name, name.class_name())));
    }
    let instance_id = name
        .instance_id()
        .ok_or_else(|| Error::invalid("Goal", format!("{} has no InstanceID", name)))?;
    ctx.require_setting(class_name, instance_id)
        .map(Some)
        .map_err(|e| match e {
            Error::InvalidParameter { .. } => e,
            other => Error::invalid("Goal", other.to_string()),
        })
}

/// Check that a redundancy record lies within a goal's ranges
pub(crate) fn check_goal(goal: &Setting, redundancy: &Redundancy) -> Result<()> {
    for (property, actual) in [
        ("DataRedundancy", redundancy.data_redundancy),
        ("PackageRedundancy", redundancy.package_redundancy),
        ("ExtentStripeLength", redundancy.stripe_length),
    ] {
        let min = goal.uint_property(&format!("{}Min", property))?;
        let max = goal.uint_property(&format!("{}Max", property))?;
        if min.is_some_and(|min| u64::from(actual) < min) || max.is_some_and(|max| u64::from(actual) > max) {
            return Err(Error::invalid(
                "Goal",
                format!("{} {} is outside the goal's range", property, actual),
            ));
        }
    }
    if goal.bool_property("NoSinglePointOfFailure")? == Some(true) && !redundancy.no_single_point_of_failure {
        return Err(Error::invalid("Goal", "goal requires no single point of failure"));
    }
    Ok(())
}

/// Name a freshly created device and announce it
pub(crate) fn announce_created(ctx: &ProviderContext, device: &Device) -> Result<InstanceName> {
    let name = ctx
        .name_for_device(device)
        .ok_or_else(|| Error::NoProvider(device.path.clone()))?;
    info!("Created {}", name);
    ctx.notify(IndicationKind::Creation, name.clone());
    Ok(name)
}

/// Destroy a device that nothing is built on and announce it
pub(crate) fn destroy(ctx: &ProviderContext, parameter: &str, device: &Device) -> Result<()> {
    if !ctx.engine().children(device).is_empty() {
        return Err(Error::invalid(parameter, format!("{} is in use", device.path)));
    }
    let name = ctx
        .name_for_device(device)
        .ok_or_else(|| Error::NoProvider(device.path.clone()))?;
    ctx.engine().destroy_device(&device.path)?;
    info!("Deleted {}", name);
    ctx.notify(IndicationKind::Deletion, name);
    Ok(())
}

/// Return value of a method that produced an object
pub(crate) fn method_result(output: &str, name: Option<&InstanceName>) -> Value {
    let mut result = serde_json::Map::new();
    result.insert("ReturnValue".to_string(), Value::from(RETURN_OK));
    if let Some(name) = name {
        result.insert(output.to_string(), Value::from(name.to_string()));
    }
    Value::Object(result)
}

/// Reject a method this class does not have
pub(crate) fn unknown_method(class_name: &str, method: &str) -> Error {
    Error::NotSupported(format!("{}.{}", class_name, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::fixtures::sample_context;
    use assert_matches::assert_matches;

    #[test]
    fn test_service_instances() {
        let (_dir, ctx) = sample_context();
        let names: Vec<_> = ctx
            .service_providers()
            .iter()
            .map(|s| s.instance_name(&ctx))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names
            .iter()
            .all(|n| n.key_str("SystemName") == Some("host.example.com")));
    }

    #[test]
    fn test_members_validation() {
        let (_dir, ctx) = sample_context();
        let path = |dev: &str| {
            ctx.name_for_device(&ctx.engine().device(dev).unwrap())
                .unwrap()
                .to_string()
        };

        assert_matches!(
            resolve_members(&ctx, "InExtents", &[], true),
            Err(Error::InvalidParameter { .. })
        );
        assert_matches!(
            resolve_members(&ctx, "InExtents", &[path("/dev/sde"), path("/dev/sde")], true),
            Err(Error::InvalidParameter { .. })
        );
        // Partitioned disk, PV of another VG, MD member
        for used in ["/dev/sda", "/dev/sda2", "/dev/sdc"] {
            assert!(resolve_members(&ctx, "InExtents", &[path(used)], true).is_err());
        }
        assert_matches!(
            resolve_members(&ctx, "InExtents", &["not a path".to_string()], true),
            Err(Error::InvalidParameter { .. })
        );
        assert_eq!(
            resolve_members(&ctx, "InExtents", &[path("/dev/sde"), path("/dev/sdf")], true)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_check_goal_ranges() {
        let goal = Setting::new("LMI_LVStorageSetting", "LMI:LMI_LVStorageSetting:1", crate::catalog::SettingType::Transient)
            .with_property("DataRedundancyMin", Some("2".to_string()))
            .with_property("DataRedundancyMax", Some("3".to_string()));
        assert!(check_goal(&goal, &Redundancy::BASE).is_err());

        let mirrored = Redundancy {
            data_redundancy: 2,
            ..Redundancy::BASE
        };
        check_goal(&goal, &mirrored).unwrap();
    }
}
