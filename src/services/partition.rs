//! LMI_DiskPartitionConfigurationService
//!
//! Partition tables and partitions on disks and MD arrays.

use super::{announce_created, decode, goal_setting, method_result, object_path, resolve_device, unknown_method, ServiceProvider};
use crate::catalog::{PartitionCapabilitiesProvider, PartitionStyle, CLASS_PARTITION_CAPABILITIES, CLASS_PARTITION_SETTING};
use crate::dispatch::ProviderContext;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, DeviceKind, PartitionRole, PartitionTableType};
use crate::error::{Error, Result};
use crate::indication::IndicationKind;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

pub const CLASS_PARTITION_CONFIGURATION_SERVICE: &str = "LMI_DiskPartitionConfigurationService";

const METHODS: &[&str] = &["SetPartitionStyle", "CreateOrModifyPartition"];

/// Parameters of SetPartitionStyle
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PartitionStyleRequest {
    /// Disk or MD array to write the table on
    pub extent: Option<String>,
    /// Object path of an LMI_DiskPartitionConfigurationCapabilities; GPT when absent
    pub partition_style: Option<String>,
}

/// Parameters of CreateOrModifyPartition
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PartitionRequest {
    /// Partitioned disk, or an extended partition for a logical one
    pub extent: Option<String>,
    /// Object path of an LMI_DiskPartitionConfigurationSetting
    pub goal: Option<String>,
    /// Requested size in bytes
    pub size: Option<u64>,
    /// First sector; the first free one when absent
    pub starting_address: Option<u64>,
    /// Existing partition to modify
    pub partition: Option<String>,
}

fn is_partitionable(device: &Device) -> bool {
    device.is_disk() || device.is_md_raid()
}

/// First and last sector a new partition on `target` may occupy
fn usable_sectors(target: &Device) -> (u64, u64) {
    match target.kind {
        DeviceKind::Partition {
            start_sector, end_sector, ..
        } => (start_sector.saturating_add(1), end_sector),
        _ => (0, target.block_count().saturating_sub(1)),
    }
}

/// Partition table and partition management
#[derive(Debug, Default, Clone)]
pub struct PartitionConfigurationService;

impl PartitionConfigurationService {
    /// Write a new, empty partition table
    pub fn set_partition_style(
        &self,
        ctx: &ProviderContext,
        extent: &InstanceName,
        capability: Option<&InstanceName>,
    ) -> Result<()> {
        let device = resolve_device(ctx, "Extent", extent, "a disk or MD array", is_partitionable)?;

        let style = match capability {
            None => PartitionStyle::Gpt,
            Some(capability) => {
                if !capability.is_class(CLASS_PARTITION_CAPABILITIES) {
                    return Err(Error::invalid(
                        "PartitionStyle",
                        format!("expected a {}", CLASS_PARTITION_CAPABILITIES),
                    ));
                }
                let provider = PartitionCapabilitiesProvider::new(ctx.prefix());
                capability
                    .instance_id()
                    .and_then(|id| provider.style_for_id(id))
                    .ok_or_else(|| Error::invalid("PartitionStyle", format!("unknown capability {}", capability)))?
            }
        };
        let table = style
            .table_type()
            .ok_or_else(|| Error::NotSupported(format!("{} tables are created as extended partitions", style.as_str())))?;

        if device.partition_table.is_some() {
            return Err(Error::invalid("Extent", format!("{} already has a partition table", device.path)));
        }
        if device.format.is_some() || !ctx.engine().children(&device).is_empty() {
            return Err(Error::invalid("Extent", format!("{} is in use", device.path)));
        }

        ctx.engine().create_partition_table(&device.path, table)?;
        info!("Wrote {} partition table on {}", style.as_str(), device.path);
        ctx.notify(IndicationKind::Modification, extent.clone());
        Ok(())
    }

    /// Create a partition on a disk, or a logical partition in an extended one
    pub fn create_or_modify_partition(&self, ctx: &ProviderContext, request: &PartitionRequest) -> Result<InstanceName> {
        if let Some(partition) = &request.partition {
            let name = object_path("Partition", partition)?;
            resolve_device(ctx, "Partition", &name, "a partition", Device::is_partition)?;
            return Err(Error::NotSupported("modifying an existing partition".into()));
        }

        let extent = request
            .extent
            .as_deref()
            .ok_or_else(|| Error::invalid("Extent", "parameter is required"))?;
        let extent = object_path("Extent", extent)?;
        let target = resolve_device(ctx, "Extent", &extent, "a partitionable extent", |d| {
            d.partition_table.is_some() || d.is_partition()
        })?;

        let size = match request.size {
            Some(size) if size > 0 => size,
            _ => return Err(Error::invalid("Size", "a non-zero size is required")),
        };
        let requested = match goal_setting(ctx, CLASS_PARTITION_SETTING, request.goal.as_deref())? {
            Some(goal) => goal
                .uint_property("PartitionType")?
                .map(|value| {
                    u16::try_from(value)
                        .ok()
                        .and_then(PartitionRole::from_cim_value)
                        .ok_or_else(|| Error::invalid("Goal", format!("unknown PartitionType {}", value)))
                })
                .transpose()?,
            None => None,
        };

        // A logical partition is requested by naming the extended partition
        let (disk, role) = match target.kind {
            DeviceKind::Partition {
                role: PartitionRole::Extended,
                ..
            } => {
                if requested.is_some_and(|role| role != PartitionRole::Logical) {
                    return Err(Error::invalid("Goal", "only logical partitions fit in an extended partition"));
                }
                let disk = target
                    .parents
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::Failed(format!("{} has no parent disk", target.path)))?;
                (disk, PartitionRole::Logical)
            }
            DeviceKind::Partition { .. } => {
                return Err(Error::invalid("Extent", format!("{} is not an extended partition", target.path)));
            }
            _ => {
                let role = requested.unwrap_or(PartitionRole::Primary);
                if role == PartitionRole::Logical {
                    return Err(Error::invalid("Goal", "logical partitions go into an extended partition"));
                }
                if target.partition_table == Some(PartitionTableType::Gpt) && role != PartitionRole::Primary {
                    return Err(Error::invalid("Goal", "GPT supports primary partitions only"));
                }
                (target.path.clone(), role)
            }
        };

        if let Some(start) = request.starting_address {
            let (first, last) = usable_sectors(&target);
            let sectors = size / u64::from(target.block_size.max(1));
            let fits = start >= first && start.checked_add(sectors).is_some_and(|end| end <= last.saturating_add(1));
            if !fits {
                return Err(Error::invalid(
                    "StartingAddress",
                    format!("{} sectors from {} do not fit into {}-{} of {}", sectors, start, first, last, target.path),
                ));
            }
        }

        let partition = ctx
            .engine()
            .create_partition(&disk, role, request.starting_address, size)?;
        announce_created(ctx, &partition)
    }
}

impl ServiceProvider for PartitionConfigurationService {
    fn class_name(&self) -> &'static str {
        CLASS_PARTITION_CONFIGURATION_SERVICE
    }

    fn method_names(&self) -> &'static [&'static str] {
        METHODS
    }

    fn invoke(&self, ctx: &ProviderContext, method: &str, params: &Value) -> Result<Value> {
        match method.to_ascii_lowercase().as_str() {
            "setpartitionstyle" => {
                let request: PartitionStyleRequest = decode(method, params)?;
                let extent = request
                    .extent
                    .as_deref()
                    .ok_or_else(|| Error::invalid("Extent", "parameter is required"))?;
                let extent = object_path("Extent", extent)?;
                let capability = request
                    .partition_style
                    .as_deref()
                    .map(|raw| object_path("PartitionStyle", raw))
                    .transpose()?;
                self.set_partition_style(ctx, &extent, capability.as_ref())?;
                Ok(method_result("Extent", None))
            }
            "createormodifypartition" => {
                let name = self.create_or_modify_partition(ctx, &decode(method, params)?)?;
                Ok(method_result("Partition", Some(&name)))
            }
            _ => Err(unknown_method(self.class_name(), method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SettingChange, SettingGoal};
    use crate::dispatch::fixtures::{sample_context, GIB};
    use crate::registry::{CLASS_DISK_PARTITION, CLASS_GENERIC_DISK_PARTITION};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn name(ctx: &ProviderContext, device: &str) -> InstanceName {
        ctx.name_for_device(&ctx.engine().device(device).unwrap()).unwrap()
    }

    fn capability(style: PartitionStyle) -> InstanceName {
        InstanceName::with_instance_id(
            CLASS_PARTITION_CAPABILITIES,
            PartitionCapabilitiesProvider::new("LMI").instance_id(style),
        )
    }

    #[test]
    fn test_gpt_table_and_partition() {
        let (_dir, ctx) = sample_context();
        let service = PartitionConfigurationService;
        let sde = name(&ctx, "/dev/sde");

        service.set_partition_style(&ctx, &sde, None).unwrap();
        assert_eq!(
            ctx.engine().device("/dev/sde").unwrap().partition_table,
            Some(PartitionTableType::Gpt)
        );
        // Second table on the same disk
        assert_matches!(
            service.set_partition_style(&ctx, &sde, None),
            Err(Error::InvalidParameter { .. })
        );

        let partition = service
            .create_or_modify_partition(
                &ctx,
                &PartitionRequest {
                    extent: Some(sde.to_string()),
                    size: Some(GIB),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(partition.is_class(CLASS_GENERIC_DISK_PARTITION));
        assert_eq!(ctx.indications().enqueued(), 2);
    }

    #[test]
    fn test_style_validation() {
        let (_dir, ctx) = sample_context();
        let service = PartitionConfigurationService;
        let sdf = name(&ctx, "/dev/sdf");

        assert_matches!(
            service.set_partition_style(&ctx, &sdf, Some(&capability(PartitionStyle::Embr))),
            Err(Error::NotSupported(_))
        );
        let bogus = InstanceName::with_instance_id(CLASS_PARTITION_CAPABILITIES, "LMI:nothing");
        assert_matches!(
            service.set_partition_style(&ctx, &sdf, Some(&bogus)),
            Err(Error::InvalidParameter { .. })
        );
        // Volume groups cannot be partitioned
        assert_matches!(
            service.set_partition_style(&ctx, &name(&ctx, "/dev/vg0"), None),
            Err(Error::InvalidParameter { .. })
        );
        // MD member disks are in use
        assert_matches!(
            service.set_partition_style(&ctx, &name(&ctx, "/dev/sdc"), None),
            Err(Error::InvalidParameter { .. })
        );
        assert!(ctx.engine().device("/dev/sdf").unwrap().partition_table.is_none());
    }

    #[test]
    fn test_extended_and_logical_partitions() {
        let (_dir, ctx) = sample_context();
        let service = PartitionConfigurationService;
        let sdf = name(&ctx, "/dev/sdf");
        service
            .set_partition_style(&ctx, &sdf, Some(&capability(PartitionStyle::Mbr)))
            .unwrap();

        let goal = ctx
            .create_setting_from_capability(&capability(PartitionStyle::Mbr), SettingGoal::Default)
            .unwrap();
        let mut change = SettingChange::default();
        change
            .properties
            .insert("PartitionType".to_string(), Some(PartitionRole::Extended.cim_value().to_string()));
        let goal = ctx
            .modify_setting(&goal.class_name, &goal.instance_id, change)
            .unwrap();

        let extended = service
            .create_or_modify_partition(
                &ctx,
                &PartitionRequest {
                    extent: Some(sdf.to_string()),
                    goal: Some(goal.instance_name().to_string()),
                    size: Some(4 * GIB),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(extended.is_class(CLASS_DISK_PARTITION));

        let result = ctx
            .invoke(
                CLASS_PARTITION_CONFIGURATION_SERVICE,
                "CreateOrModifyPartition",
                &json!({ "Extent": extended.to_string(), "Size": GIB }),
            )
            .unwrap();
        let logical: InstanceName = result["Partition"].as_str().unwrap().parse().unwrap();
        assert_matches!(
            ctx.require_device(&logical).unwrap().kind,
            DeviceKind::Partition {
                role: PartitionRole::Logical,
                number: 5,
                ..
            }
        );

        // A primary partition cannot be nested
        let primary = name(&ctx, "/dev/sda1");
        assert_matches!(
            service.create_or_modify_partition(
                &ctx,
                &PartitionRequest {
                    extent: Some(primary.to_string()),
                    size: Some(GIB),
                    ..Default::default()
                },
            ),
            Err(Error::InvalidParameter { .. })
        );
    }

    #[test]
    fn test_starting_address_outside_disk() {
        let (_dir, ctx) = sample_context();
        let sdb = name(&ctx, "/dev/sdb");
        let before = ctx.engine().children(&ctx.engine().device("/dev/sdb").unwrap()).len();

        for start in [u64::MAX, 10 * GIB / 512, 10 * GIB / 512 - 16] {
            let result = ctx.invoke(
                CLASS_PARTITION_CONFIGURATION_SERVICE,
                "CreateOrModifyPartition",
                &json!({ "Extent": sdb.to_string(), "Size": GIB, "StartingAddress": start }),
            );
            assert_matches!(
                result,
                Err(Error::InvalidParameter { ref parameter, .. }) if parameter == "StartingAddress"
            );
        }
        assert_eq!(ctx.engine().children(&ctx.engine().device("/dev/sdb").unwrap()).len(), before);
        assert_eq!(ctx.indications().enqueued(), 0);

        // An in-range start still reaches the engine
        let partition = PartitionConfigurationService
            .create_or_modify_partition(
                &ctx,
                &PartitionRequest {
                    extent: Some(sdb.to_string()),
                    size: Some(GIB),
                    starting_address: Some(5 * GIB / 512),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_matches!(
            ctx.require_device(&partition).unwrap().kind,
            DeviceKind::Partition { start_sector, .. } if start_sector == 5 * GIB / 512
        );
    }

    #[test]
    fn test_partition_requires_table_and_size() {
        let (_dir, ctx) = sample_context();
        let service = PartitionConfigurationService;
        let request = PartitionRequest {
            extent: Some(name(&ctx, "/dev/sde").to_string()),
            size: Some(GIB),
            ..Default::default()
        };
        assert_matches!(
            service.create_or_modify_partition(&ctx, &request),
            Err(Error::InvalidParameter { .. })
        );

        let request = PartitionRequest {
            extent: Some(name(&ctx, "/dev/sda").to_string()),
            size: None,
            ..request
        };
        assert_matches!(
            service.create_or_modify_partition(&ctx, &request),
            Err(Error::InvalidParameter { .. })
        );
    }
}
