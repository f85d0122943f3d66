//! LMI_StorageConfigurationService
//!
//! Volume group, logical volume and MD RAID creation and deletion.

use super::{
    announce_created, check_goal, decode, destroy, goal_setting, method_result, object_path, resolve_device,
    resolve_members, unknown_method, ServiceProvider,
};
use crate::catalog::{CLASS_LV_SETTING, CLASS_MD_RAID_SETTING, CLASS_VG_SETTING, DEFAULT_EXTENT_SIZE};
use crate::dispatch::ProviderContext;
use crate::domain::name::InstanceName;
use crate::domain::ports::{Device, RaidLevel};
use crate::error::{Error, Result};
use crate::redundancy::{redundancy_for_device, CompositionMode, Redundancy};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const CLASS_STORAGE_CONFIGURATION_SERVICE: &str = "LMI_StorageConfigurationService";

const METHODS: &[&str] = &[
    "CreateOrModifyVG",
    "CreateOrModifyLV",
    "CreateOrModifyMDRAID",
    "DeleteVG",
    "DeleteLV",
    "DeleteMDRAID",
];

/// Parameters of CreateOrModifyVG
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VgRequest {
    pub element_name: Option<String>,
    /// Object paths of the physical volumes
    pub in_extents: Vec<String>,
    /// Object path of an LMI_VGStorageSetting
    pub goal: Option<String>,
    /// Existing pool to modify
    pub pool: Option<String>,
}

/// Parameters of CreateOrModifyLV
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LvRequest {
    pub element_name: Option<String>,
    pub in_pool: Option<String>,
    /// Object path of an LMI_LVStorageSetting
    pub goal: Option<String>,
    /// Requested size in bytes
    pub size: Option<u64>,
    /// Existing logical volume to modify
    pub the_element: Option<String>,
}

/// Parameters of CreateOrModifyMDRAID
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MdRaidRequest {
    pub element_name: Option<String>,
    pub in_extents: Vec<String>,
    /// Numeric RAID level (0, 1, 4, 5, 6, 10)
    pub level: Option<u64>,
    /// Object path of an LMI_MDRAIDStorageSetting
    pub goal: Option<String>,
    /// Existing array to modify
    pub the_element: Option<String>,
}

/// Parameters of the Delete methods
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeleteRequest {
    pub the_element: Option<String>,
    pub pool: Option<String>,
}

fn element_name(raw: Option<&str>) -> Result<&str> {
    match raw {
        Some(name) if !name.is_empty() && !name.contains('/') => Ok(name),
        Some(name) => Err(Error::invalid("ElementName", format!("{:?} is not a valid name", name))),
        None => Err(Error::invalid("ElementName", "a name is required")),
    }
}

fn required<'a>(parameter: &str, raw: Option<&'a str>) -> Result<&'a str> {
    raw.ok_or_else(|| Error::invalid(parameter, "parameter is required"))
}

/// Volume group, logical volume and MD RAID management
#[derive(Debug, Default, Clone)]
pub struct StorageConfigurationService;

impl StorageConfigurationService {
    /// Create a volume group from unused extents
    pub fn create_or_modify_vg(&self, ctx: &ProviderContext, request: &VgRequest) -> Result<InstanceName> {
        if let Some(pool) = &request.pool {
            let name = object_path("Pool", pool)?;
            resolve_device(ctx, "Pool", &name, "a volume group", Device::is_volume_group)?;
            return Err(Error::NotSupported("modifying an existing volume group".into()));
        }

        let name = element_name(request.element_name.as_deref())?;
        if ctx.engine().volume_group(name).is_some() {
            return Err(Error::invalid("ElementName", format!("volume group {} exists", name)));
        }
        let members = resolve_members(ctx, "InExtents", &request.in_extents, true)?;
        let extent_size = match goal_setting(ctx, CLASS_VG_SETTING, request.goal.as_deref())? {
            Some(goal) => {
                let parents = members
                    .iter()
                    .map(|m| redundancy_for_device(ctx.engine(), m))
                    .collect::<Result<Vec<Redundancy>>>()?;
                check_goal(&goal, &Redundancy::combine(CompositionMode::Linear, &parents))?;
                goal.uint_property("ExtentSize")?.unwrap_or(DEFAULT_EXTENT_SIZE)
            }
            None => DEFAULT_EXTENT_SIZE,
        };

        let paths: Vec<String> = members.iter().map(|m| m.path.clone()).collect();
        debug!("Creating VG {} on {:?}, extent size {}", name, paths, extent_size);
        let vg = ctx.engine().create_volume_group(name, &paths, extent_size)?;
        announce_created(ctx, &vg)
    }

    /// Create a logical volume in a volume group
    pub fn create_or_modify_lv(&self, ctx: &ProviderContext, request: &LvRequest) -> Result<InstanceName> {
        if let Some(element) = &request.the_element {
            let name = object_path("TheElement", element)?;
            resolve_device(ctx, "TheElement", &name, "a logical volume", Device::is_logical_volume)?;
            return Err(Error::NotSupported("modifying an existing logical volume".into()));
        }

        let name = element_name(request.element_name.as_deref())?;
        let pool = object_path("InPool", required("InPool", request.in_pool.as_deref())?)?;
        let vg = resolve_device(ctx, "InPool", &pool, "a volume group", Device::is_volume_group)?;
        let size = match request.size {
            Some(size) if size > 0 => size,
            _ => return Err(Error::invalid("Size", "a non-zero size is required")),
        };
        if size > vg.size_bytes {
            return Err(Error::invalid(
                "Size",
                format!("{} bytes exceed the {} bytes of {}", size, vg.size_bytes, vg.name),
            ));
        }
        if let Some(goal) = goal_setting(ctx, CLASS_LV_SETTING, request.goal.as_deref())? {
            check_goal(&goal, &redundancy_for_device(ctx.engine(), &vg)?)?;
        }

        let lv = ctx.engine().create_logical_volume(&vg.name, name, size)?;
        announce_created(ctx, &lv)
    }

    /// Create an MD RAID array from unused extents
    pub fn create_or_modify_md_raid(&self, ctx: &ProviderContext, request: &MdRaidRequest) -> Result<InstanceName> {
        if let Some(element) = &request.the_element {
            let name = object_path("TheElement", element)?;
            resolve_device(ctx, "TheElement", &name, "an MD RAID array", Device::is_md_raid)?;
            return Err(Error::NotSupported("modifying an existing MD RAID array".into()));
        }

        let name = element_name(request.element_name.as_deref())?;
        let level = request
            .level
            .ok_or_else(|| Error::invalid("Level", "a RAID level is required"))?;
        let level =
            RaidLevel::from_number(level).ok_or_else(|| Error::invalid("Level", format!("unsupported level {}", level)))?;
        let members = resolve_members(ctx, "InExtents", &request.in_extents, false)?;
        if members.len() < level.min_members() {
            return Err(Error::invalid(
                "InExtents",
                format!("{} needs at least {} members, got {}", level, level.min_members(), members.len()),
            ));
        }
        if let Some(goal) = goal_setting(ctx, CLASS_MD_RAID_SETTING, request.goal.as_deref())? {
            let parents = members
                .iter()
                .map(|m| redundancy_for_device(ctx.engine(), m))
                .collect::<Result<Vec<Redundancy>>>()?;
            check_goal(&goal, &Redundancy::combine(CompositionMode::Raid(level), &parents))?;
        }

        let paths: Vec<String> = members.iter().map(|m| m.path.clone()).collect();
        let array = ctx.engine().create_md_raid(name, &paths, level)?;
        announce_created(ctx, &array)
    }

    pub fn delete_vg(&self, ctx: &ProviderContext, pool: &InstanceName) -> Result<()> {
        let vg = resolve_device(ctx, "Pool", pool, "a volume group", Device::is_volume_group)?;
        destroy(ctx, "Pool", &vg)
    }

    pub fn delete_lv(&self, ctx: &ProviderContext, element: &InstanceName) -> Result<()> {
        let lv = resolve_device(ctx, "TheElement", element, "a logical volume", Device::is_logical_volume)?;
        destroy(ctx, "TheElement", &lv)
    }

    pub fn delete_md_raid(&self, ctx: &ProviderContext, element: &InstanceName) -> Result<()> {
        let array = resolve_device(ctx, "TheElement", element, "an MD RAID array", Device::is_md_raid)?;
        destroy(ctx, "TheElement", &array)
    }
}

impl ServiceProvider for StorageConfigurationService {
    fn class_name(&self) -> &'static str {
        CLASS_STORAGE_CONFIGURATION_SERVICE
    }

    fn method_names(&self) -> &'static [&'static str] {
        METHODS
    }

    fn invoke(&self, ctx: &ProviderContext, method: &str, params: &Value) -> Result<Value> {
        match method.to_ascii_lowercase().as_str() {
            "createormodifyvg" => {
                let name = self.create_or_modify_vg(ctx, &decode(method, params)?)?;
                Ok(method_result("Pool", Some(&name)))
            }
            "createormodifylv" => {
                let name = self.create_or_modify_lv(ctx, &decode(method, params)?)?;
                Ok(method_result("TheElement", Some(&name)))
            }
            "createormodifymdraid" => {
                let name = self.create_or_modify_md_raid(ctx, &decode(method, params)?)?;
                Ok(method_result("TheElement", Some(&name)))
            }
            "deletevg" => {
                let request: DeleteRequest = decode(method, params)?;
                let pool = object_path("Pool", required("Pool", request.pool.as_deref())?)?;
                self.delete_vg(ctx, &pool)?;
                Ok(method_result("Pool", None))
            }
            "deletelv" | "deletemdraid" => {
                let request: DeleteRequest = decode(method, params)?;
                let element = object_path("TheElement", required("TheElement", request.the_element.as_deref())?)?;
                if method.eq_ignore_ascii_case("DeleteLV") {
                    self.delete_lv(ctx, &element)?;
                } else {
                    self.delete_md_raid(ctx, &element)?;
                }
                Ok(method_result("TheElement", None))
            }
            _ => Err(unknown_method(self.class_name(), method)),
        }
    }
}
