//! Redundancy Calculator
//!
//! Combines the redundancy characteristics of a composite device's parents
//! according to how the device lays data out over them.
//!
//! | Mode        | data redundancy | package redundancy | stripe length | nSPoF |
//! |-------------|-----------------|--------------------|---------------|-------|
//! | no parents  | 1               | 0                  | 1             | false |
//! | linear      | min             | min                | min           | AND   |
//! | RAID0       | min             | min                | sum           | AND   |
//! | RAID1       | sum             | sum + (n - 1)      | min           | true  |
//! | RAID4/5     | min             | min + 1            | sum           | true  |
//! | RAID6       | min             | min + 2            | sum           | true  |
//! | RAID10      | min             | min + 1            | sum           | true  |
//!
//! Parents are folded left to right with a per-mode binary combine; the
//! parity levels then add the number of member losses they tolerate.

use crate::domain::ports::{Device, DeviceKind, RaidLevel, StorageEngine};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deepest device stack followed before giving up
const MAX_STACK_DEPTH: usize = 64;

/// Parity distribution of a parity RAID level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParityLayout {
    /// Dedicated parity device (RAID4)
    NonRotated,
    /// Parity rotated across members (RAID5, RAID6)
    Rotated,
}

impl ParityLayout {
    /// CIM `ParityLayout` value
    pub fn cim_value(&self) -> u16 {
        match self {
            ParityLayout::NonRotated => 1,
            ParityLayout::Rotated => 2,
        }
    }
}

/// Fault tolerance and layout characteristics of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Redundancy {
    pub no_single_point_of_failure: bool,
    pub data_redundancy: u32,
    pub package_redundancy: u32,
    pub stripe_length: u32,
    pub parity_layout: Option<ParityLayout>,
}

impl Default for Redundancy {
    fn default() -> Self {
        Self::BASE
    }
}

/// How a composite device lays data out over its parents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    /// Concatenation or a single parent chain
    Linear,
    /// MD RAID array of the given level
    Raid(RaidLevel),
}

impl Redundancy {
    /// Characteristics of a device with no parents (a raw disk)
    pub const BASE: Redundancy = Redundancy {
        no_single_point_of_failure: false,
        data_redundancy: 1,
        package_redundancy: 0,
        stripe_length: 1,
        parity_layout: None,
    };

    fn linear(a: Redundancy, b: Redundancy) -> Redundancy {
        Redundancy {
            no_single_point_of_failure: a.no_single_point_of_failure && b.no_single_point_of_failure,
            data_redundancy: a.data_redundancy.min(b.data_redundancy),
            package_redundancy: a.package_redundancy.min(b.package_redundancy),
            stripe_length: a.stripe_length.min(b.stripe_length),
            parity_layout: None,
        }
    }

    fn stripe(a: Redundancy, b: Redundancy) -> Redundancy {
        Redundancy {
            no_single_point_of_failure: a.no_single_point_of_failure && b.no_single_point_of_failure,
            data_redundancy: a.data_redundancy.min(b.data_redundancy),
            package_redundancy: a.package_redundancy.min(b.package_redundancy),
            stripe_length: a.stripe_length + b.stripe_length,
            parity_layout: None,
        }
    }

    /// Mirror two halves; each combine adds one tolerated package loss
    fn mirror(a: Redundancy, b: Redundancy) -> Redundancy {
        Redundancy {
            no_single_point_of_failure: true,
            data_redundancy: a.data_redundancy + b.data_redundancy,
            package_redundancy: a.package_redundancy + b.package_redundancy + 1,
            stripe_length: a.stripe_length.min(b.stripe_length),
            parity_layout: None,
        }
    }

    /// Combine parent records for the given composition mode
    pub fn combine(mode: CompositionMode, parents: &[Redundancy]) -> Redundancy {
        let (first, rest) = match parents.split_first() {
            Some(split) => split,
            None => return Redundancy::BASE,
        };

        let fold = |f: fn(Redundancy, Redundancy) -> Redundancy| rest.iter().fold(*first, |acc, r| f(acc, *r));

        match mode {
            CompositionMode::Linear | CompositionMode::Raid(RaidLevel::Linear) => fold(Redundancy::linear),
            CompositionMode::Raid(RaidLevel::Raid0) => fold(Redundancy::stripe),
            CompositionMode::Raid(RaidLevel::Raid1) => fold(Redundancy::mirror),
            CompositionMode::Raid(RaidLevel::Raid4) => fold(Redundancy::stripe).with_parity(1, ParityLayout::NonRotated),
            CompositionMode::Raid(RaidLevel::Raid5) => fold(Redundancy::stripe).with_parity(1, ParityLayout::Rotated),
            CompositionMode::Raid(RaidLevel::Raid6) => fold(Redundancy::stripe).with_parity(2, ParityLayout::Rotated),
            CompositionMode::Raid(RaidLevel::Raid10) => {
                let mut combined = fold(Redundancy::stripe);
                combined.package_redundancy += 1;
                combined.no_single_point_of_failure = true;
                combined
            }
        }
    }

    fn with_parity(mut self, tolerated: u32, layout: ParityLayout) -> Redundancy {
        self.package_redundancy += tolerated;
        self.no_single_point_of_failure = true;
        self.parity_layout = Some(layout);
        self
    }

    /// CIM properties describing this record
    pub fn to_properties(&self) -> BTreeMap<String, Option<String>> {
        let mut properties = BTreeMap::new();
        properties.insert(
            "NoSinglePointOfFailure".to_string(),
            Some(self.no_single_point_of_failure.to_string()),
        );
        properties.insert("DataRedundancy".to_string(), Some(self.data_redundancy.to_string()));
        properties.insert(
            "PackageRedundancy".to_string(),
            Some(self.package_redundancy.to_string()),
        );
        properties.insert("ExtentStripeLength".to_string(), Some(self.stripe_length.to_string()));
        properties.insert(
            "ParityLayout".to_string(),
            self.parity_layout.map(|p| p.cim_value().to_string()),
        );
        properties
    }
}

/// Composition mode of a device
///
/// MD arrays report their level as a string; a level this module does not
/// know is a [`Error::UnknownRaidLevel`] fault, never a guess.
pub fn composition_mode(device: &Device) -> Result<CompositionMode> {
    match &device.kind {
        DeviceKind::MdRaid { level } => RaidLevel::parse(level)
            .map(CompositionMode::Raid)
            .ok_or_else(|| Error::UnknownRaidLevel {
                device: device.path.clone(),
                level: level.clone(),
            }),
        _ => Ok(CompositionMode::Linear),
    }
}

/// Compute the redundancy of a live device from its whole parent stack
pub fn redundancy_for_device(engine: &dyn StorageEngine, device: &Device) -> Result<Redundancy> {
    redundancy_at_depth(engine, device, 0)
}

fn redundancy_at_depth(engine: &dyn StorageEngine, device: &Device, depth: usize) -> Result<Redundancy> {
    if depth > MAX_STACK_DEPTH {
        return Err(Error::Failed(format!(
            "device stack under {} is deeper than {} levels",
            device.path, MAX_STACK_DEPTH
        )));
    }

    let mode = composition_mode(device)?;
    let parents = engine
        .parents(device)
        .iter()
        .map(|parent| redundancy_at_depth(engine, parent, depth + 1))
        .collect::<Result<Vec<_>>>()?;

    Ok(Redundancy::combine(mode, &parents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use assert_matches::assert_matches;

    fn base(n: usize) -> Vec<Redundancy> {
        vec![Redundancy::BASE; n]
    }

    #[test]
    fn test_no_parents_is_base() {
        for mode in [
            CompositionMode::Linear,
            CompositionMode::Raid(RaidLevel::Raid1),
            CompositionMode::Raid(RaidLevel::Raid5),
        ] {
            assert_eq!(Redundancy::combine(mode, &[]), Redundancy::BASE);
        }
    }

    #[test]
    fn test_raid1_two_disks() {
        let r = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid1), &base(2));
        assert_eq!(r.data_redundancy, 2);
        assert_eq!(r.package_redundancy, 1);
        assert_eq!(r.stripe_length, 1);
        assert!(r.no_single_point_of_failure);
    }

    #[test]
    fn test_raid1_three_disks() {
        let r = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid1), &base(3));
        assert_eq!(r.data_redundancy, 3);
        assert_eq!(r.package_redundancy, 2);
    }

    #[test]
    fn test_raid5_three_disks() {
        let r = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid5), &base(3));
        assert_eq!(r.data_redundancy, 1);
        assert_eq!(r.package_redundancy, 1);
        assert_eq!(r.stripe_length, 3);
        assert!(r.no_single_point_of_failure);
        assert_eq!(r.parity_layout, Some(ParityLayout::Rotated));
    }

    #[test]
    fn test_raid0_and_raid6() {
        let r0 = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid0), &base(4));
        assert_eq!(r0.stripe_length, 4);
        assert_eq!(r0.package_redundancy, 0);
        assert!(!r0.no_single_point_of_failure);

        let r6 = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid6), &base(4));
        assert_eq!(r6.package_redundancy, 2);
        assert_eq!(r6.stripe_length, 4);

        let r4 = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid4), &base(3));
        assert_eq!(r4.parity_layout, Some(ParityLayout::NonRotated));
    }

    #[test]
    fn test_linear_takes_weakest_parent() {
        let mirrored = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid1), &base(2));
        let r = Redundancy::combine(CompositionMode::Linear, &[mirrored, Redundancy::BASE]);
        assert_eq!(r.data_redundancy, 1);
        assert_eq!(r.package_redundancy, 0);
        assert!(!r.no_single_point_of_failure);

        let single = Redundancy::combine(CompositionMode::Linear, &[mirrored]);
        assert_eq!(single, mirrored);
    }

    #[test]
    fn test_device_stack() {
        let engine = MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30),
            Device::new("/dev/sdb", "sdb", DeviceKind::Disk, 1 << 30),
            Device::new(
                "/dev/md0",
                "md0",
                DeviceKind::MdRaid {
                    level: "raid1".into(),
                },
                1 << 30,
            )
            .with_parents(["/dev/sda", "/dev/sdb"]),
            Device::new("/dev/vg0", "vg0", DeviceKind::VolumeGroup { extent_size: 4 << 20 }, 1 << 30)
                .with_parents(["/dev/md0"]),
        ]);

        let vg = engine.device("/dev/vg0").unwrap();
        let r = redundancy_for_device(&engine, &vg).unwrap();
        assert_eq!(r.data_redundancy, 2);
        assert_eq!(r.package_redundancy, 1);
        assert!(r.no_single_point_of_failure);
    }

    #[test]
    fn test_unknown_level_fails() {
        let engine = MemoryEngine::from_devices([
            Device::new("/dev/sda", "sda", DeviceKind::Disk, 1 << 30),
            Device::new(
                "/dev/md9",
                "md9",
                DeviceKind::MdRaid {
                    level: "raid7".into(),
                },
                1 << 30,
            )
            .with_parents(["/dev/sda"]),
        ]);
        let md = engine.device("/dev/md9").unwrap();
        let result = redundancy_for_device(&engine, &md);
        assert_matches!(result, Err(Error::UnknownRaidLevel { .. }));
    }

    #[test]
    fn test_properties() {
        let r = Redundancy::combine(CompositionMode::Raid(RaidLevel::Raid5), &base(3));
        let props = r.to_properties();
        assert_eq!(props["ExtentStripeLength"], Some("3".to_string()));
        assert_eq!(props["ParityLayout"], Some("2".to_string()));
        assert_eq!(Redundancy::BASE.to_properties()["ParityLayout"], None);
    }
}
