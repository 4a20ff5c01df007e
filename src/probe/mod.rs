pub mod bcache;
pub mod blkid;
pub mod lsblk;
pub mod lvm;
pub mod mdadm;
pub mod mounts;
pub mod multipath;
pub mod zfs;

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use crate::errors::CurtinError;

pub const SYS_BLOCK: &str = "/sys/class/block";

/// Kernel-visible type of one block device, plus `Mount` for the
/// teardown category of a live mount sitting on a device. Mounts are
/// never a probed device classification; they enter shutdown plans as
/// their own highest-priority steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevType {
    Mount,
    Disk,
    Partition,
    Lvm,
    Crypt,
    Raid,
    Bcache,
    Mpath,
    Other,
}

impl DevType {
    /// Classify from the lsblk TYPE column plus kname conventions.
    /// md devices report their raid level as TYPE; bcache devices
    /// report plain `disk` and are recognized by kname.
    pub fn identify(kname: &str, lsblk_type: Option<&str>) -> Self {
        if kname.starts_with("bcache") {
            return Self::Bcache;
        }

        match lsblk_type {
            Some("disk") => Self::Disk,
            Some("part") => Self::Partition,
            Some("lvm") => Self::Lvm,
            Some("crypt") => Self::Crypt,
            Some("mpath") => Self::Mpath,
            Some(t) if t.starts_with("raid") || t == "md" => Self::Raid,
            _ if kname.starts_with("md") => Self::Raid,
            _ => Self::Other,
        }
    }
}

/// Partition geometry read from sysfs, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartGeometry {
    pub number: u32,
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub kname: String,
    pub devpath: String,
    pub dev_type: DevType,
    pub size: u64,
    pub ro: bool,
    pub fstype: Option<String>,
    pub fs_uuid: Option<String>,
    pub fs_label: Option<String>,
    pub ptable: Option<String>,
    pub parent: Option<String>,
    pub mountpoint: Option<String>,
    pub serial: Option<String>,
    pub wwn: Option<String>,
    pub partuuid: Option<String>,
    pub holders: Vec<String>,
    pub partition: Option<PartGeometry>,
}

/// A consistent view of the host block topology.
///
/// Rebuilt from scratch after every mutating action; nothing is patched
/// incrementally. Individual tool failures degrade to warnings until an
/// action actually needs the missing data.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub devices: BTreeMap<String, DeviceRecord>,
    pub lvm: lvm::LvmState,
    pub zpools: Vec<String>,

    /// multipath map alias -> WWID.
    pub multipaths: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn probe() -> Result<Self, CurtinError> {
        let output = lsblk::run_lsblk()?;
        let mut devices = lsblk::parse_lsblk(&output)?;

        enrich_from_sysfs(&mut devices, Path::new(SYS_BLOCK));

        match blkid::probe() {
            Ok(blkid_map) => blkid::merge(&mut devices, &blkid_map),
            Err(err) => warn!("blkid probe failed, continuing: {err:?}"),
        }

        let lvm = match lvm::probe() {
            Ok(state) => state,
            Err(err) => {
                warn!("lvm probe failed, continuing: {err:?}");
                lvm::LvmState::default()
            }
        };

        let zpools = match zfs::list_zpools() {
            Ok(pools) => pools,
            Err(err) => {
                warn!("zpool probe failed, continuing: {err:?}");
                Vec::new()
            }
        };

        let multipaths = match multipath::probe() {
            Ok(maps) => maps,
            Err(err) => {
                warn!("multipath probe failed, continuing: {err:?}");
                BTreeMap::new()
            }
        };

        debug!("probed {} block devices", devices.len());

        Ok(Self { devices, lvm, zpools, multipaths })
    }

    pub fn get(&self, kname: &str) -> Option<&DeviceRecord> {
        self.devices.get(kname)
    }

    /// Look up by /dev path. Aliases like /dev/mapper/{name} and
    /// /dev/{vg}/{lv} resolve to their dm kname first.
    pub fn by_devpath(&self, devpath: &str) -> Option<&DeviceRecord> {
        if let Some(record) =
            self.devices.values().find(|record| record.devpath == devpath)
        {
            return Some(record);
        }

        self.devices.get(&crate::block::path_to_kname(devpath))
    }

    pub fn find_by_serial(&self, serial: &str) -> Option<&DeviceRecord> {
        self.devices.values().find(|record| {
            record.dev_type == DevType::Disk
                && record.serial.as_deref() == Some(serial)
        })
    }

    pub fn find_by_wwn(&self, wwn: &str) -> Option<&DeviceRecord> {
        self.devices.values().find(|record| {
            record.dev_type == DevType::Disk && record.wwn.as_deref() == Some(wwn)
        })
    }

    /// Partitions of a disk, ordered by partition number.
    pub fn partitions_of(&self, disk_kname: &str) -> Vec<&DeviceRecord> {
        let mut parts: Vec<&DeviceRecord> = self
            .devices
            .values()
            .filter(|record| {
                record.dev_type == DevType::Partition
                    && record.parent.as_deref() == Some(disk_kname)
            })
            .collect();

        parts.sort_by_key(|record| {
            record.partition.map(|geometry| geometry.number).unwrap_or(0)
        });

        parts
    }
}

/// Fill in holders and partition geometry from sysfs.
///
/// `root` is the `/sys/class/block` directory; tests point it at a
/// tempdir-backed fake.
pub fn enrich_from_sysfs(devices: &mut BTreeMap<String, DeviceRecord>, root: &Path) {
    for record in devices.values_mut() {
        let dev_dir = root.join(&record.kname);

        record.holders = list_dir_names(&dev_dir.join("holders"));
        record.holders.sort();

        if record.dev_type == DevType::Partition {
            record.partition = read_part_geometry(&dev_dir);
        }
    }
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}

// sysfs reports start/size in 512-byte sectors regardless of the
// device's logical block size.
fn read_part_geometry(dev_dir: &Path) -> Option<PartGeometry> {
    let read_u64 = |name: &str| -> Option<u64> {
        std::fs::read_to_string(dev_dir.join(name))
            .ok()?
            .trim()
            .parse()
            .ok()
    };

    Some(PartGeometry {
        number: read_u64("partition")? as u32,
        start: read_u64("start")? * 512,
        size: read_u64("size")? * 512,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify() {
        struct Test<'a> {
            kname: &'a str,
            lsblk_type: Option<&'a str>,
            expected: DevType,
        }

        let tests = vec![
            Test { kname: "sda", lsblk_type: Some("disk"), expected: DevType::Disk },
            Test { kname: "sda1", lsblk_type: Some("part"), expected: DevType::Partition },
            Test { kname: "dm-0", lsblk_type: Some("lvm"), expected: DevType::Lvm },
            Test { kname: "dm-1", lsblk_type: Some("crypt"), expected: DevType::Crypt },
            Test { kname: "md0", lsblk_type: Some("raid1"), expected: DevType::Raid },
            Test { kname: "md127", lsblk_type: None, expected: DevType::Raid },
            Test { kname: "bcache0", lsblk_type: Some("disk"), expected: DevType::Bcache },
            Test { kname: "dm-2", lsblk_type: Some("mpath"), expected: DevType::Mpath },
        ];

        for test in tests {
            let result = DevType::identify(test.kname, test.lsblk_type);
            assert_eq!(test.expected, result, "kname: {}", test.kname);
        }
    }

    #[test]
    fn test_enrich_from_sysfs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir_all(root.join("sda/holders")).unwrap();
        std::fs::create_dir_all(root.join("sda1/holders/dm-0")).unwrap();
        std::fs::write(root.join("sda1/partition"), "1\n").unwrap();
        std::fs::write(root.join("sda1/start"), "2048\n").unwrap();
        std::fs::write(root.join("sda1/size"), "2097152\n").unwrap();

        let mut devices = lsblk::parse_lsblk(concat!(
            "KNAME=\"sda\" TYPE=\"disk\" SIZE=\"1073741824\" RO=\"0\"\n",
            "KNAME=\"sda1\" PKNAME=\"sda\" TYPE=\"part\" SIZE=\"1073740800\" RO=\"0\"\n",
        ))
        .unwrap();

        enrich_from_sysfs(&mut devices, root);

        assert!(devices["sda"].holders.is_empty());
        assert_eq!(devices["sda1"].holders, vec!["dm-0"]);

        let geometry = devices["sda1"].partition.expect("geometry was readable");
        assert_eq!(geometry.number, 1);
        assert_eq!(geometry.start, 2048 * 512);
        assert_eq!(geometry.size, 2097152 * 512);
    }
}
