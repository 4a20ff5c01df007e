use std::collections::{HashMap, HashSet};

use crate::errors::CurtinError;
use crate::storage::{
    DasdLayout, DmCrypt, Entry, PTable, PartFlag, RaidLevel, Size, StorageConfig,
};

const MIB: u64 = 1 << 20;

// DASD volume labels the hardware reserves for itself.
const RESERVED_DASD_LABELS: [&str; 3] = ["MIGRAT", "SCRTCH", "PRIVAT"];

/// Structural validation of a parsed storage document.
///
/// Everything here runs before any device is touched: id uniqueness,
/// reference resolution, per-type field rules, and the msdos partition
/// bookkeeping. Graph acyclicity is checked separately when the action
/// graph is built.
pub fn validate(storage: &StorageConfig) -> Result<(), CurtinError> {
    let by_id = collect_ids(&storage.config)?;

    validate_references(&storage.config, &by_id)?;

    for entry in &storage.config {
        match entry {
            Entry::Partition(_) => {} // validated per disk below
            Entry::Format(format) => validate_format(format, &by_id)?,
            Entry::Mount(mount) => validate_mount(mount, &by_id)?,
            Entry::DmCrypt(crypt) => validate_dm_crypt(crypt)?,
            Entry::Raid(raid) => validate_raid(raid)?,
            Entry::Bcache(bcache) => validate_bcache(bcache)?,
            Entry::Dasd(dasd) => validate_dasd(dasd)?,
            Entry::Zpool(zpool) => validate_zpool(zpool)?,
            _ => {}
        }
    }

    validate_partitions(&storage.config, &by_id, storage.version)?;

    Ok(())
}

fn collect_ids<'a>(
    config: &'a [Entry],
) -> Result<HashMap<&'a str, &'a Entry>, CurtinError> {
    let mut by_id = HashMap::new();

    for entry in config {
        if entry.id().is_empty() {
            return Err(CurtinError::BadConfig(format!(
                "{} entry with empty id",
                entry.type_name()
            )));
        }

        if by_id.insert(entry.id(), entry).is_some() {
            return Err(CurtinError::BadConfig(format!(
                "duplicate id {:?}",
                entry.id()
            )));
        }
    }

    Ok(by_id)
}

// Which entry types each type may reference. An edge outside this matrix
// is a config the executors cannot build.
fn allowed_deps(entry_type: &str) -> &'static [&'static str] {
    match entry_type {
        "bcache" | "dm_crypt" | "format" | "raid" => &[
            "bcache", "device", "disk", "dm_crypt", "lvm_partition",
            "partition", "raid",
        ],
        "disk" => &["dasd", "nvme_controller"],
        "lvm_partition" => &["lvm_volgroup"],
        "lvm_volgroup" => &["bcache", "device", "disk", "dm_crypt", "partition", "raid"],
        "mount" => &["format"],
        "partition" => &["bcache", "device", "disk", "raid", "partition"],
        "zfs" => &["zpool"],
        "zpool" => &["disk", "partition"],
        _ => &[],
    }
}

fn validate_references(
    config: &[Entry],
    by_id: &HashMap<&str, &Entry>,
) -> Result<(), CurtinError> {
    for entry in config {
        for dep in entry.deps() {
            let Some(target) = by_id.get(dep) else {
                return Err(CurtinError::BadConfig(format!(
                    "{}(id={}) references unknown id {dep:?}",
                    entry.type_name(),
                    entry.id(),
                )));
            };

            let allowed = allowed_deps(entry.type_name());
            if !allowed.contains(&target.type_name()) {
                return Err(CurtinError::BadConfig(format!(
                    "{}(id={}) cannot depend upon {}(id={})",
                    entry.type_name(),
                    entry.id(),
                    target.type_name(),
                    target.id(),
                )));
            }
        }
    }

    Ok(())
}

fn validate_format(
    format: &crate::storage::Format,
    by_id: &HashMap<&str, &Entry>,
) -> Result<(), CurtinError> {
    if format.fstype.is_empty() {
        return Err(CurtinError::BadConfig(format!(
            "format {} has empty fstype",
            format.id
        )));
    }

    // bios_grub partitions hold raw bootloader code, never a filesystem
    if let Some(Entry::Partition(part)) = by_id.get(format.volume.as_str()) {
        if part.flag == Some(PartFlag::BiosGrub) {
            return Err(CurtinError::BadConfig(format!(
                "format {} targets bios_grub partition {}",
                format.id, part.id
            )));
        }
    }

    Ok(())
}

fn validate_mount(
    mount: &crate::storage::Mount,
    by_id: &HashMap<&str, &Entry>,
) -> Result<(), CurtinError> {
    if mount.device.is_none() && mount.spec.is_none() {
        return Err(CurtinError::BadConfig(format!(
            "mount {} has neither device nor spec",
            mount.id
        )));
    }

    if let Some(device) = &mount.device {
        let Some(Entry::Format(format)) = by_id.get(device.as_str()) else {
            return Err(CurtinError::BadConfig(format!(
                "mount {} device {device:?} is not a format entry",
                mount.id
            )));
        };

        // Swap goes to fstab without a mountpoint
        if format.fstype == "swap" && mount.path.is_some() {
            return Err(CurtinError::BadConfig(format!(
                "mount {} gives a path to a swap filesystem",
                mount.id
            )));
        }

        if format.fstype != "swap" && mount.path.is_none() {
            return Err(CurtinError::BadConfig(format!(
                "mount {} has no path",
                mount.id
            )));
        }
    }

    Ok(())
}

fn validate_dm_crypt(crypt: &DmCrypt) -> Result<(), CurtinError> {
    match (&crypt.key, &crypt.keyfile) {
        (Some(_), Some(_)) => Err(CurtinError::BadConfig(format!(
            "dm_crypt {} has both key and keyfile",
            crypt.id
        ))),
        (None, None) => Err(CurtinError::BadConfig(format!(
            "dm_crypt {} needs exactly one of key or keyfile",
            crypt.id
        ))),
        _ => Ok(()),
    }
}

fn validate_raid(raid: &crate::storage::Raid) -> Result<(), CurtinError> {
    if raid.devices.is_empty() && raid.container.is_none() {
        return Err(CurtinError::BadConfig(format!(
            "raid {} has no devices and no container",
            raid.id
        )));
    }

    if raid.raidlevel == RaidLevel::Container && raid.devices.is_empty() {
        return Err(CurtinError::BadConfig(format!(
            "raid container {} has no member devices",
            raid.id
        )));
    }

    Ok(())
}

fn validate_bcache(bcache: &crate::storage::Bcache) -> Result<(), CurtinError> {
    if bcache.backing_device.is_none() && bcache.cache_device.is_none() {
        return Err(CurtinError::BadConfig(format!(
            "bcache {} has neither backing_device nor cache_device",
            bcache.id
        )));
    }

    Ok(())
}

fn validate_dasd(dasd: &crate::storage::Dasd) -> Result<(), CurtinError> {
    if let Some(blocksize) = dasd.blocksize {
        if !matches!(blocksize, 512 | 1024 | 2048 | 4096) {
            return Err(CurtinError::BadConfig(format!(
                "dasd {} has invalid blocksize {blocksize}",
                dasd.id
            )));
        }
    }

    if let Some(label) = &dasd.label {
        validate_dasd_label(&dasd.id, label)?;
    }

    if dasd.disk_layout == Some(DasdLayout::Ldl) && dasd.preserve {
        // LDL disks carry no partition table to preserve against
        return Err(CurtinError::BadConfig(format!(
            "dasd {} cannot preserve an ldl layout",
            dasd.id
        )));
    }

    Ok(())
}

// Labels are 6 chars of EBCDIC-convertible ASCII; a handful of values
// (and the L?????  pattern) are reserved by z/OS tooling.
fn validate_dasd_label(id: &str, label: &str) -> Result<(), CurtinError> {
    if label.len() > 6 || !label.is_ascii() {
        return Err(CurtinError::BadConfig(format!(
            "dasd {id} label {label:?} is not 6-char ASCII"
        )));
    }

    let upper = label.to_uppercase();
    if RESERVED_DASD_LABELS.contains(&upper.as_str())
        || (upper.len() == 6 && upper.starts_with('L'))
    {
        return Err(CurtinError::BadConfig(format!(
            "dasd {id} label {label:?} is reserved"
        )));
    }

    Ok(())
}

fn validate_zpool(zpool: &crate::storage::Zpool) -> Result<(), CurtinError> {
    if zpool.vdevs.is_empty() {
        return Err(CurtinError::BadConfig(format!(
            "zpool {} has no vdevs",
            zpool.id
        )));
    }

    Ok(())
}

// Per-disk partition bookkeeping. For msdos: at most 4 primary/extended
// slots, a unique extended partition, logicals only inside one. For v2,
// any declared offsets must not overlap.
fn validate_partitions(
    config: &[Entry],
    by_id: &HashMap<&str, &Entry>,
    version: u32,
) -> Result<(), CurtinError> {
    let mut parts_by_disk: HashMap<&str, Vec<&crate::storage::Partition>> =
        HashMap::new();

    for entry in config {
        let Entry::Partition(part) = entry else {
            continue;
        };

        if part.resize && !part.preserve {
            return Err(CurtinError::BadConfig(format!(
                "partition {} has resize without preserve",
                part.id
            )));
        }

        if part.flag == Some(PartFlag::BiosGrub) && part.size != Size(MIB) {
            return Err(CurtinError::BadConfig(format!(
                "bios_grub partition {} must be 1M, got {}",
                part.id, part.size
            )));
        }

        parts_by_disk.entry(part.device.as_str()).or_default().push(part);
    }

    for (disk_id, parts) in parts_by_disk {
        let ptable = match by_id.get(disk_id) {
            Some(Entry::Disk(disk)) => disk.ptable,
            Some(Entry::Raid(raid)) => raid.ptable,
            Some(Entry::Device(device)) => device.ptable,
            // partition-on-partition is the msdos logical case
            Some(Entry::Partition(_)) | Some(Entry::Bcache(_)) => None,
            _ => None,
        };

        if ptable == Some(PTable::Msdos) {
            validate_msdos_slots(disk_id, &parts)?;
        }

        if ptable == Some(PTable::Gpt) {
            for part in &parts {
                if matches!(
                    part.flag,
                    Some(PartFlag::Logical) | Some(PartFlag::Extended)
                ) {
                    return Err(CurtinError::BadConfig(format!(
                        "partition {} uses flag {:?} on a gpt disk",
                        part.id, part.flag
                    )));
                }
            }
        }

        if version == 2 {
            validate_offsets(disk_id, &parts)?;
        }
    }

    Ok(())
}

fn validate_msdos_slots(
    disk_id: &str,
    parts: &[&crate::storage::Partition],
) -> Result<(), CurtinError> {
    let mut primaries = 0usize;
    let mut extended = 0usize;
    let mut logicals = 0usize;

    for part in parts {
        match part.flag {
            Some(PartFlag::Extended) => {
                extended += 1;
                primaries += 1;
            }
            Some(PartFlag::Logical) => logicals += 1,
            _ => primaries += 1,
        }
    }

    if extended > 1 {
        return Err(CurtinError::BadConfig(format!(
            "disk {disk_id}: more than one extended partition"
        )));
    }

    if primaries > 4 {
        return Err(CurtinError::BadConfig(format!(
            "disk {disk_id}: msdos table holds at most 4 primary partitions, \
             got {primaries}"
        )));
    }

    if logicals > 0 && extended == 0 {
        return Err(CurtinError::BadConfig(format!(
            "disk {disk_id}: logical partitions without an extended partition"
        )));
    }

    Ok(())
}

// v2 places partitions by offset; overlapping declarations are a config
// error, not something to discover at parted time.
fn validate_offsets(
    disk_id: &str,
    parts: &[&crate::storage::Partition],
) -> Result<(), CurtinError> {
    let mut spans: Vec<(u64, u64, &str)> = Vec::new();

    for part in parts {
        let Some(offset) = part.offset else {
            continue;
        };

        // Logical partitions live inside the extended span
        if part.flag == Some(PartFlag::Logical) {
            continue;
        }

        spans.push((offset.bytes(), part.size.bytes(), &part.id));
    }

    spans.sort();

    for pair in spans.windows(2) {
        let (a_start, a_size, a_id) = pair[0];
        let (b_start, _, b_id) = pair[1];

        if a_start + a_size > b_start {
            return Err(CurtinError::BadConfig(format!(
                "disk {disk_id}: partitions {a_id} and {b_id} overlap"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::parse;

    fn validate_yaml(yaml: &str) -> Result<(), CurtinError> {
        validate(&parse(yaml)?)
    }

    #[test]
    fn test_validate() {
        struct Test<'a> {
            case: &'a str,
            yaml: &'a str,
            expect_err: bool,
        }

        let tests = vec![
            Test {
                case: "duplicate ids",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda}
    - {type: disk, id: disk0, path: /dev/sdb}
"#,
                expect_err: true,
            },
            Test {
                case: "unresolved reference",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: partition, id: p1, device: nosuch, size: 1G}
"#,
                expect_err: true,
            },
            Test {
                case: "mount on non-format",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda}
    - {type: mount, id: m0, device: disk0, path: /}
"#,
                expect_err: true,
            },
            Test {
                case: "dm_crypt with both key and keyfile",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda}
    - type: dm_crypt
      id: crypt0
      volume: disk0
      dm_name: cryptroot
      key: hunter2
      keyfile: /keys/root
"#,
                expect_err: true,
            },
            Test {
                case: "raid without devices",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: raid, id: md0, name: md0, raidlevel: 1}
"#,
                expect_err: true,
            },
            Test {
                case: "five msdos primaries",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: msdos}
    - {type: partition, id: p1, device: disk0, size: 1G}
    - {type: partition, id: p2, device: disk0, size: 1G}
    - {type: partition, id: p3, device: disk0, size: 1G}
    - {type: partition, id: p4, device: disk0, size: 1G}
    - {type: partition, id: p5, device: disk0, size: 1G}
"#,
                expect_err: true,
            },
            Test {
                case: "logical without extended",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: msdos}
    - {type: partition, id: p5, device: disk0, size: 1G, flag: logical}
"#,
                expect_err: true,
            },
            Test {
                case: "v2 overlapping offsets",
                yaml: r#"
storage:
  version: 2
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt}
    - {type: partition, id: p1, device: disk0, size: 2G, offset: 1M}
    - {type: partition, id: p2, device: disk0, size: 1G, offset: 1G}
"#,
                expect_err: true,
            },
            Test {
                case: "resize without preserve",
                yaml: r#"
storage:
  version: 2
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt}
    - {type: partition, id: p1, device: disk0, size: 2G, resize: true}
"#,
                expect_err: true,
            },
            Test {
                case: "swap mount with path",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt}
    - {type: partition, id: p1, device: disk0, size: 2G}
    - {type: format, id: f1, volume: p1, fstype: swap}
    - {type: mount, id: m1, device: f1, path: /}
"#,
                expect_err: true,
            },
            Test {
                case: "valid msdos extended plus logicals",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: msdos}
    - {type: partition, id: p1, device: disk0, size: 1G}
    - {type: partition, id: p2, device: disk0, size: 8G, flag: extended}
    - {type: partition, id: p5, device: disk0, size: 2G, flag: logical}
    - {type: partition, id: p6, device: disk0, size: 2G, flag: logical}
"#,
                expect_err: false,
            },
            Test {
                case: "valid raid1 with spares",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda}
    - {type: disk, id: disk1, path: /dev/sdb}
    - {type: disk, id: disk2, path: /dev/sdc}
    - type: raid
      id: md0
      name: md0
      raidlevel: 1
      devices: [disk0, disk1]
      spare_devices: [disk2]
"#,
                expect_err: false,
            },
            Test {
                case: "valid swap without mount path",
                yaml: r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt}
    - {type: partition, id: p1, device: disk0, size: 2G, flag: swap}
    - {type: format, id: f1, volume: p1, fstype: swap}
    - {type: mount, id: m1, device: f1}
"#,
                expect_err: false,
            },
        ];

        for test in tests {
            let result = validate_yaml(test.yaml);
            match test.expect_err {
                true => {
                    result.expect_err(&format!("{}: expected error", test.case));
                }
                false => {
                    result.unwrap_or_else(|err| {
                        panic!("{}: unexpected error {err:?}", test.case)
                    });
                }
            }
        }
    }

    #[test]
    fn test_dasd_labels() {
        let reserved = vec!["MIGRAT", "SCRTCH", "PRIVAT", "LABCDE", "migrat"];
        for label in reserved {
            validate_dasd_label("dasd0", label)
                .expect_err(&format!("{label:?} must be rejected"));
        }

        validate_dasd_label("dasd0", "ROOT01").expect("ROOT01 is valid");
        validate_dasd_label("dasd0", "0X5D30").expect("0X5D30 is valid");
    }
}
