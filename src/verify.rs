use std::collections::BTreeSet;

use log::info;

use crate::apply::{disk, raid as raid_exec, ApplyContext};
use crate::block;
use crate::errors::CurtinError;
use crate::linux::{sfdisk, sgdisk};
use crate::probe::{bcache as bcache_probe, mdadm};
use crate::storage::{
    Bcache, DmCrypt, Entry, Format, LvmPartition, LvmVolGroup, PTable, PartFlag,
    Partition, Raid, RaidLevel,
};

// LVM rounds LV sizes up to the extent size.
const LVM_EXTENT: u64 = 4 << 20;

fn mismatch(id: &str, field: &str, expected: String, found: String) -> CurtinError {
    CurtinError::VerifyMismatch {
        id: id.to_string(),
        field: field.to_string(),
        expected,
        found,
    }
}

/// Compare a preserved entry against on-disk reality. Any divergence
/// from a declared field is fatal; preserve is a contract, not a hint.
pub fn verify_entry(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    index: usize,
) -> Result<Option<String>, CurtinError> {
    let entry = &entries[index];
    info!("verifying preserved {} ({})", entry.id(), entry.type_name());

    match entry {
        Entry::Disk(disk_entry) => verify_disk(ctx, disk_entry).map(Some),
        Entry::Device(device_entry) => {
            disk::locate_device(device_entry).map(Some)
        }
        Entry::Dasd(dasd_entry) => {
            let kname = crate::linux::dasd::device_id_to_kname(&dasd_entry.device_id)?;
            Ok(Some(block::kname_to_path(&kname)))
        }
        Entry::Partition(part) => verify_partition(ctx, entries, part).map(Some),
        Entry::Format(format_entry) => verify_format(ctx, format_entry).map(Some),
        Entry::LvmVolGroup(vg) => verify_volgroup(ctx, vg).map(Some),
        Entry::LvmPartition(lv) => verify_lv(ctx, entries, lv).map(Some),
        Entry::DmCrypt(crypt) => verify_dm_crypt(ctx, crypt).map(Some),
        Entry::Raid(raid_entry) => verify_raid(ctx, raid_entry).map(Some),
        Entry::Bcache(bcache_entry) => verify_bcache(ctx, bcache_entry),
        other => Err(CurtinError::BadConfig(format!(
            "{}(id={}) cannot be preserved",
            other.type_name(),
            other.id()
        ))),
    }
}

fn verify_disk(
    ctx: &mut ApplyContext,
    entry: &crate::storage::Disk,
) -> Result<String, CurtinError> {
    let devpath = disk::locate(&ctx.snapshot, entry)?;

    if entry.grub_device {
        ctx.grub_devices.push(devpath.clone());
    }

    if let Some(wanted) = entry.ptable {
        let kname = block::path_to_kname(&devpath);
        let found = ctx
            .snapshot
            .get(&kname)
            .and_then(|record| record.ptable.as_deref())
            .map(normalize_table)
            .unwrap_or(None);

        if found != Some(wanted) {
            return Err(mismatch(
                &entry.id,
                "ptable",
                wanted.to_string(),
                found.map(|t| t.to_string()).unwrap_or_else(|| String::from("none")),
            ));
        }
    }

    Ok(devpath)
}

fn normalize_table(raw: &str) -> Option<PTable> {
    match raw {
        "dos" | "msdos" => Some(PTable::Msdos),
        "gpt" => Some(PTable::Gpt),
        "vtoc" => Some(PTable::Vtoc),
        _ => None,
    }
}

fn verify_partition(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    part: &Partition,
) -> Result<String, CurtinError> {
    let parent_devpath = ctx.device_path(&part.device)?;
    let parent_kname = block::path_to_kname(&parent_devpath);

    let records = ctx.snapshot.partitions_of(&parent_kname);

    // v2 identity is the offset; v1 falls back to the configured number
    // or the entry's ordinal position on its disk
    let found = match (ctx.version, part.offset) {
        (2, Some(offset)) => records.iter().find(|record| {
            record.partition.map(|g| g.start) == Some(offset.bytes())
        }),
        _ => {
            let number = part.number.unwrap_or_else(|| ordinal_number(entries, part));
            records
                .iter()
                .find(|record| record.partition.map(|g| g.number) == Some(number))
        }
    };

    let Some(record) = found else {
        return Err(mismatch(
            &part.id,
            "existence",
            format!("partition on {parent_kname}"),
            String::from("not present"),
        ));
    };

    let Some(geometry) = record.partition else {
        return Err(mismatch(
            &part.id,
            "existence",
            format!("partition geometry for {}", record.kname),
            String::from("unreadable"),
        ));
    };

    if geometry.size != part.size.bytes() {
        return Err(mismatch(
            &part.id,
            "size",
            part.size.bytes().to_string(),
            geometry.size.to_string(),
        ));
    }

    if let Some(uuid) = &part.uuid {
        let found_uuid = record.partuuid.clone().unwrap_or_default();
        if !found_uuid.eq_ignore_ascii_case(uuid) {
            return Err(mismatch(&part.id, "uuid", uuid.clone(), found_uuid));
        }
    }

    let table = ctx
        .snapshot
        .get(&parent_kname)
        .and_then(|record| record.ptable.as_deref())
        .and_then(normalize_table)
        .unwrap_or(PTable::Gpt);

    verify_partition_type(ctx, part, table, &parent_devpath, geometry.number)?;

    if part.grub_device {
        ctx.grub_devices.push(record.devpath.clone());
    }

    Ok(record.devpath.clone())
}

// Position of this partition among its disk's config partitions, for
// preserve matching without explicit numbers.
fn ordinal_number(entries: &[Entry], part: &Partition) -> u32 {
    let mut number = 0;
    for entry in entries {
        if let Entry::Partition(p) = entry {
            if p.device == part.device {
                number += 1;
                if p.id == part.id {
                    break;
                }
            }
        }
    }
    number
}

fn verify_partition_type(
    ctx: &ApplyContext,
    part: &Partition,
    table: PTable,
    parent_devpath: &str,
    number: u32,
) -> Result<(), CurtinError> {
    let _ = ctx;

    match table {
        PTable::Gpt => {
            let expected_guid = part
                .partition_type
                .as_deref()
                .map(str::to_uppercase)
                .or_else(|| expected_gpt_typecode(part.flag).map(String::from));

            let needs_info = expected_guid.is_some()
                || part.partition_name.is_some()
                || part.attrs.is_some();
            if !needs_info {
                return Ok(());
            }

            let info = sgdisk::info(parent_devpath, number)?;

            if let Some(expected) = expected_guid {
                let found = info.type_guid.clone().unwrap_or_default();
                if found != expected {
                    return Err(mismatch(&part.id, "partition_type", expected, found));
                }
            }

            if let Some(expected) = &part.partition_name {
                let found = info.name.clone().unwrap_or_default();
                if &found != expected {
                    return Err(mismatch(
                        &part.id,
                        "partition_name",
                        expected.clone(),
                        found,
                    ));
                }
            }

            if let Some(attrs) = &part.attrs {
                let mut mask = 0u64;
                for attr in attrs {
                    if let Some(bit) = sgdisk::attr_bit(attr) {
                        mask |= 1 << bit;
                    }
                }

                if info.attrs & mask != mask {
                    return Err(mismatch(
                        &part.id,
                        "attrs",
                        format!("{mask:#018x}"),
                        format!("{:#018x}", info.attrs),
                    ));
                }
            }

            Ok(())
        }

        PTable::Msdos => {
            let expected = part
                .partition_type
                .as_deref()
                .map(|t| t.trim_start_matches("0x").to_lowercase())
                .or_else(|| match part.flag {
                    Some(PartFlag::Swap) => Some(String::from("82")),
                    _ => None,
                });

            let Some(expected) = expected else {
                return Ok(());
            };

            let found = sfdisk::get_part_type(parent_devpath, number)?;
            match found == expected {
                true => Ok(()),
                false => Err(mismatch(&part.id, "partition_type", expected, found)),
            }
        }

        PTable::Vtoc => Ok(()),
    }
}

fn expected_gpt_typecode(flag: Option<PartFlag>) -> Option<&'static str> {
    match flag? {
        PartFlag::Boot => Some("C12A7328-F81F-11D2-BA4B-00A0C93EC93B"),
        PartFlag::Swap => Some("0657FD6D-A4AB-43C4-84E5-0933C84B4F4F"),
        PartFlag::Home => Some("933AC7E1-2EB4-4F13-B844-0E14E2AEF915"),
        PartFlag::Prep => Some("9E1A2D38-C612-4316-AA26-8B49521E5A8B"),
        _ => None,
    }
}

fn verify_format(ctx: &ApplyContext, format: &Format) -> Result<String, CurtinError> {
    let devpath = ctx.device_path(&format.volume)?;

    let Some(record) = ctx.snapshot.by_devpath(&devpath) else {
        return Err(mismatch(
            &format.id,
            "existence",
            devpath.clone(),
            String::from("not present"),
        ));
    };

    let expected_fstype = normalize_fstype(&format.fstype);
    let found_fstype = record
        .fstype
        .as_deref()
        .map(normalize_fstype)
        .unwrap_or_default();

    if found_fstype != expected_fstype {
        return Err(mismatch(
            &format.id,
            "fstype",
            expected_fstype,
            found_fstype,
        ));
    }

    if let Some(uuid) = &format.uuid {
        let found = record.fs_uuid.clone().unwrap_or_default();
        if !found.eq_ignore_ascii_case(uuid) {
            return Err(mismatch(&format.id, "uuid", uuid.clone(), found));
        }
    }

    if let Some(label) = &format.label {
        let found = record.fs_label.clone().unwrap_or_default();
        if &found != label {
            return Err(mismatch(&format.id, "label", label.clone(), found));
        }
    }

    Ok(devpath)
}

fn normalize_fstype(fstype: &str) -> String {
    match fstype {
        "fat" | "fat12" | "fat16" | "fat32" => String::from("vfat"),
        other => other.to_string(),
    }
}

fn verify_volgroup(
    ctx: &ApplyContext,
    vg: &LvmVolGroup,
) -> Result<String, CurtinError> {
    if !ctx.snapshot.lvm.has_vg(&vg.name) {
        return Err(mismatch(
            &vg.id,
            "existence",
            format!("vg {}", vg.name),
            String::from("not present"),
        ));
    }

    let mut expected = BTreeSet::new();
    for device_id in &vg.devices {
        expected.insert(ctx.device_path(device_id)?);
    }

    let found: BTreeSet<String> = ctx
        .snapshot
        .lvm
        .vg_devices(&vg.name)
        .into_iter()
        .map(String::from)
        .collect();

    if expected != found {
        return Err(mismatch(
            &vg.id,
            "devices",
            format!("{expected:?}"),
            format!("{found:?}"),
        ));
    }

    Ok(format!("/dev/{}", vg.name))
}

fn verify_lv(
    ctx: &ApplyContext,
    entries: &[Entry],
    lv: &LvmPartition,
) -> Result<String, CurtinError> {
    let vg_name = entries
        .iter()
        .find_map(|entry| match entry {
            Entry::LvmVolGroup(vg) if vg.id == lv.volgroup => Some(vg.name.clone()),
            _ => None,
        })
        .ok_or_else(|| {
            CurtinError::CurtinRsBug(format!(
                "lvm_partition {} volgroup {:?} missing from plan",
                lv.id, lv.volgroup
            ))
        })?;

    let Some(info) = ctx.snapshot.lvm.lv(&vg_name, &lv.name) else {
        return Err(mismatch(
            &lv.id,
            "existence",
            format!("lv {}/{}", vg_name, lv.name),
            String::from("not present"),
        ));
    };

    if let Some(size) = lv.size {
        let wanted = size.bytes();
        // lvm rounds up to whole extents
        let matches = info.size >= wanted && info.size - wanted < LVM_EXTENT;
        if !matches {
            return Err(mismatch(
                &lv.id,
                "size",
                wanted.to_string(),
                info.size.to_string(),
            ));
        }
    }

    Ok(format!("/dev/{vg_name}/{}", lv.name))
}

fn verify_dm_crypt(ctx: &ApplyContext, crypt: &DmCrypt) -> Result<String, CurtinError> {
    let devpath = format!("/dev/mapper/{}", crypt.dm_name);

    let resolved = std::fs::canonicalize(&devpath).map_err(|_| {
        mismatch(
            &crypt.id,
            "existence",
            devpath.clone(),
            String::from("not present"),
        )
    })?;

    let kname = block::path_to_kname(&resolved.display().to_string());

    let uuid_path = ctx.sysfs_root.join(&kname).join("dm/uuid");
    let dm_uuid = std::fs::read_to_string(uuid_path).unwrap_or_default();
    if !dm_uuid.trim().starts_with("CRYPT") {
        return Err(mismatch(
            &crypt.id,
            "dm_target",
            String::from("CRYPT-*"),
            dm_uuid.trim().to_string(),
        ));
    }

    // the mapping must sit on the declared volume
    let volume_path = ctx.device_path(&crypt.volume)?;
    let volume_kname = block::path_to_kname(&volume_path);
    let slaves = mdadm::member_devices(&ctx.sysfs_root, &kname);

    if !slaves.iter().any(|slave| slave == &volume_kname) {
        return Err(mismatch(
            &crypt.id,
            "volume",
            volume_kname,
            format!("{slaves:?}"),
        ));
    }

    Ok(devpath)
}

fn verify_raid(ctx: &ApplyContext, raid: &Raid) -> Result<String, CurtinError> {
    let devpath = raid_exec::md_devpath(&raid.name);

    let resolved = std::fs::canonicalize(&devpath).map_err(|_| {
        mismatch(
            &raid.id,
            "existence",
            devpath.clone(),
            String::from("not present"),
        )
    })?;
    let resolved = resolved.display().to_string();

    let detail = mdadm::detail(&resolved)?;

    let expected_level = match raid.raidlevel {
        RaidLevel::Container => String::from("container"),
        level => format!("raid{}", level.as_mdadm_arg()),
    };
    let found_level = detail.level.clone().unwrap_or_default();
    if found_level != expected_level {
        return Err(mismatch(&raid.id, "raidlevel", expected_level, found_level));
    }

    if let Some(metadata) = &raid.metadata {
        if metadata != "default" {
            let found = detail.metadata.clone().unwrap_or_default();
            if &found != metadata {
                return Err(mismatch(
                    &raid.id,
                    "metadata",
                    metadata.clone(),
                    found,
                ));
            }
        }
    }

    let expected_devices = expected_member_set(ctx, &raid.devices)?;
    let found_devices = canonical_set(detail.active_devices());
    if expected_devices != found_devices {
        return Err(mismatch(
            &raid.id,
            "devices",
            format!("{expected_devices:?}"),
            format!("{found_devices:?}"),
        ));
    }

    let expected_spares = expected_member_set(ctx, &raid.spare_devices)?;
    let found_spares = canonical_set(detail.spare_devices());
    if expected_spares != found_spares {
        return Err(mismatch(
            &raid.id,
            "spare_devices",
            format!("{expected_spares:?}"),
            format!("{found_spares:?}"),
        ));
    }

    Ok(devpath)
}

fn expected_member_set(
    ctx: &ApplyContext,
    ids: &[String],
) -> Result<BTreeSet<String>, CurtinError> {
    let mut set = BTreeSet::new();
    for id in ids {
        set.insert(ctx.device_path(id)?);
    }
    Ok(set)
}

fn canonical_set<'a>(paths: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    paths
        .into_iter()
        .map(|path| {
            std::fs::canonicalize(path)
                .map(|resolved| resolved.display().to_string())
                .unwrap_or_else(|_| path.to_string())
        })
        .collect()
}

fn verify_bcache(
    ctx: &mut ApplyContext,
    entry: &Bcache,
) -> Result<Option<String>, CurtinError> {
    let Some(backing_id) = &entry.backing_device else {
        // cache-only entries leave nothing verifiable behind
        return Ok(None);
    };

    let backing_path = ctx.device_path(backing_id)?;
    let backing_kname = block::path_to_kname(&backing_path);

    let Some(bcache_kname) =
        crate::apply::bcache::find_bcache_for(&ctx.sysfs_root, &backing_kname)
    else {
        return Err(mismatch(
            &entry.id,
            "backing_device",
            format!("bcache over {backing_kname}"),
            String::from("not present"),
        ));
    };

    if entry.cache_device.is_some()
        && !bcache_probe::has_cache_attached(&ctx.sysfs_root, &bcache_kname)
    {
        return Err(mismatch(
            &entry.id,
            "cache_device",
            String::from("cache set attached"),
            String::from("no cache attached"),
        ));
    }

    if let Some(mode) = entry.cache_mode {
        let found = bcache_probe::cache_mode(&ctx.sysfs_root, &bcache_kname)?;
        if found != mode.to_string() {
            return Err(mismatch(&entry.id, "cache_mode", mode.to_string(), found));
        }
    }

    Ok(Some(block::kname_to_path(&bcache_kname)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_table() {
        assert_eq!(normalize_table("dos"), Some(PTable::Msdos));
        assert_eq!(normalize_table("msdos"), Some(PTable::Msdos));
        assert_eq!(normalize_table("gpt"), Some(PTable::Gpt));
        assert_eq!(normalize_table("unknown"), None);
    }

    #[test]
    fn test_expected_gpt_typecode() {
        assert_eq!(
            expected_gpt_typecode(Some(PartFlag::Boot)),
            Some("C12A7328-F81F-11D2-BA4B-00A0C93EC93B")
        );
        assert_eq!(expected_gpt_typecode(Some(PartFlag::Lvm)), None);
        assert_eq!(expected_gpt_typecode(None), None);
    }

    #[test]
    fn test_mismatch_exit_code() {
        let err = mismatch("p1", "size", String::from("1"), String::from("2"));
        assert_eq!(err.exit_code(), 4);

        let CurtinError::VerifyMismatch { field, .. } = err else {
            panic!("wrong variant");
        };
        assert_eq!(field, "size");
    }
}
