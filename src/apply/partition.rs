use std::collections::HashSet;

use log::{debug, info};

use crate::apply::ApplyContext;
use crate::block;
use crate::block::wipe;
use crate::errors::CurtinError;
use crate::linux::{parted, resizefs, sfdisk, sgdisk, udev};
use crate::persist::dname::DnameRule;
use crate::persist::fstab::FstabEntry;
use crate::storage::{Entry, PTable, PartFlag, Partition, Wipe};
use crate::utils::shell;

const MIB: u64 = 1 << 20;

// MBR type bytes implied by flags; GPT equivalents come from
// sgdisk::flag_to_typecode.
const MBR_TYPE_SWAP: &str = "82";
const GPT_TYPE_SWAP: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";

/// A partition already present on the disk, reduced to what the
/// placement logic needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingPart {
    pub number: u32,
    pub start: u64,
    pub size: u64,
}

impl ExistingPart {
    fn end(&self) -> u64 {
        self.start + self.size
    }

    fn is_logical(&self) -> bool {
        self.number >= 5
    }
}

fn existing_parts(ctx: &ApplyContext, disk_kname: &str) -> Vec<ExistingPart> {
    let mut parts: Vec<ExistingPart> = ctx
        .snapshot
        .partitions_of(disk_kname)
        .iter()
        .filter_map(|record| {
            record.partition.map(|geometry| ExistingPart {
                number: geometry.number,
                start: geometry.start,
                size: geometry.size,
            })
        })
        .collect();

    parts.sort_by_key(|part| part.number);
    parts
}

/// Next partition number for a new partition.
/// Logical numbering starts at 5 and follows discovery order; the
/// config `number` is only honored for non-logical partitions.
pub fn next_number(
    existing: &[ExistingPart],
    logical: bool,
    configured: Option<u32>,
) -> u32 {
    match logical {
        true => 5 + existing.iter().filter(|part| part.is_logical()).count() as u32,
        false => match configured {
            Some(number) => number,
            None => {
                existing
                    .iter()
                    .filter(|part| !part.is_logical())
                    .map(|part| part.number)
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        },
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Start offset for a new partition placed after everything present.
///
/// Primary partitions go after the last non-logical partition; logical
/// partitions start 1 MiB into the extended partition (room for the
/// EBR) or 1 MiB past the previous logical.
pub fn next_start(
    existing: &[ExistingPart],
    logical: bool,
    extended: Option<&ExistingPart>,
) -> Result<u64, CurtinError> {
    if logical {
        let Some(extended) = extended else {
            return Err(CurtinError::BadConfig(String::from(
                "logical partition with no extended partition on disk",
            )));
        };

        let last_logical_end = existing
            .iter()
            .filter(|part| part.is_logical())
            .map(ExistingPart::end)
            .max();

        return Ok(match last_logical_end {
            Some(end) => align_up(end, MIB) + MIB,
            None => extended.start + MIB,
        });
    }

    let last_end = existing
        .iter()
        .filter(|part| !part.is_logical())
        .map(ExistingPart::end)
        .max()
        .unwrap_or(0);

    Ok(align_up(last_end.max(MIB), MIB))
}

pub fn handle(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    part: &Partition,
) -> Result<Option<String>, CurtinError> {
    let parent_devpath = ctx.device_path(&part.device)?;
    let parent_kname = block::path_to_kname(&parent_devpath);

    let table = ctx
        .snapshot
        .get(&parent_kname)
        .and_then(|record| record.ptable.as_deref())
        .map(parse_table)
        .unwrap_or(PTable::Gpt);

    if ctx.version == 2 {
        v2_reconcile_disk(ctx, entries, part, &parent_kname, &parent_devpath)?;
    }

    let logical = part.flag == Some(PartFlag::Logical);
    let existing = existing_parts(ctx, &parent_kname);

    // v2 keep: the declared offset already holds a partition
    if ctx.version == 2 {
        if let Some(offset) = part.offset {
            if let Some(found) =
                existing.iter().find(|p| p.start == offset.bytes()).copied()
            {
                let devpath = handle_existing(
                    ctx, part, table, &parent_kname, &parent_devpath, found,
                )?;
                finish(ctx, entries, part, &devpath)?;
                return Ok(Some(devpath));
            }
        }
    }

    if table == PTable::Vtoc {
        let number = next_number(&existing, false, part.number);
        write_vtoc_table(entries, part, &parent_devpath)?;
        udev::settle()?;

        let devpath =
            block::kname_to_path(&block::partition_kname(&parent_kname, number));
        finish(ctx, entries, part, &devpath)?;
        return Ok(Some(devpath));
    }

    let number = next_number(&existing, logical, part.number);
    let extended = existing
        .iter()
        .find(|p| !p.is_logical() && is_extended_slot(ctx, &parent_kname, p))
        .copied();

    let start = match (ctx.version, part.offset) {
        (2, Some(offset)) => offset.bytes(),
        _ => next_start(&existing, logical, extended.as_ref())?,
    };
    let end = start + part.size.bytes() - 1;

    let disk_size = ctx
        .snapshot
        .get(&parent_kname)
        .map(|record| record.size)
        .unwrap_or(u64::MAX);
    if end >= disk_size {
        return Err(CurtinError::BadConfig(format!(
            "partition {} ends at {end} beyond disk size {disk_size}",
            part.id
        )));
    }

    // Always clear the first MiB of the new partition's span before the
    // table entry exists, so stale signatures never surface
    wipe::zero_at_offsets(&parent_devpath, &[start as i64])?;

    let part_word = match (table, part.flag) {
        (PTable::Msdos, Some(PartFlag::Extended)) => "extended",
        (PTable::Msdos, Some(PartFlag::Logical)) => "logical",
        (PTable::Msdos, _) => "primary",
        // on gpt the word becomes the partition name
        (PTable::Gpt, _) => part.partition_name.as_deref().unwrap_or("primary"),
        // handled above
        (PTable::Vtoc, _) => unreachable!("vtoc partitions take the fdasd path"),
    };

    info!(
        "creating partition {number} on {parent_devpath} at {start}..{end} ({})",
        part.id
    );
    parted::mkpart(&parent_devpath, part_word, start, end)?;
    udev::settle()?;

    let devpath = block::kname_to_path(&block::partition_kname(&parent_kname, number));

    apply_partition_type(&parent_devpath, table, number, part)?;

    if let Some(attrs) = &part.attrs {
        if table == PTable::Gpt {
            sgdisk::set_attributes(&parent_devpath, number, attrs)?;
        }
    }

    if let Some(mode) = part.wipe {
        // the pre-create zero already covered the superblock window
        if mode != Wipe::Superblock {
            udev::settle()?;
            wipe::wipe_volume(&devpath, mode)?;
        }
    }

    finish(ctx, entries, part, &devpath)?;

    Ok(Some(devpath))
}

// A partition matched by offset in v2: kept in place, possibly resized,
// never recreated.
fn handle_existing(
    ctx: &mut ApplyContext,
    part: &Partition,
    table: PTable,
    parent_kname: &str,
    parent_devpath: &str,
    found: ExistingPart,
) -> Result<String, CurtinError> {
    let devpath =
        block::kname_to_path(&block::partition_kname(parent_kname, found.number));

    if part.preserve {
        if part.resize && part.size.bytes() != found.size {
            resize_partition(ctx, part, parent_devpath, &devpath, found)?;
        }
    } else {
        // slot is reused but the content is not
        wipe::zero_at_offsets(parent_devpath, &[found.start as i64])?;
        apply_partition_type(parent_devpath, table, found.number, part)?;
    }

    debug!("partition {} kept at offset {}", part.id, found.start);

    Ok(devpath)
}

fn resize_partition(
    ctx: &mut ApplyContext,
    part: &Partition,
    parent_devpath: &str,
    devpath: &str,
    found: ExistingPart,
) -> Result<(), CurtinError> {
    let fstype = ctx
        .snapshot
        .by_devpath(devpath)
        .and_then(|record| record.fstype.clone())
        .unwrap_or_default();

    if !resizefs::can_resize(&fstype) {
        return Err(CurtinError::BadConfig(format!(
            "partition {}: cannot resize filesystem {fstype:?}",
            part.id
        )));
    }

    let new_size = part.size.bytes();
    let shrink = new_size < found.size;
    info!(
        "resizing {devpath} ({fstype}) from {} to {new_size} bytes",
        found.size
    );

    if shrink {
        resizefs::resize(&fstype, devpath, new_size)?;
    }

    parted::rm(parent_devpath, found.number)?;
    parted::mkpart(
        parent_devpath,
        "primary",
        found.start,
        found.start + new_size - 1,
    )?;
    udev::settle()?;

    if !shrink {
        resizefs::resize(&fstype, devpath, new_size)?;
    }

    Ok(())
}

// v2 treats the config as the complete intended layout for the disk:
// on the first partition action per disk, every existing partition
// whose offset is not declared gets wiped and deleted. Offsets, not
// numbers, are the identity, so logical renumbering stays stable.
fn v2_reconcile_disk(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    part: &Partition,
    parent_kname: &str,
    parent_devpath: &str,
) -> Result<(), CurtinError> {
    let declared: HashSet<u64> = entries
        .iter()
        .filter_map(|entry| match entry {
            Entry::Partition(p) if p.device == part.device => {
                p.offset.map(|offset| offset.bytes())
            }
            _ => None,
        })
        .collect();

    if declared.is_empty() {
        return Ok(());
    }

    let stale = stale_partitions(&existing_parts(ctx, parent_kname), &declared);
    if stale.is_empty() {
        return Ok(());
    }

    for existing in stale {
        let devpath = block::kname_to_path(&block::partition_kname(
            parent_kname,
            existing.number,
        ));
        info!(
            "deleting partition {devpath} at undeclared offset {}",
            existing.start
        );

        wipe::zero_at_offsets(parent_devpath, &[existing.start as i64])?;
        parted::rm(parent_devpath, existing.number)?;
    }

    ctx.reprobe()
}

// ECKD 3390 geometry with 4k blocks: 12 blocks per track.
const VTOC_TRACK_BYTES: u64 = 4096 * 12;
const VTOC_FIRST_TRACK: u64 = 2;

// fdasd replaces the whole table from its config file, so each vtoc
// partition action rewrites the table with every partition declared up
// to and including itself, as consecutive track ranges.
fn write_vtoc_table(
    entries: &[Entry],
    current: &Partition,
    parent_devpath: &str,
) -> Result<(), CurtinError> {
    let mut lines = String::new();
    let mut track = VTOC_FIRST_TRACK;

    for entry in entries {
        let Entry::Partition(p) = entry else {
            continue;
        };
        if p.device != current.device {
            continue;
        }

        let tracks = p.size.bytes().div_ceil(VTOC_TRACK_BYTES);
        lines.push_str(&format!("[{},{}]\n", track, track + tracks - 1));
        track += tracks;

        if p.id == current.id {
            break;
        }
    }

    crate::linux::dasd::fdasd_partition(parent_devpath, &lines)
}

/// Partitions on disk whose offset is not declared in the config;
/// these are the v2 deletions. An existing partition is kept iff some
/// config action carries its exact offset. Returned in descending
/// number order so logical numbering collapses predictably.
pub fn stale_partitions(
    existing: &[ExistingPart],
    declared: &HashSet<u64>,
) -> Vec<ExistingPart> {
    let mut stale: Vec<ExistingPart> = existing
        .iter()
        .filter(|part| !declared.contains(&part.start))
        .copied()
        .collect();

    stale.sort_by_key(|part| std::cmp::Reverse(part.number));
    stale
}

// `partition_type` wins over `flag` when both are set.
fn apply_partition_type(
    parent_devpath: &str,
    table: PTable,
    number: u32,
    part: &Partition,
) -> Result<(), CurtinError> {
    if let Some(part_type) = &part.partition_type {
        return match table {
            PTable::Gpt => sgdisk::set_typecode(parent_devpath, number, part_type),
            _ => sfdisk::set_part_type(parent_devpath, number, part_type),
        };
    }

    let Some(flag) = part.flag else {
        return Ok(());
    };

    match (table, flag) {
        (_, PartFlag::Logical | PartFlag::Extended) => Ok(()),

        (_, PartFlag::BiosGrub) => parted::set_flag(parent_devpath, number, "bios_grub"),

        (PTable::Gpt, PartFlag::Boot) => {
            let esp = sgdisk::flag_to_typecode(PartFlag::Boot).expect("esp typecode");
            sgdisk::set_typecode(parent_devpath, number, esp)
        }
        (PTable::Msdos, PartFlag::Boot) => parted::set_flag(parent_devpath, number, "boot"),

        (PTable::Gpt, PartFlag::Swap) => {
            sgdisk::set_typecode(parent_devpath, number, GPT_TYPE_SWAP)
        }
        (PTable::Msdos, PartFlag::Swap) => {
            sfdisk::set_part_type(parent_devpath, number, MBR_TYPE_SWAP)
        }

        (PTable::Gpt, PartFlag::Home | PartFlag::Prep) => {
            let code = sgdisk::flag_to_typecode(flag).expect("typecode for flag");
            sgdisk::set_typecode(parent_devpath, number, code)
        }

        (_, PartFlag::Lvm) => parted::set_flag(parent_devpath, number, "lvm"),
        (_, PartFlag::Raid) => parted::set_flag(parent_devpath, number, "raid"),
        (_, PartFlag::Msftres) => parted::set_flag(parent_devpath, number, "msftres"),
        (_, PartFlag::Prep) => parted::set_flag(parent_devpath, number, "prep"),

        (PTable::Msdos, PartFlag::Home) => Ok(()),
        (PTable::Vtoc, _) => Ok(()),
    }
}

// Post-creation bookkeeping shared by all paths.
fn finish(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    part: &Partition,
    devpath: &str,
) -> Result<(), CurtinError> {
    if part.grub_device {
        ctx.grub_devices.push(devpath.to_string());
    }

    if let Some(name) = &part.name {
        if let Some(partuuid) = read_partuuid(devpath) {
            ctx.artifacts.dnames.push(DnameRule::Partition {
                name: name.clone(),
                partuuid,
            });
        }
    }

    // a swap-flagged partition with no format action still lands in
    // fstab; a formatted one is handled by its mount action instead
    let has_format = entries.iter().any(|entry| {
        matches!(entry, Entry::Format(format) if format.volume == part.id)
    });

    if part.flag == Some(PartFlag::Swap) && !has_format {
        ctx.artifacts.fstab.push(FstabEntry {
            spec: devpath.to_string(),
            path: String::from("none"),
            fstype: String::from("swap"),
            options: String::from("sw"),
            freq: 0,
            passno: 0,
        });
    }

    Ok(())
}

fn is_extended_slot(ctx: &ApplyContext, parent_kname: &str, part: &ExistingPart) -> bool {
    // extended partitions report a 1 KiB size in sysfs
    let _ = (ctx, parent_kname);
    part.size <= 2 * 1024
}

fn read_partuuid(devpath: &str) -> Option<String> {
    let out = shell::exec("blkid", &["-o", "value", "-s", "PARTUUID", devpath]).ok()?;
    let value = out.stdout.trim().to_string();
    match value.is_empty() {
        true => None,
        false => Some(value),
    }
}

fn parse_table(raw: &str) -> PTable {
    match raw {
        "dos" | "msdos" => PTable::Msdos,
        "vtoc" => PTable::Vtoc,
        _ => PTable::Gpt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(number: u32, start: u64, size: u64) -> ExistingPart {
        ExistingPart { number, start, size }
    }

    #[test]
    fn test_next_number() {
        struct Test<'a> {
            case: &'a str,
            existing: Vec<ExistingPart>,
            logical: bool,
            configured: Option<u32>,
            expected: u32,
        }

        let tests = vec![
            Test {
                case: "empty disk, first primary",
                existing: vec![],
                logical: false,
                configured: None,
                expected: 1,
            },
            Test {
                case: "two primaries, next",
                existing: vec![part(1, MIB, MIB), part(2, 2 * MIB, MIB)],
                logical: false,
                configured: None,
                expected: 3,
            },
            Test {
                case: "configured number wins for primaries",
                existing: vec![part(1, MIB, MIB)],
                logical: false,
                configured: Some(4),
                expected: 4,
            },
            Test {
                case: "first logical is 5 regardless of config",
                existing: vec![part(1, MIB, MIB), part(2, 2 * MIB, 1024)],
                logical: true,
                configured: Some(9),
                expected: 5,
            },
            Test {
                case: "second logical is 6",
                existing: vec![
                    part(1, MIB, MIB),
                    part(2, 2 * MIB, 1024),
                    part(5, 3 * MIB, 10 * MIB),
                ],
                logical: true,
                configured: None,
                expected: 6,
            },
        ];

        for test in tests {
            let result = next_number(&test.existing, test.logical, test.configured);
            assert_eq!(test.expected, result, "case: {}", test.case);
        }
    }

    #[test]
    fn test_next_start() {
        // empty disk: first partition at 1 MiB
        assert_eq!(next_start(&[], false, None).unwrap(), MIB);

        // after an existing primary, aligned up
        let existing = vec![part(1, MIB, 3 * MIB + 100)];
        assert_eq!(next_start(&existing, false, None).unwrap(), 5 * MIB);

        // first logical: 1 MiB into the extended partition
        let extended = part(2, 10 * MIB, 100 * MIB);
        let existing = vec![part(1, MIB, 9 * MIB), extended];
        assert_eq!(
            next_start(&existing, true, Some(&extended)).unwrap(),
            11 * MIB
        );

        // next logical: 1 MiB past the previous one
        let existing = vec![part(1, MIB, 9 * MIB), extended, part(5, 11 * MIB, 20 * MIB)];
        assert_eq!(
            next_start(&existing, true, Some(&extended)).unwrap(),
            32 * MIB
        );

        // logical without extended is an error
        next_start(&[], true, None).expect_err("logical needs extended");
    }

    #[test]
    fn test_existing_part_helpers() {
        assert!(part(5, 0, 0).is_logical());
        assert!(!part(4, 0, 0).is_logical());
        assert_eq!(part(1, MIB, MIB).end(), 2 * MIB);
    }

    #[test]
    fn test_stale_partitions_by_offset() {
        // msdos disk with an extended slot and two logicals; the new
        // layout declares only the second logical
        let existing = vec![
            part(1, MIB, 3074 * MIB),
            part(2, 3074 * MIB, 1024),
            part(5, 3075 * MIB, 2047 * MIB),
            part(6, 5123 * MIB, 2047 * MIB),
        ];

        let declared: HashSet<u64> =
            [MIB, 3074 * MIB, 5123 * MIB].into_iter().collect();

        let stale = stale_partitions(&existing, &declared);

        // only the undeclared logical is deleted, deepest number first
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].number, 5);
        assert_eq!(stale[0].start, 3075 * MIB);

        // the surviving logical's offset is untouched by the diff
        assert!(declared.contains(&existing[3].start));
    }

    #[test]
    fn test_stale_partitions_deletion_order() {
        let existing = vec![
            part(1, MIB, MIB),
            part(5, 10 * MIB, MIB),
            part(6, 20 * MIB, MIB),
        ];

        let stale = stale_partitions(&existing, &HashSet::new());
        let numbers: Vec<u32> = stale.iter().map(|part| part.number).collect();

        assert_eq!(numbers, vec![6, 5, 1]);
    }
}
