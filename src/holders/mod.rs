pub mod shutdown;

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use serde::Serialize;

use crate::block;
use crate::errors::CurtinError;
use crate::probe::{mounts, DevType};

/// One node of the storage hierarchy above a base device.
///
/// The tree is rooted at the base device; `holders` are the devices
/// that depend on it (partitions of a disk, dm targets, md arrays,
/// bcache devices), straight from live sysfs relations.
#[derive(Debug, Clone, Serialize)]
pub struct HolderTree {
    pub kname: String,
    pub devpath: String,
    pub dev_type: DevType,
    pub holders: Vec<HolderTree>,
}

/// One step of a shutdown plan. `level` is the node's distance from the
/// base of its tree, maximized over all routes that reach it.
/// `Mount` steps additionally carry the mountpoint to unmount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub kname: String,
    pub devpath: String,
    pub dev_type: DevType,
    pub level: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
}

/// Classify a device for teardown purposes using sysfs alone:
/// dm targets expose their subsystem in `dm/uuid`, partitions carry a
/// `partition` attribute, md/bcache are recognized by kname.
pub fn identify(sysfs_root: &Path, kname: &str) -> DevType {
    let dev_dir = sysfs_root.join(kname);

    if dev_dir.join("partition").exists() {
        return DevType::Partition;
    }

    if kname.starts_with("bcache") {
        return DevType::Bcache;
    }

    if kname.starts_with("md") {
        return DevType::Raid;
    }

    if let Ok(uuid) = std::fs::read_to_string(dev_dir.join("dm/uuid")) {
        let uuid = uuid.trim();
        if uuid.starts_with("LVM") {
            return DevType::Lvm;
        }
        if uuid.starts_with("CRYPT") {
            return DevType::Crypt;
        }
        if uuid.starts_with("part") {
            return DevType::Partition;
        }
        if uuid.starts_with("mpath") {
            return DevType::Mpath;
        }
        return DevType::Other;
    }

    DevType::Disk
}

/// Build the holder tree rooted at `device`.
///
/// The holders of a node are the entries of its sysfs `holders/` dir
/// plus its partitions, so a tree rooted at a disk covers everything
/// stacked on the disk's partitions too.
pub fn gen_holders_tree(sysfs_root: &Path, device: &str) -> HolderTree {
    let kname = block::path_to_kname(device);
    let dev_dir = sysfs_root.join(&kname);

    let mut child_knames: Vec<String> = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dev_dir.join("holders")) {
        child_knames.extend(
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string()),
        );
    }

    child_knames.extend(block::sysfs_partitions(sysfs_root, &kname));
    child_knames.sort();
    child_knames.dedup();

    let holders = child_knames
        .iter()
        .map(|child| gen_holders_tree(sysfs_root, child))
        .collect();

    HolderTree {
        devpath: block::kname_to_path(&kname),
        dev_type: identify(sysfs_root, &kname),
        holders,
        kname,
    }
}

// Shutdown precedence on equal levels. Higher runs first. Live mounts
// outrank every device teardown; lv/vg/pv share the lvm tier because
// only the lv exists as a kernel block node (the vg and pv stages run
// inside its shutdown step, in that order).
fn type_rank(dev_type: DevType) -> usize {
    match dev_type {
        DevType::Mount => 8,
        DevType::Bcache => 7,
        DevType::Raid => 6,
        DevType::Lvm => 5,
        DevType::Crypt => 4,
        DevType::Mpath => 3,
        DevType::Partition => 2,
        DevType::Disk => 1,
        DevType::Other => 0,
    }
}

/// Flatten holder trees into a shutdown order.
///
/// Nodes reachable over several routes keep their highest level, and the
/// raise propagates to everything above them, so a device like a bcache
/// over an md array never sorts below the array just because its cache
/// route was shallow. Every device in `mounts` contributes one unmount
/// step per mountpoint at its own level; mount steps outrank everything
/// else there, so a busy filesystem is released before its device is
/// touched. Order: descending level, then type precedence, then kname,
/// then deepest mountpoint; planning the same trees twice yields
/// identical output.
pub fn plan_shutdown(
    trees: &[HolderTree],
    mounts: &mounts::MountTable,
) -> Vec<PlanEntry> {
    let mut levels: HashMap<String, (usize, DevType, String)> = HashMap::new();

    fn flatten(
        tree: &HolderTree,
        level: usize,
        levels: &mut HashMap<String, (usize, DevType, String)>,
    ) {
        let level = match levels.get(&tree.kname) {
            Some((seen, _, _)) => level.max(*seen),
            None => level,
        };

        levels.insert(
            tree.kname.clone(),
            (level, tree.dev_type, tree.devpath.clone()),
        );

        for holder in &tree.holders {
            flatten(holder, level + 1, levels);
        }
    }

    for tree in trees {
        flatten(tree, 0, &mut levels);
    }

    let mut plan: Vec<PlanEntry> = Vec::with_capacity(levels.len());

    for (kname, (level, dev_type, devpath)) in levels {
        for mountpoint in mounts.mountpoints(&kname) {
            plan.push(PlanEntry {
                kname: kname.clone(),
                devpath: devpath.clone(),
                dev_type: DevType::Mount,
                level,
                mountpoint: Some(mountpoint.clone()),
            });
        }

        plan.push(PlanEntry {
            kname,
            devpath,
            dev_type,
            level,
            mountpoint: None,
        });
    }

    plan.sort_by(|a, b| {
        b.level
            .cmp(&a.level)
            .then(type_rank(b.dev_type).cmp(&type_rank(a.dev_type)))
            .then(a.kname.cmp(&b.kname))
            // nested mounts unmount child-first
            .then(b.mountpoint.cmp(&a.mountpoint))
    });

    plan
}

/// ASCII diagram of a holder tree for diagnostics.
pub fn format_holders_tree(tree: &HolderTree) -> String {
    fn format(tree: &HolderTree) -> Vec<String> {
        let mut lines = vec![tree.kname.clone()];

        let count = tree.holders.len();
        for (holder_no, holder) in tree.holders.iter().enumerate() {
            let last = holder_no + 1 == count;
            let (head, tail) = match last {
                true => ("`-- ", "    "),
                false => ("|-- ", "|   "),
            };

            for (line_no, line) in format(holder).iter().enumerate() {
                let spacer = match line_no {
                    0 => head,
                    _ => tail,
                };
                lines.push(format!("{spacer}{line}"));
            }
        }

        lines
    }

    format(tree).join("\n")
}

/// Every (dev_type, kname) present in a tree.
pub fn holder_types(tree: &HolderTree) -> Vec<(DevType, String)> {
    let mut types = vec![(tree.dev_type, tree.kname.clone())];
    for holder in &tree.holders {
        types.extend(holder_types(holder));
    }
    types
}

/// Error unless nothing beyond bare disks and partitions remains above
/// the given devices.
pub fn assert_clear(sysfs_root: &Path, devices: &[String]) -> Result<(), CurtinError> {
    let base_knames: Vec<String> =
        devices.iter().map(|dev| block::path_to_kname(dev)).collect();

    for device in devices {
        let tree = gen_holders_tree(sysfs_root, device);

        let busy: Vec<(DevType, String)> = holder_types(&tree)
            .into_iter()
            .filter(|(dev_type, kname)| {
                !matches!(dev_type, DevType::Disk | DevType::Partition)
                    && !base_knames.contains(kname)
            })
            .collect();

        if !busy.is_empty() {
            return Err(CurtinError::HoldersNotClear(format!(
                "storage not clear on {device}, remaining:\n{}",
                format_holders_tree(&tree)
            )));
        }
    }

    Ok(())
}

/// Tear down everything stacked above the given base devices,
/// unmounting any live filesystems on the stack first.
pub fn clear_holders(
    ctx: &shutdown::ShutdownCtx,
    devices: &[String],
) -> Result<(), CurtinError> {
    shutdown::prepare_for_scan();

    let trees: Vec<HolderTree> = devices
        .iter()
        .map(|device| gen_holders_tree(&ctx.sysfs_root, device))
        .collect();

    for tree in &trees {
        info!("current device storage tree:\n{}", format_holders_tree(tree));
    }

    let mounts = mounts::load(&ctx.proc_mounts_path);
    let plan = plan_shutdown(&trees, &mounts);
    debug!("shutdown plan: {plan:?}");

    for entry in &plan {
        shutdown::shutdown_with_retry(ctx, entry)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(
        kname: &str,
        dev_type: DevType,
        holders: Vec<HolderTree>,
    ) -> HolderTree {
        HolderTree {
            kname: kname.to_string(),
            devpath: format!("/dev/{kname}"),
            dev_type,
            holders,
        }
    }

    fn no_mounts() -> mounts::MountTable {
        mounts::MountTable::default()
    }

    // disk -> partition -> bcache (backing), second disk -> bcache (cache),
    // and lvm on top of the bcache device.
    fn bcache_lvm_trees() -> Vec<HolderTree> {
        let lv = node("dm-0", DevType::Lvm, vec![]);
        let bcache_backing = node("bcache0", DevType::Bcache, vec![lv.clone()]);
        let bcache_cache = node("bcache0", DevType::Bcache, vec![lv]);

        let part = node("sda1", DevType::Partition, vec![bcache_backing]);
        let disk_a = node("sda", DevType::Disk, vec![part]);
        let disk_b = node("sdb", DevType::Disk, vec![bcache_cache]);

        vec![disk_a, disk_b]
    }

    #[test]
    fn test_plan_shutdown_levels() {
        let plan = plan_shutdown(&bcache_lvm_trees(), &no_mounts());

        let index_of = |kname: &str| -> usize {
            plan.iter().position(|entry| entry.kname == kname).unwrap()
        };

        // one entry per device even when reachable over two routes
        assert_eq!(plan.len(), 5);

        // every holder edge runs before its base
        assert!(index_of("dm-0") < index_of("bcache0"));
        assert!(index_of("bcache0") < index_of("sda1"));
        assert!(index_of("sda1") < index_of("sda"));
        assert!(index_of("bcache0") < index_of("sdb"));

        // the bcache device takes its deepest level (via sda1), not the
        // shallow cache route via sdb
        let bcache = plan.iter().find(|e| e.kname == "bcache0").unwrap();
        assert_eq!(bcache.level, 2);

        let lv = plan.iter().find(|e| e.kname == "dm-0").unwrap();
        assert_eq!(lv.level, 3);
    }

    #[test]
    fn test_plan_shutdown_edge_levels_monotonic() {
        let trees = bcache_lvm_trees();
        let plan = plan_shutdown(&trees, &no_mounts());

        fn edges(tree: &HolderTree, out: &mut Vec<(String, String)>) {
            for holder in &tree.holders {
                out.push((holder.kname.clone(), tree.kname.clone()));
                edges(holder, out);
            }
        }

        let mut all_edges = Vec::new();
        for tree in &trees {
            edges(tree, &mut all_edges);
        }

        let entry = |kname: &str| plan.iter().find(|e| e.kname == kname).unwrap();

        // for each holder edge a -> b: a shuts down first, from a level
        // at least as high
        for (holder, held) in all_edges {
            let a = entry(&holder);
            let b = entry(&held);
            let pos_a = plan.iter().position(|e| e == a).unwrap();
            let pos_b = plan.iter().position(|e| e == b).unwrap();

            assert!(pos_a < pos_b, "{} must precede {}", a.kname, b.kname);
            assert!(a.level >= b.level);
        }
    }

    #[test]
    fn test_plan_shutdown_idempotent() {
        let trees = bcache_lvm_trees();
        assert_eq!(
            plan_shutdown(&trees, &no_mounts()),
            plan_shutdown(&trees, &no_mounts())
        );
    }

    #[test]
    fn test_plan_shutdown_unmounts_first() {
        // re-install over a running lvm-on-bcache stack: the mounted
        // root lv is released before any device is torn down
        let mut mounts = mounts::MountTable::default();
        mounts.insert(String::from("dm-0"), String::from("/"));
        mounts.insert(String::from("dm-0"), String::from("/home"));

        let plan = plan_shutdown(&bcache_lvm_trees(), &mounts);

        // two unmount steps on top of the five device steps
        assert_eq!(plan.len(), 7);

        assert_eq!(plan[0].dev_type, DevType::Mount);
        assert_eq!(plan[0].kname, "dm-0");
        // nested mount goes before its parent
        assert_eq!(plan[0].mountpoint.as_deref(), Some("/home"));
        assert_eq!(plan[1].dev_type, DevType::Mount);
        assert_eq!(plan[1].mountpoint.as_deref(), Some("/"));

        // the lv's own teardown follows its unmounts, then the stack:
        // lv, bcache, partition, disks
        let knames: Vec<&str> = plan[2..]
            .iter()
            .map(|entry| entry.kname.as_str())
            .collect();
        assert_eq!(knames, vec!["dm-0", "bcache0", "sda1", "sda", "sdb"]);
        assert!(plan[2..].iter().all(|entry| entry.mountpoint.is_none()));
    }

    #[test]
    fn test_plan_shutdown_tie_break() {
        // equal-level raid and partition: raid first
        let raid = node("md0", DevType::Raid, vec![]);
        let part = node("sdb1", DevType::Partition, vec![]);
        let disk_a = node("sda", DevType::Disk, vec![raid]);
        let disk_b = node("sdb", DevType::Disk, vec![part]);

        let plan = plan_shutdown(&[disk_a, disk_b], &no_mounts());
        let knames: Vec<&str> =
            plan.iter().map(|entry| entry.kname.as_str()).collect();

        assert_eq!(knames, vec!["md0", "sdb1", "sda", "sdb"]);
    }

    #[test]
    fn test_format_holders_tree() {
        let tree = node(
            "sda",
            DevType::Disk,
            vec![
                node(
                    "sda1",
                    DevType::Partition,
                    vec![node("bcache0", DevType::Bcache, vec![])],
                ),
                node("sda2", DevType::Partition, vec![]),
            ],
        );

        let diagram = format_holders_tree(&tree);
        let expected = "\
sda
|-- sda1
|   `-- bcache0
`-- sda2";

        assert_eq!(diagram, expected);
    }

    #[test]
    fn test_gen_holders_tree_and_assert_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        // sda with sda1; dm-0 (crypt) holds sda1
        std::fs::create_dir_all(root.join("sda/holders")).unwrap();
        std::fs::create_dir_all(root.join("sda/sda1")).unwrap();
        std::fs::write(root.join("sda/sda1/partition"), "1\n").unwrap();
        std::fs::create_dir_all(root.join("sda1/holders/dm-0")).unwrap();
        std::fs::write(root.join("sda1/partition"), "1\n").unwrap();
        std::fs::create_dir_all(root.join("dm-0/holders")).unwrap();
        std::fs::create_dir_all(root.join("dm-0/dm")).unwrap();
        std::fs::write(root.join("dm-0/dm/uuid"), "CRYPT-LUKS2-abc-cryptroot\n")
            .unwrap();

        let tree = gen_holders_tree(root, "/dev/sda");
        assert_eq!(tree.kname, "sda");
        assert_eq!(tree.holders.len(), 1);
        assert_eq!(tree.holders[0].kname, "sda1");
        assert_eq!(tree.holders[0].dev_type, DevType::Partition);
        assert_eq!(tree.holders[0].holders[0].dev_type, DevType::Crypt);

        let err = assert_clear(root, &[String::from("/dev/sda")])
            .expect_err("crypt holder must fail assert_clear");
        assert_eq!(err.exit_code(), 3);

        // without the crypt device the stack is clear
        std::fs::remove_dir_all(root.join("sda1/holders/dm-0")).unwrap();
        assert_clear(root, &[String::from("/dev/sda")])
            .expect("disk with plain partition is clear");
    }
}
