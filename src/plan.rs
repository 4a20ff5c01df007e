use std::collections::BTreeMap;

use log::debug;
use serde_yaml::Value;

use crate::errors::CurtinError;
use crate::storage::graph::ActionGraph;
use crate::storage::{Entry, StorageConfig, Zfs, Zpool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Materialize the entry on the host.
    Execute,

    /// The entry is preserved: compare on-disk state to the config and
    /// touch nothing.
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub kind: StepKind,
}

/// An ordered, executable rendition of the config.
///
/// `entries` is the parsed config plus any synthetic entries the
/// planner injects; steps refer into it by index.
#[derive(Debug)]
pub struct Plan {
    pub entries: Vec<Entry>,
    pub steps: Vec<Step>,
}

/// Topologically order the config and rewrite special cases:
/// preserved entries become verify-only steps, and a `zfsroot` format
/// expands into zpool + zfs actions against its parent volume.
pub fn build_plan(storage: &StorageConfig) -> Result<Plan, CurtinError> {
    let graph = ActionGraph::build(&storage.config)?;

    let mut entries = storage.config.clone();
    let mut steps = Vec::with_capacity(entries.len());

    for &index in graph.order() {
        if let Entry::Format(format) = &entries[index] {
            if format.fstype == "zfsroot" {
                expand_zfsroot(index, &mut entries, &mut steps);
                continue;
            }
        }

        let kind = match entries[index].preserve() {
            true => StepKind::Verify,
            false => StepKind::Execute,
        };

        steps.push(Step { index, kind });
    }

    debug!(
        "planned {} steps over {} entries",
        steps.len(),
        entries.len()
    );

    Ok(Plan { entries, steps })
}

// A zfsroot format stands for "put a root zpool here". The format
// entry itself runs no mkfs; instead a pool on the parent volume and a
// ROOT dataset that mounts at / are appended and executed in its place.
fn expand_zfsroot(format_index: usize, entries: &mut Vec<Entry>, steps: &mut Vec<Step>) {
    let Entry::Format(format) = entries[format_index].clone() else {
        return;
    };

    let zpool_id = format!("{}_rootpool", format.id);

    let mut root_properties: BTreeMap<String, Value> = BTreeMap::new();
    root_properties.insert(String::from("canmount"), Value::from("noauto"));
    root_properties.insert(String::from("mountpoint"), Value::from("/"));

    let zpool = Zpool {
        id: zpool_id.clone(),
        pool: String::from("rpool"),
        vdevs: vec![format.volume.clone()],
        mountpoint: Some(String::from("/")),
        pool_properties: BTreeMap::new(),
        fs_properties: BTreeMap::new(),
        default_features: None,
        encryption_style: None,
        keyfile: None,
    };

    let zfs = Zfs {
        id: format!("{}_rootfs", format.id),
        pool: zpool_id,
        volume: String::from("ROOT/zfsroot"),
        properties: root_properties,
    };

    let zpool_index = entries.len();
    entries.push(Entry::Zpool(zpool));
    steps.push(Step { index: zpool_index, kind: StepKind::Execute });

    let zfs_index = entries.len();
    entries.push(Entry::Zfs(zfs));
    steps.push(Step { index: zfs_index, kind: StepKind::Execute });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::parse;

    #[test]
    fn test_preserve_becomes_verify() {
        let yaml = r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt, preserve: true}
    - {type: partition, id: p1, device: disk0, size: 512M, preserve: true}
    - {type: partition, id: p2, device: disk0, size: 3G}
"#;
        let storage = parse(yaml).unwrap();
        let plan = build_plan(&storage).unwrap();

        let kinds: Vec<StepKind> = plan.steps.iter().map(|step| step.kind).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Verify, StepKind::Verify, StepKind::Execute]
        );
    }

    #[test]
    fn test_zfsroot_expansion() {
        let yaml = r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt}
    - {type: partition, id: p1, device: disk0, size: 9G}
    - {type: format, id: f1, volume: p1, fstype: zfsroot}
"#;
        let storage = parse(yaml).unwrap();
        let plan = build_plan(&storage).unwrap();

        // disk, partition, then the expanded zpool + zfs pair
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.entries.len(), 5);

        let Entry::Zpool(zpool) = &plan.entries[plan.steps[2].index] else {
            panic!("third step is not a zpool");
        };
        assert_eq!(zpool.pool, "rpool");
        assert_eq!(zpool.vdevs, vec!["p1"]);

        let Entry::Zfs(zfs) = &plan.entries[plan.steps[3].index] else {
            panic!("fourth step is not a zfs dataset");
        };
        assert_eq!(zfs.volume, "ROOT/zfsroot");

        // no step executes the original format entry
        assert!(plan
            .steps
            .iter()
            .all(|step| plan.entries[step.index].id() != "f1"));
    }
}
