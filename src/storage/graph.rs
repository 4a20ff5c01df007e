use std::collections::HashMap;

use crate::errors::CurtinError;
use crate::storage::Entry;

/// The dependency graph over config entries.
///
/// Nodes are indexes into the original config vector; edges are the id
/// references between entries. Entries are never linked by pointer, only
/// by index, so the graph is trivially owned by the config it describes.
#[derive(Debug)]
pub struct ActionGraph {
    /// deps[i] holds the indexes entry i depends on.
    deps: Vec<Vec<usize>>,

    /// Topological order: every entry appears after all of its deps.
    /// Ties keep the original config order.
    order: Vec<usize>,
}

impl ActionGraph {
    pub fn build(config: &[Entry]) -> Result<Self, CurtinError> {
        let index_of: HashMap<&str, usize> = config
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.id(), i))
            .collect();

        let mut deps = Vec::with_capacity(config.len());
        for entry in config {
            let mut entry_deps = Vec::new();
            for dep in entry.deps() {
                let Some(&at) = index_of.get(dep) else {
                    return Err(CurtinError::BadConfig(format!(
                        "{}(id={}) references unknown id {dep:?}",
                        entry.type_name(),
                        entry.id(),
                    )));
                };
                entry_deps.push(at);
            }
            deps.push(entry_deps);
        }

        let order = toposort(config, &deps)?;

        Ok(Self { deps, order })
    }

    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[inline]
    pub fn deps_of(&self, index: usize) -> &[usize] {
        &self.deps[index]
    }
}

// Kahn's algorithm, restarted from the front of the list on every pick so
// that ready entries run in config order. Quadratic, but configs are tiny.
fn toposort(config: &[Entry], deps: &[Vec<usize>]) -> Result<Vec<usize>, CurtinError> {
    let mut placed = vec![false; config.len()];
    let mut order = Vec::with_capacity(config.len());

    while order.len() < config.len() {
        let mut advanced = false;

        for i in 0..config.len() {
            if placed[i] {
                continue;
            }

            if deps[i].iter().all(|&dep| placed[dep]) {
                placed[i] = true;
                order.push(i);
                advanced = true;
            }
        }

        if !advanced {
            let stuck: Vec<&str> = config
                .iter()
                .enumerate()
                .filter(|(i, _)| !placed[*i])
                .map(|(_, entry)| entry.id())
                .collect();

            return Err(CurtinError::BadConfig(format!(
                "circular references among entries: {}",
                stuck.join(", ")
            )));
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::parse;

    #[test]
    fn test_toposort_chain() {
        // Entries deliberately listed in reverse dependency order
        let yaml = r#"
storage:
  version: 1
  config:
    - {type: mount, id: m0, device: f0, path: /}
    - {type: format, id: f0, volume: p0, fstype: ext4}
    - {type: partition, id: p0, device: disk0, size: 3G}
    - {type: disk, id: disk0, path: /dev/sda, ptable: gpt}
"#;
        let storage = parse(yaml).unwrap();
        let graph = ActionGraph::build(&storage.config).unwrap();

        let ids: Vec<&str> = graph
            .order()
            .iter()
            .map(|&i| storage.config[i].id())
            .collect();

        assert_eq!(ids, vec!["disk0", "p0", "f0", "m0"]);
    }

    #[test]
    fn test_toposort_stable_ties() {
        let yaml = r#"
storage:
  version: 1
  config:
    - {type: disk, id: diskb, path: /dev/sdb}
    - {type: disk, id: diska, path: /dev/sda}
    - {type: partition, id: pb1, device: diskb, size: 1G}
    - {type: partition, id: pa1, device: diska, size: 1G}
"#;
        let storage = parse(yaml).unwrap();
        let graph = ActionGraph::build(&storage.config).unwrap();

        let ids: Vec<&str> = graph
            .order()
            .iter()
            .map(|&i| storage.config[i].id())
            .collect();

        // Ready entries keep their config order
        assert_eq!(ids, vec!["diskb", "diska", "pb1", "pa1"]);
    }

    #[test]
    fn test_toposort_idempotent() {
        let yaml = r#"
storage:
  version: 1
  config:
    - {type: disk, id: disk0, path: /dev/sda}
    - {type: disk, id: disk1, path: /dev/sdb}
    - type: raid
      id: md0
      name: md0
      raidlevel: 1
      devices: [disk0, disk1]
    - {type: format, id: f0, volume: md0, fstype: ext4}
"#;
        let storage = parse(yaml).unwrap();
        let first = ActionGraph::build(&storage.config).unwrap();
        let second = ActionGraph::build(&storage.config).unwrap();

        assert_eq!(first.order(), second.order());
    }

    #[test]
    fn test_cycle_detected() {
        let yaml = r#"
storage:
  version: 1
  config:
    - {type: format, id: f0, volume: c0, fstype: ext4}
    - {type: dm_crypt, id: c0, volume: f0, dm_name: boom, key: x}
"#;
        let storage = parse(yaml).unwrap();
        let err = ActionGraph::build(&storage.config)
            .expect_err("cycle must be rejected");

        assert_eq!(err.exit_code(), 2);
    }
}
