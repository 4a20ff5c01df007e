use std::path::Path;

use log::info;

use crate::apply::ApplyContext;
use crate::block;
use crate::errors::CurtinError;
use crate::linux::{bcache, udev};
use crate::persist::dname::DnameRule;
use crate::storage::Bcache;
use crate::utils::shell;

/// Find the bcacheN device whose backing device is `backing_kname`.
pub fn find_bcache_for(sysfs_root: &Path, backing_kname: &str) -> Option<String> {
    let entries = std::fs::read_dir(sysfs_root).ok()?;

    for entry in entries.filter_map(|entry| entry.ok()) {
        let kname = entry.file_name().to_string_lossy().to_string();
        if !kname.starts_with("bcache") {
            continue;
        }

        let slaves = sysfs_root.join(&kname).join("slaves");
        let Ok(slave_entries) = std::fs::read_dir(slaves) else {
            continue;
        };

        let has_backing = slave_entries
            .filter_map(|slave| slave.ok())
            .any(|slave| slave.file_name().to_string_lossy() == backing_kname);

        if has_backing {
            return Some(kname);
        }
    }

    None
}

pub fn handle(
    ctx: &mut ApplyContext,
    entry: &Bcache,
) -> Result<Option<String>, CurtinError> {
    let backing = match &entry.backing_device {
        Some(device_id) => Some(ctx.device_path(device_id)?),
        None => None,
    };
    let cache = match &entry.cache_device {
        Some(device_id) => Some(ctx.device_path(device_id)?),
        None => None,
    };

    info!(
        "make-bcache backing={backing:?} cache={cache:?} ({})",
        entry.id
    );
    bcache::make_bcache(backing.as_deref(), cache.as_deref())?;

    for devpath in [&backing, &cache].into_iter().flatten() {
        bcache::register(devpath)?;
    }
    udev::settle()?;

    // cache-only entries register a cache set but create no block device
    let Some(backing) = backing else {
        return Ok(None);
    };

    let backing_kname = block::path_to_kname(&backing);
    let bcache_kname = find_bcache_for(&ctx.sysfs_root, &backing_kname)
        .ok_or_else(|| {
            CurtinError::ProbeFailed(format!(
                "no bcache device appeared over {backing}"
            ))
        })?;

    if let Some(mode) = entry.cache_mode {
        bcache::set_cache_mode(&ctx.sysfs_root, &bcache_kname, mode)?;
    }

    let devpath = block::kname_to_path(&bcache_kname);

    if let Some(name) = &entry.name {
        // bcache devices expose no stable udev identity; key the rule on
        // the backing device's part-uuid when there is one
        if let Ok(out) =
            shell::exec("blkid", &["-o", "value", "-s", "PARTUUID", &backing])
        {
            let partuuid = out.stdout.trim().to_string();
            if !partuuid.is_empty() {
                ctx.artifacts.dnames.push(DnameRule::Partition {
                    name: name.clone(),
                    partuuid,
                });
            }
        }
    }

    Ok(Some(devpath))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bcache_for() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir_all(root.join("bcache0/slaves/sda1")).unwrap();
        std::fs::create_dir_all(root.join("bcache1/slaves/md0")).unwrap();
        std::fs::create_dir_all(root.join("sda/holders")).unwrap();

        assert_eq!(find_bcache_for(root, "sda1").as_deref(), Some("bcache0"));
        assert_eq!(find_bcache_for(root, "md0").as_deref(), Some("bcache1"));
        assert!(find_bcache_for(root, "sdz9").is_none());
    }
}
