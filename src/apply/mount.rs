use log::info;

use crate::apply::ApplyContext;
use crate::errors::CurtinError;
use crate::linux;
use crate::persist::fstab::FstabEntry;
use crate::probe::DevType;
use crate::storage::{Entry, Mount};

/// The fstab spec for a mounted device: filesystem UUID where the
/// device is partition-backed (survives renames), the /dev path for
/// constructed devices (raid, lvm, crypt, bcache), and the literal
/// `spec` for deviceless special filesystems.
pub fn fstab_spec(ctx: &ApplyContext, mount: &Mount, devpath: &str) -> String {
    if mount.device.is_none() {
        if let Some(spec) = &mount.spec {
            return spec.clone();
        }
    }

    let Some(record) = ctx.snapshot.by_devpath(devpath) else {
        return devpath.to_string();
    };

    match record.dev_type {
        DevType::Partition | DevType::Disk => match &record.fs_uuid {
            Some(uuid) => format!("UUID={uuid}"),
            None => devpath.to_string(),
        },
        _ => devpath.to_string(),
    }
}

// Walk parent links to see whether the filesystem ultimately lives on
// an iscsi-attached disk; those entries need _netdev so they are not
// fsck'ed before the network is up.
fn is_iscsi_backed(ctx: &ApplyContext, devpath: &str) -> bool {
    let mut kname = match ctx.snapshot.by_devpath(devpath) {
        Some(record) => record.kname.clone(),
        None => return false,
    };

    loop {
        let Some(record) = ctx.snapshot.get(&kname) else {
            return false;
        };

        if ctx.iscsi_devices.contains(&record.devpath) {
            return true;
        }

        match &record.parent {
            Some(parent) => kname = parent.clone(),
            None => return false,
        }
    }
}

pub fn handle(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    mount: &Mount,
) -> Result<Option<String>, CurtinError> {
    let format = mount.device.as_deref().and_then(|device_id| {
        entries.iter().find_map(|entry| match entry {
            Entry::Format(format) if format.id == device_id => Some(format),
            _ => None,
        })
    });

    // zfs datasets mount themselves through their own mountpoint
    // properties; nothing to do here
    if let Some(format) = format {
        if format.fstype == "zfsroot" {
            return Ok(None);
        }
    }

    let devpath = match &mount.device {
        Some(device_id) => Some(ctx.device_path(device_id)?),
        None => None,
    };

    let fstype = format
        .map(|format| format.fstype.clone())
        .or_else(|| mount.fstype.clone())
        .unwrap_or_else(|| String::from("auto"));

    let is_swap = fstype == "swap";
    let path = match (&mount.path, is_swap) {
        (_, true) => String::from("none"),
        (Some(path), false) => path.clone(),
        (None, false) => {
            return Err(CurtinError::BadConfig(format!(
                "mount {} has no path",
                mount.id
            )));
        }
    };

    let spec = match &devpath {
        Some(devpath) => fstab_spec(ctx, mount, devpath),
        None => mount.spec.clone().ok_or_else(|| {
            CurtinError::BadConfig(format!("mount {} has no device or spec", mount.id))
        })?,
    };

    let mut options = mount
        .options
        .clone()
        .filter(|options| !options.is_empty())
        .unwrap_or_else(|| String::from("defaults"));

    let iscsi = devpath
        .as_deref()
        .map(|devpath| is_iscsi_backed(ctx, devpath))
        .unwrap_or(false);
    if iscsi && !options.split(',').any(|option| option == "_netdev") {
        options.push_str(",_netdev");
    }

    let passno = match mount.passno {
        Some(passno) => passno,
        None if is_swap => 0,
        None if ctx.nodev_fstypes.contains(&fstype) => 0,
        None if devpath.is_none() => 0,
        None => 1,
    };

    ctx.artifacts.fstab.push(FstabEntry {
        spec,
        path: path.clone(),
        fstype: normalize_fstype(&fstype),
        options,
        freq: mount.freq.unwrap_or(0),
        passno,
    });

    // mount it under the target so later install stages can populate it
    if let (Some(devpath), false) = (&devpath, is_swap) {
        let target_dir = ctx.env.target.join(path.trim_start_matches('/'));
        info!("mounting {devpath} at {}", target_dir.display());

        linux::mount::mount(
            devpath,
            &target_dir,
            Some(&normalize_fstype(&fstype)),
            None,
        )?;
    }

    Ok(devpath)
}

// mkfs names and mount names disagree for the fat family
fn normalize_fstype(fstype: &str) -> String {
    match fstype {
        "fat" | "fat12" | "fat16" | "fat32" => String::from("vfat"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fstype() {
        assert_eq!(normalize_fstype("fat32"), "vfat");
        assert_eq!(normalize_fstype("ext4"), "ext4");
        assert_eq!(normalize_fstype("vfat"), "vfat");
    }
}
