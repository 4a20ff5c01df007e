use log::{info, warn};

use crate::apply::ApplyContext;
use crate::block::wipe;
use crate::errors::CurtinError;
use crate::linux::{iscsi, parted, sgdisk, udev};
use crate::persist::dname::DnameRule;
use crate::probe::Snapshot;
use crate::storage::{Device, Disk, PTable};

/// Resolve a disk entry to a /dev path.
///
/// Identity sources in priority order: serial, wwn, path (including
/// iscsi URIs), multipath name. A `path` that disagrees with a matched
/// serial is a warning, never the winner.
pub fn locate(snapshot: &Snapshot, disk: &Disk) -> Result<String, CurtinError> {
    if let Some(serial) = &disk.serial {
        let Some(record) = snapshot.find_by_serial(serial) else {
            return Err(CurtinError::NoSuchDevice(format!(
                "disk {}: no device with serial {serial:?}",
                disk.id
            )));
        };

        if let Some(path) = &disk.path {
            let resolved = resolve_path(path);
            if resolved.as_deref() != Some(record.devpath.as_str()) {
                warn!(
                    "disk {}: path {path} resolves to {resolved:?}, \
                     but serial {serial} matched {}; using the serial match",
                    disk.id, record.devpath
                );
            }
        }

        return Ok(record.devpath.clone());
    }

    if let Some(wwn) = &disk.wwn {
        let Some(record) = snapshot.find_by_wwn(wwn) else {
            return Err(CurtinError::NoSuchDevice(format!(
                "disk {}: no device with wwn {wwn:?}",
                disk.id
            )));
        };
        return Ok(record.devpath.clone());
    }

    if let Some(path) = &disk.path {
        if path.starts_with("iscsi:") {
            let spec = iscsi::parse_uri(path)?;
            spec.connect()?;
            udev::settle()?;

            let link = spec.by_path_link();
            return resolve_path(&link).ok_or_else(|| {
                CurtinError::NoSuchDevice(format!(
                    "disk {}: iscsi login succeeded but {link} did not appear",
                    disk.id
                ))
            });
        }

        return resolve_path(path).ok_or_else(|| {
            CurtinError::NoSuchDevice(format!("disk {}: no such path {path}", disk.id))
        });
    }

    if let Some(mpath) = &disk.multipath {
        // config may carry the map alias or the member WWID
        let alias = match snapshot.multipaths.contains_key(mpath) {
            true => Some(mpath.clone()),
            false => snapshot
                .multipaths
                .iter()
                .find(|(_, wwid)| wwid.as_str() == mpath)
                .map(|(alias, _)| alias.clone()),
        };

        if let Some(alias) = alias {
            let mapper = format!("/dev/mapper/{alias}");
            if let Some(resolved) = resolve_path(&mapper) {
                return Ok(resolved);
            }
        }

        return Err(CurtinError::NoSuchDevice(format!(
            "disk {}: no multipath map {mpath:?}",
            disk.id
        )));
    }

    Err(CurtinError::BadConfig(format!(
        "disk {} carries no identity (serial, wwn, path, multipath)",
        disk.id
    )))
}

fn resolve_path(path: &str) -> Option<String> {
    std::fs::canonicalize(path)
        .ok()
        .map(|resolved| resolved.display().to_string())
}

pub fn locate_device(device: &Device) -> Result<String, CurtinError> {
    let devpath = resolve_path(&device.path).ok_or_else(|| {
        CurtinError::NoSuchDevice(format!(
            "device {}: no such path {}",
            device.id, device.path
        ))
    })?;

    if !crate::block::is_block_device(&devpath)? {
        return Err(CurtinError::NoSuchDevice(format!(
            "device {}: {devpath} is not a block device",
            device.id
        )));
    }

    Ok(devpath)
}

pub fn handle(ctx: &mut ApplyContext, disk: &Disk) -> Result<Option<String>, CurtinError> {
    let devpath = locate(&ctx.snapshot, disk)?;

    if disk.grub_device {
        ctx.grub_devices.push(devpath.clone());
    }

    if disk.path.as_deref().is_some_and(|path| path.starts_with("iscsi:")) {
        ctx.iscsi_devices.push(devpath.clone());
    }

    if let Some(name) = &disk.name {
        push_dname(ctx, name, disk);
    }

    if let Some(mode) = disk.wipe {
        wipe::wipe_volume(&devpath, mode)?;
    }

    if let Some(table) = disk.ptable {
        create_ptable(&devpath, table)?;
    }

    Ok(Some(devpath))
}

pub fn handle_device(
    ctx: &mut ApplyContext,
    device: &Device,
) -> Result<Option<String>, CurtinError> {
    let _ = ctx;
    let devpath = locate_device(device)?;

    if let Some(table) = device.ptable {
        create_ptable(&devpath, table)?;
    }

    Ok(Some(devpath))
}

/// Write a fresh, empty partition table.
///
/// GPT disks are zapped first so stale backup headers at the device end
/// cannot resurface. vtoc labels were already written by dasdfmt on the
/// dasd action, so there is nothing further to do here.
pub fn create_ptable(devpath: &str, table: PTable) -> Result<(), CurtinError> {
    info!("creating {table} partition table on {devpath}");

    match table {
        PTable::Gpt => {
            sgdisk::zap_all(devpath)?;
            parted::mklabel(devpath, PTable::Gpt)?;
        }
        PTable::Msdos => parted::mklabel(devpath, PTable::Msdos)?,
        PTable::Vtoc => return Ok(()),
    }

    udev::trigger(devpath)
}

fn push_dname(ctx: &mut ApplyContext, name: &str, disk: &Disk) {
    let rule = match (&disk.serial, &disk.wwn) {
        (Some(serial), _) => DnameRule::DiskSerial {
            name: name.to_string(),
            serial: serial.clone(),
        },
        (None, Some(wwn)) => DnameRule::DiskWwn {
            name: name.to_string(),
            wwn: wwn.clone(),
        },
        (None, None) => {
            warn!(
                "disk {}: no serial or wwn to anchor by-dname rule {name:?}",
                disk.id
            );
            return;
        }
    };

    ctx.artifacts.dnames.push(rule);
}
