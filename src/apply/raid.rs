use log::info;

use crate::apply::disk;
use crate::apply::ApplyContext;
use crate::block::wipe;
use crate::errors::CurtinError;
use crate::linux::{mdadm, udev};
use crate::storage::Raid;

/// /dev node for a named md array. Kernel-style names (`md0`) live
/// directly in /dev; anything else goes under /dev/md/.
pub fn md_devpath(name: &str) -> String {
    let kernel_style = name
        .strip_prefix("md")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);

    match kernel_style {
        true => format!("/dev/{name}"),
        false => format!("/dev/md/{name}"),
    }
}

pub fn handle(ctx: &mut ApplyContext, raid: &Raid) -> Result<Option<String>, CurtinError> {
    let mut members = Vec::with_capacity(raid.devices.len());
    for device_id in &raid.devices {
        members.push(ctx.device_path(device_id)?);
    }

    let mut spares = Vec::with_capacity(raid.spare_devices.len());
    for device_id in &raid.spare_devices {
        spares.push(ctx.device_path(device_id)?);
    }

    let container = match &raid.container {
        Some(container_id) => Some(ctx.device_path(container_id)?),
        None => None,
    };

    let devpath = md_devpath(&raid.name);
    let metadata = raid.metadata.as_deref().unwrap_or("default");

    info!(
        "creating {:?} array {devpath} from {}",
        raid.raidlevel,
        members.join(", ")
    );

    let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
    let spare_refs: Vec<&str> = spares.iter().map(String::as_str).collect();

    mdadm::create(
        &devpath,
        raid.raidlevel,
        metadata,
        &member_refs,
        &spare_refs,
        container.as_deref(),
    )?;
    udev::settle()?;

    if let Some(mode) = raid.wipe {
        wipe::wipe_volume(&devpath, mode)?;
    }

    if let Some(table) = raid.ptable {
        disk::create_ptable(&devpath, table)?;
    }

    Ok(Some(devpath))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md_devpath() {
        assert_eq!(md_devpath("md0"), "/dev/md0");
        assert_eq!(md_devpath("md127"), "/dev/md127");
        assert_eq!(md_devpath("storage"), "/dev/md/storage");
        assert_eq!(md_devpath("md_home"), "/dev/md/md_home");
    }
}
