use log::info;

use crate::apply::ApplyContext;
use crate::errors::CurtinError;
use crate::linux::lvm;
use crate::persist::dname::DnameRule;
use crate::storage::{Entry, LvmPartition, LvmVolGroup};

pub fn handle_volgroup(
    ctx: &mut ApplyContext,
    vg: &LvmVolGroup,
) -> Result<Option<String>, CurtinError> {
    let mut member_paths = Vec::with_capacity(vg.devices.len());
    for device_id in &vg.devices {
        member_paths.push(ctx.device_path(device_id)?);
    }

    info!("creating volgroup {} on {}", vg.name, member_paths.join(", "));

    for member in &member_paths {
        lvm::create_pv(member)?;
    }

    let member_refs: Vec<&str> = member_paths.iter().map(String::as_str).collect();
    lvm::create_vg(&vg.name, &member_refs)?;

    Ok(Some(format!("/dev/{}", vg.name)))
}

pub fn handle_partition(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    lv: &LvmPartition,
) -> Result<Option<String>, CurtinError> {
    let vg_name = entries
        .iter()
        .find_map(|entry| match entry {
            Entry::LvmVolGroup(vg) if vg.id == lv.volgroup => Some(vg.name.clone()),
            _ => None,
        })
        .ok_or_else(|| {
            CurtinError::CurtinRsBug(format!(
                "lvm_partition {} volgroup {:?} is not in the plan",
                lv.id, lv.volgroup
            ))
        })?;

    info!("creating lv {} in vg {vg_name}", lv.name);
    lvm::create_lv(&vg_name, &lv.name, lv.size.map(|size| size.bytes()))?;

    // stable access path for later config and the installer
    ctx.artifacts.dnames.push(DnameRule::DeviceMapper {
        name: format!("{vg_name}-{}", lv.name),
        dm_name: dm_escape(&vg_name, &lv.name),
    });

    Ok(Some(format!("/dev/{vg_name}/{}", lv.name)))
}

// Inverse of linux::lvm::split_dm_name: hyphens inside either name are
// doubled before joining.
pub fn dm_escape(vg: &str, lv: &str) -> String {
    format!("{}-{}", vg.replace('-', "--"), lv.replace('-', "--"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dm_escape() {
        assert_eq!(dm_escape("myvg", "mylv"), "myvg-mylv");
        assert_eq!(dm_escape("ubuntu-vg", "ubuntu-lv"), "ubuntu--vg-ubuntu--lv");
    }

    #[test]
    fn test_dm_escape_round_trip() {
        let (vg, lv) = crate::linux::lvm::split_dm_name(&dm_escape("a-b", "c-d")).unwrap();
        assert_eq!((vg.as_str(), lv.as_str()), ("a-b", "c-d"));
    }
}
