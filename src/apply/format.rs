use log::info;

use crate::apply::ApplyContext;
use crate::errors::CurtinError;
use crate::linux::mkfs;
use crate::storage::Format;

pub fn handle(
    ctx: &mut ApplyContext,
    format: &Format,
) -> Result<Option<String>, CurtinError> {
    if format.fstype == "zfsroot" {
        return Err(CurtinError::CurtinRsBug(format!(
            "format {} (zfsroot) reached the executor; the planner expands it",
            format.id
        )));
    }

    let devpath = ctx.device_path(&format.volume)?;

    info!("mkfs.{} on {devpath}", format.fstype);
    mkfs::create_fs(format, &devpath)?;

    Ok(Some(devpath))
}
