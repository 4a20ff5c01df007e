use log::info;

use crate::apply::ApplyContext;
use crate::block;
use crate::errors::CurtinError;
use crate::linux::dasd;
use crate::storage::{Dasd, DasdLayout, DasdMode};

/// Low-level format of an ECKD dasd, ahead of the disk action that
/// partitions it.
pub fn handle(ctx: &mut ApplyContext, entry: &Dasd) -> Result<Option<String>, CurtinError> {
    let kname = dasd::device_id_to_kname(&entry.device_id)?;
    let devpath = block::kname_to_path(&kname);

    if !needs_format(ctx, entry, &kname) {
        info!(
            "dasd {} ({devpath}) already formatted as requested, skipping dasdfmt",
            entry.device_id
        );
        return Ok(Some(devpath));
    }

    info!("dasdfmt on {devpath} ({})", entry.device_id);
    dasd::format(
        &devpath,
        entry.blocksize,
        entry.disk_layout,
        entry.label.as_deref(),
        entry.mode,
    )?;

    Ok(Some(devpath))
}

// dasdfmt takes minutes; skip it when the device already carries the
// wanted layout and the mode does not force a full rewrite.
fn needs_format(ctx: &ApplyContext, entry: &Dasd, kname: &str) -> bool {
    if entry.mode == Some(DasdMode::Full) {
        return true;
    }

    if dasd::is_not_formatted(&entry.device_id) {
        return true;
    }

    // cdl layouts surface as a vtoc partition table
    if entry.disk_layout == Some(DasdLayout::Cdl) {
        let current = ctx
            .snapshot
            .get(kname)
            .and_then(|record| record.ptable.as_deref());
        return current != Some("vtoc");
    }

    false
}
