use std::path::Path;

use crate::errors::CurtinError;
use crate::storage::{DasdLayout, DasdMode};
use crate::utils::shell;

const CCW_BUS: &str = "/sys/bus/ccw/devices";

/// Kernel device name for a ccw bus id, via the sysfs block link
/// (`/sys/bus/ccw/devices/0.0.1544/block/dasda`).
pub fn device_id_to_kname(device_id: &str) -> Result<String, CurtinError> {
    device_id_to_kname_at(Path::new(CCW_BUS), device_id)
}

pub fn device_id_to_kname_at(
    ccw_root: &Path,
    device_id: &str,
) -> Result<String, CurtinError> {
    let block_dir = ccw_root.join(device_id).join("block");
    let mut entries = std::fs::read_dir(&block_dir).map_err(|err| {
        CurtinError::NoSuchDevice(format!(
            "dasd {device_id} has no block device ({err})"
        ))
    })?;

    let Some(Ok(entry)) = entries.next() else {
        return Err(CurtinError::NoSuchDevice(format!(
            "dasd {device_id}: empty {}",
            block_dir.display()
        )));
    };

    Ok(entry.file_name().to_string_lossy().to_string())
}

/// A ccw_device sysfs attribute, e.g. `status` or `online`.
pub fn ccw_attr(device_id: &str, attr: &str) -> Option<String> {
    let path = Path::new(CCW_BUS).join(device_id).join(attr);
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
}

/// An unformatted dasd reports `unformatted` status and must be
/// dasdfmt'ed before any partitioning.
pub fn is_not_formatted(device_id: &str) -> bool {
    ccw_attr(device_id, "status").as_deref() == Some("unformatted")
}

/// Executes:
/// ```shell
/// dasdfmt -y --blocksize={B} --disk_layout={cdl|ldl} --mode={mode} \
///     [--label={label}] {devname}
/// ```
pub fn format(
    devname: &str,
    blocksize: Option<u32>,
    disk_layout: Option<DasdLayout>,
    label: Option<&str>,
    mode: Option<DasdMode>,
) -> Result<(), CurtinError> {
    let blocksize = blocksize.unwrap_or(4096);
    let layout = match disk_layout.unwrap_or(DasdLayout::Cdl) {
        DasdLayout::Cdl => "cdl",
        DasdLayout::Ldl => "ldl",
    };
    let mode = match mode.unwrap_or(DasdMode::Full) {
        DasdMode::Quick => "quick",
        DasdMode::Full => "full",
        DasdMode::Expand => "expand",
    };

    let blocksize_arg = format!("--blocksize={blocksize}");
    let layout_arg = format!("--disk_layout={layout}");
    let mode_arg = format!("--mode={mode}");
    let label_arg = label.map(|l| format!("--label={l}"));

    let mut args = vec!["-y", &blocksize_arg, &layout_arg, &mode_arg];
    if let Some(label_arg) = &label_arg {
        args.push(label_arg);
    }
    args.push(devname);

    shell::exec_timeout("dasdfmt", &args, shell::TIMEOUT_WIPE)?;
    Ok(())
}

/// Executes:
/// ```shell
/// fdasd -s -c {conffile} {devname}
/// ```
/// The config file carries one `[first,last]` track range line per
/// partition.
pub fn fdasd_partition(devname: &str, config: &str) -> Result<(), CurtinError> {
    let tmp = tempfile_path("fdasd")?;
    std::fs::write(&tmp, config).map_err(|err| CurtinError::CmdFailed {
        error: Some(err),
        context: format!("cannot write fdasd config {tmp}"),
    })?;

    let result = shell::exec("fdasd", &["-s", "-c", &tmp, devname]);
    let _ = std::fs::remove_file(&tmp);
    result?;

    Ok(())
}

fn tempfile_path(prefix: &str) -> Result<String, CurtinError> {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("curtin-{prefix}-{}", std::process::id()));
    Ok(path.display().to_string())
}
