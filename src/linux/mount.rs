use std::path::Path;

use crate::errors::CurtinError;
use crate::utils::shell;

/// Executes:
/// ```shell
/// mount [-t {fstype}] [-o {options}] {device} {target}
/// ```
/// The target directory is created first.
pub fn mount(
    device: &str,
    target: &Path,
    fstype: Option<&str>,
    options: Option<&str>,
) -> Result<(), CurtinError> {
    std::fs::create_dir_all(target).map_err(|err| CurtinError::CmdFailed {
        error: Some(err),
        context: format!("cannot create mountpoint {}", target.display()),
    })?;

    let target_arg = target.display().to_string();
    let mut args: Vec<&str> = Vec::new();

    if let Some(fstype) = fstype {
        args.extend(["-t", fstype]);
    }
    if let Some(options) = options {
        args.extend(["-o", options]);
    }
    args.extend([device, target_arg.as_str()]);

    shell::exec("mount", &args)?;
    Ok(())
}

/// Executes:
/// ```shell
/// umount {mountpoint}
/// ```
pub fn umount(mountpoint: &str) -> Result<(), CurtinError> {
    shell::exec("umount", &[mountpoint])?;
    Ok(())
}
