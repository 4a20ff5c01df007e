use crate::errors::CurtinError;
use crate::utils::shell;

/// Filesystems the partition executor may resize in place.
pub fn can_resize(fstype: &str) -> bool {
    matches!(fstype, "ext2" | "ext3" | "ext4" | "ntfs")
}

/// Resize the filesystem on `devpath` to `new_size` bytes.
///
/// ext filesystems are checked first; resize2fs refuses a shrink that
/// would not fit and a grow past the device, which is exactly the
/// contract the caller relies on.
pub fn resize(fstype: &str, devpath: &str, new_size: u64) -> Result<(), CurtinError> {
    match fstype {
        "ext2" | "ext3" | "ext4" => resize_ext(devpath, new_size),
        "ntfs" => resize_ntfs(devpath, new_size),
        other => Err(CurtinError::BadConfig(format!(
            "cannot resize filesystem type {other:?}"
        ))),
    }
}

/// Executes:
/// ```shell
/// e2fsck -p -f {device}
/// resize2fs {device} {size_k}K
/// ```
fn resize_ext(devpath: &str, new_size: u64) -> Result<(), CurtinError> {
    shell::exec_timeout("e2fsck", &["-p", "-f", devpath], shell::TIMEOUT_MKFS)?;

    let size_arg = format!("{}K", new_size / 1024);
    shell::exec_timeout("resize2fs", &[devpath, &size_arg], shell::TIMEOUT_MKFS)?;

    Ok(())
}

/// Executes:
/// ```shell
/// ntfsresize --force --size {size} {device}
/// ```
fn resize_ntfs(devpath: &str, new_size: u64) -> Result<(), CurtinError> {
    let size_arg = new_size.to_string();
    shell::exec_timeout(
        "ntfsresize",
        &["--force", "--size", &size_arg, devpath],
        shell::TIMEOUT_MKFS,
    )?;

    Ok(())
}
