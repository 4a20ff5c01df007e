use log::warn;

use crate::errors::CurtinError;
use crate::storage::Format;
use crate::utils::shell;

// Label length limits per filesystem family.
fn label_limit(fstype: &str) -> usize {
    match fstype {
        "ext2" | "ext3" | "ext4" => 16,
        "fat" | "fat12" | "fat16" | "fat32" | "vfat" => 11,
        "xfs" => 12,
        "swap" => 15,
        _ => 64,
    }
}

/// Build and run the mkfs invocation for a format action.
///
/// Known families get their usual force/quiet flags plus label and uuid
/// where the tool supports them; an unrecognized fstype is accepted as
/// long as `mkfs.{fstype}` exists, with the label ignored.
pub fn create_fs(format: &Format, devpath: &str) -> Result<(), CurtinError> {
    let fstype = format.fstype.as_str();

    let label = match &format.label {
        Some(label) if label.len() > label_limit(fstype) => {
            warn!(
                "label {label:?} too long for {fstype}, truncating to {} chars",
                label_limit(fstype)
            );
            Some(label[..label_limit(fstype)].to_string())
        }
        other => other.clone(),
    };

    let mut cmd = format!("mkfs.{fstype}");
    let mut args: Vec<String> = Vec::new();

    match fstype {
        "ext2" | "ext3" | "ext4" => {
            args.extend(["-F".into(), "-q".into()]);
            if let Some(label) = &label {
                args.extend(["-L".into(), label.clone()]);
            }
            if let Some(uuid) = &format.uuid {
                args.extend(["-U".into(), uuid.clone()]);
            }
        }

        "fat" | "fat12" | "fat16" | "fat32" | "vfat" => {
            cmd = String::from("mkfs.vfat");
            // fat12/16/32 pick their table size explicitly
            if let Some(size) = fstype.strip_prefix("fat") {
                if !size.is_empty() {
                    args.extend(["-F".into(), size.into()]);
                }
            }
            if let Some(label) = &label {
                args.extend(["-n".into(), label.clone()]);
            }
        }

        "swap" => {
            cmd = String::from("mkswap");
            args.push("--force".into());
            if let Some(label) = &label {
                args.extend(["-L".into(), label.clone()]);
            }
            if let Some(uuid) = &format.uuid {
                args.extend(["-U".into(), uuid.clone()]);
            }
        }

        "btrfs" => {
            args.push("--force".into());
            if let Some(label) = &label {
                args.extend(["-L".into(), label.clone()]);
            }
            if let Some(uuid) = &format.uuid {
                args.extend(["-U".into(), uuid.clone()]);
            }
        }

        "xfs" => {
            args.push("-f".into());
            if let Some(label) = &label {
                args.extend(["-L".into(), label.clone()]);
            }
            if let Some(uuid) = &format.uuid {
                args.extend(["-m".into(), format!("uuid={uuid}")]);
            }
        }

        "ntfs" => {
            args.extend(["--force".into(), "--quick".into()]);
            if let Some(label) = &label {
                args.extend(["--label".into(), label.clone()]);
            }
        }

        "jfs" => {
            args.push("-q".into());
            if let Some(label) = &label {
                args.extend(["-L".into(), label.clone()]);
            }
        }

        "reiserfs" => {
            args.extend(["-f".into(), "-q".into()]);
            if let Some(label) = &label {
                args.extend(["-l".into(), label.clone()]);
            }
        }

        "f2fs" => {
            args.push("-f".into());
            if let Some(label) = &label {
                args.extend(["-l".into(), label.clone()]);
            }
        }

        other => {
            if !shell::in_path(&cmd) {
                return Err(CurtinError::BadConfig(format!(
                    "no mkfs tool for fstype {other:?}"
                )));
            }
            if label.is_some() {
                warn!("ignoring label for unknown fstype {other}");
            }
        }
    }

    if let Some(extra) = &format.extra_options {
        args.extend(extra.iter().cloned());
    }

    args.push(devpath.to_string());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    shell::exec_timeout(&cmd, &arg_refs, shell::TIMEOUT_MKFS)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_limit() {
        assert_eq!(label_limit("ext4"), 16);
        assert_eq!(label_limit("vfat"), 11);
        assert_eq!(label_limit("xfs"), 12);
    }
}
