pub mod wipe;

use std::path::{Path, PathBuf};

use crate::errors::CurtinError;

pub const DEV_DIR: &str = "/dev";

/// Convert a /dev path, /sys/block path, or bare kname to the kname.
/// Symlinks (by-id, by-uuid) are resolved first.
pub fn path_to_kname(path: &str) -> String {
    let resolved = match path.contains('/') {
        true => std::fs::canonicalize(path)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.to_string()),
        false => path.to_string(),
    };

    let base = resolved
        .rsplit('/')
        .next()
        .unwrap_or(&resolved)
        .to_string();

    // cciss controllers encode a slash in the kname
    match resolved.starts_with("/dev/cciss") {
        true => format!("cciss!{base}"),
        false => base,
    }
}

/// /dev path for a kname; '!' in knames maps back to a subdirectory.
pub fn kname_to_path(kname: &str) -> String {
    format!("{DEV_DIR}/{}", kname.replace('!', "/"))
}

/// Sysfs directory for a device given a kname, /dev path, or /sys path.
pub fn sys_block_path(root: &Path, device: &str) -> PathBuf {
    root.join(path_to_kname(device))
}

// Partition device naming, following the kernel's disk_name(): knames
// ending in a digit take a 'p' separator, and some device classes always
// carry one.
pub fn partition_kname(disk_kname: &str, partition_number: u32) -> String {
    let needs_p = ["nvme", "mmcblk", "cciss", "mpath", "dm-", "md", "loop"]
        .iter()
        .any(|prefix| disk_kname.starts_with(prefix))
        || disk_kname.ends_with(|c: char| c.is_ascii_digit());

    match needs_p {
        true => format!("{disk_kname}p{partition_number}"),
        false => format!("{disk_kname}{partition_number}"),
    }
}

/// Whether `path` points at a block device node.
pub fn is_block_device(path: &str) -> Result<bool, CurtinError> {
    use std::os::unix::fs::FileTypeExt;

    let meta = std::fs::metadata(path)
        .map_err(|err| CurtinError::NoSuchDevice(format!("{path}: {err}")))?;

    Ok(meta.file_type().is_block_device())
}

/// Knames of partitions below a block device, from sysfs.
pub fn sysfs_partitions(sysfs_root: &Path, device: &str) -> Vec<String> {
    let dev_dir = sys_block_path(sysfs_root, device);
    let Ok(entries) = std::fs::read_dir(&dev_dir) else {
        return Vec::new();
    };

    let mut partitions: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("partition").exists())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    partitions.sort();
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_kname() {
        struct Test<'a> {
            disk: &'a str,
            number: u32,
            expected: &'a str,
        }

        let tests = vec![
            Test { disk: "sda", number: 5, expected: "sda5" },
            Test { disk: "vdb", number: 10, expected: "vdb10" },
            Test { disk: "nvme0n1", number: 1, expected: "nvme0n1p1" },
            Test { disk: "mmcblk7", number: 2, expected: "mmcblk7p2" },
            Test { disk: "md0", number: 1, expected: "md0p1" },
            Test { disk: "dm-3", number: 2, expected: "dm-3p2" },
        ];

        for test in tests {
            let result = partition_kname(test.disk, test.number);
            assert_eq!(test.expected, result.as_str(), "disk: {}", test.disk);
        }
    }

    #[test]
    fn test_kname_to_path() {
        assert_eq!(kname_to_path("sda1"), "/dev/sda1");
        assert_eq!(kname_to_path("cciss!c0d0"), "/dev/cciss/c0d0");
    }

    #[test]
    fn test_path_to_kname_bare() {
        assert_eq!(path_to_kname("sda1"), "sda1");
    }

    #[test]
    fn test_sysfs_partitions() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir_all(root.join("sda/sda1")).unwrap();
        std::fs::create_dir_all(root.join("sda/sda2")).unwrap();
        std::fs::create_dir_all(root.join("sda/queue")).unwrap();
        std::fs::write(root.join("sda/sda1/partition"), "1\n").unwrap();
        std::fs::write(root.join("sda/sda2/partition"), "2\n").unwrap();

        let partitions = sysfs_partitions(root, "sda");
        assert_eq!(partitions, vec!["sda1", "sda2"]);
    }
}
