use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::block;

pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Live mounts keyed by the backing device's kname.
///
/// Built from /proc/mounts so that stacks about to be torn down can be
/// unmounted first; device sources are resolved through their symlink
/// aliases (/dev/mapper/{name}, /dev/{vg}/{lv}) to the kname.
#[derive(Debug, Default, Serialize)]
pub struct MountTable {
    by_kname: BTreeMap<String, Vec<String>>,
}

impl MountTable {
    pub fn insert(&mut self, kname: String, mountpoint: String) {
        self.by_kname.entry(kname).or_default().push(mountpoint);
    }

    pub fn mountpoints(&self, kname: &str) -> &[String] {
        self.by_kname
            .get(kname)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_mountpoint(&self, mountpoint: &str) -> bool {
        self.by_kname
            .values()
            .any(|points| points.iter().any(|point| point == mountpoint))
    }
}

/// Read the host mount table.
pub fn proc_mounts() -> MountTable {
    load(Path::new(PROC_MOUNTS))
}

/// Read a mount table from `path`; unreadable tables are empty, not
/// fatal (probe failures degrade to warnings until data is needed).
pub fn load(path: &Path) -> MountTable {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return MountTable::default();
    };

    let mut table = MountTable::default();
    for (device, mountpoint) in parse(&raw) {
        // only block-backed mounts matter for teardown
        if !device.starts_with("/dev/") {
            continue;
        }

        table.insert(block::path_to_kname(&device), mountpoint);
    }

    table
}

/// Parse /proc/mounts lines into (device, mountpoint) pairs.
/// The kernel escapes embedded whitespace as octal (`\040`).
pub fn parse(raw: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) else {
            continue;
        };

        entries.push((decode_octal(device), decode_octal(mountpoint)));
    }

    entries
}

fn decode_octal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let digits: String = chars.clone().take(3).collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => {
                out.push(byte as char);
                for _ in 0..3 {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec 0 0
/dev/sda2 / ext4 rw,relatime 0 0
/dev/sda2 /home ext4 rw,relatime 0 0
/dev/mapper/myvg-root /srv ext4 rw 0 0
/dev/sdb1 /mnt/usb\\040stick vfat rw 0 0
tmpfs /run tmpfs rw,nosuid 0 0
";

    #[test]
    fn test_parse() {
        let entries = parse(RAW);

        assert_eq!(entries.len(), 6);
        assert_eq!(entries[1], (String::from("/dev/sda2"), String::from("/")));
        assert_eq!(
            entries[4],
            (String::from("/dev/sdb1"), String::from("/mnt/usb stick"))
        );
    }

    #[test]
    fn test_load_block_devices_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mounts");
        std::fs::write(&path, RAW).unwrap();

        let table = load(&path);

        assert_eq!(table.mountpoints("sda2"), ["/", "/home"]);
        assert_eq!(table.mountpoints("sdb1"), ["/mnt/usb stick"]);
        // pseudo filesystems are dropped
        assert!(table.mountpoints("sysfs").is_empty());

        assert!(table.contains_mountpoint("/home"));
        assert!(!table.contains_mountpoint("/boot"));
    }

    #[test]
    fn test_load_missing_file() {
        let table = load(Path::new("/nonexistent/mounts"));
        assert!(table.mountpoints("sda").is_empty());
    }
}
