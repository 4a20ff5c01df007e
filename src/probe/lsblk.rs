use std::collections::BTreeMap;

use crate::errors::CurtinError;
use crate::probe::{DevType, DeviceRecord};
use crate::utils::shell;

// Columns requested from lsblk; parsing below indexes by key, so order
// only matters for readability of the raw output in logs.
const LSBLK_COLUMNS: &str =
    "NAME,KNAME,PKNAME,TYPE,SIZE,RO,FSTYPE,UUID,LABEL,PTTYPE,MOUNTPOINT,SERIAL,WWN,PARTUUID";

pub(super) fn run_lsblk() -> Result<String, CurtinError> {
    let out = shell::exec("lsblk", &["-P", "-b", "-o", LSBLK_COLUMNS])?;
    Ok(out.stdout)
}

/// Parse `lsblk -P -b` pairs output into device records keyed by kname.
///
/// Each line is a sequence of KEY="value" pairs; values may contain
/// spaces, so the line is split shell-style rather than on whitespace.
pub(super) fn parse_lsblk(
    output: &str,
) -> Result<BTreeMap<String, DeviceRecord>, CurtinError> {
    let mut devices = BTreeMap::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        let pairs = parse_pairs(line)?;
        let get = |key: &str| -> Option<String> {
            pairs.get(key).filter(|v| !v.is_empty()).cloned()
        };

        let Some(kname) = get("KNAME") else {
            return Err(CurtinError::ProbeFailed(format!(
                "lsblk line without KNAME: {line}"
            )));
        };

        let size = match get("SIZE") {
            Some(s) => s.parse::<u64>().map_err(|_| {
                CurtinError::ProbeFailed(format!("bad SIZE for {kname}: {s}"))
            })?,
            None => 0,
        };

        let record = DeviceRecord {
            devpath: format!("/dev/{kname}"),
            dev_type: DevType::identify(&kname, get("TYPE").as_deref()),
            size,
            ro: get("RO").as_deref() == Some("1"),
            fstype: get("FSTYPE"),
            fs_uuid: get("UUID"),
            fs_label: get("LABEL"),
            ptable: get("PTTYPE"),
            parent: get("PKNAME"),
            mountpoint: get("MOUNTPOINT"),
            serial: get("SERIAL"),
            wwn: get("WWN"),
            partuuid: get("PARTUUID"),
            holders: Vec::new(),
            partition: None,
            kname,
        };

        devices.insert(record.kname.clone(), record);
    }

    Ok(devices)
}

fn parse_pairs(line: &str) -> Result<BTreeMap<String, String>, CurtinError> {
    let words = shlex::split(line).ok_or_else(|| {
        CurtinError::ProbeFailed(format!("unparseable lsblk line: {line}"))
    })?;

    let mut pairs = BTreeMap::new();
    for word in words {
        let Some((key, value)) = word.split_once('=') else {
            return Err(CurtinError::ProbeFailed(format!(
                "lsblk word without '=': {word}"
            )));
        };
        pairs.insert(key.to_string(), value.to_string());
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"NAME="sda" KNAME="sda" PKNAME="" TYPE="disk" SIZE="10737418240" RO="0" FSTYPE="" UUID="" LABEL="" PTTYPE="gpt" MOUNTPOINT="" SERIAL="QM00002" WWN="0x5000c500a1b2c3d4" PARTUUID=""
NAME="sda1" KNAME="sda1" PKNAME="sda" TYPE="part" SIZE="1048576" RO="0" FSTYPE="" UUID="" LABEL="" PTTYPE="gpt" MOUNTPOINT="" SERIAL="" WWN="" PARTUUID="11111111-1111-1111-1111-111111111111"
NAME="sda2" KNAME="sda2" PKNAME="sda" TYPE="part" SIZE="3221225472" RO="0" FSTYPE="ext4" UUID="deadbeef-0000-0000-0000-000000000000" LABEL="my root" PTTYPE="gpt" MOUNTPOINT="" SERIAL="" WWN="" PARTUUID="22222222-2222-2222-2222-222222222222"
NAME="myvg-mylv" KNAME="dm-0" PKNAME="sda2" TYPE="lvm" SIZE="1073741824" RO="0" FSTYPE="" UUID="" LABEL="" PTTYPE="" MOUNTPOINT="" SERIAL="" WWN="" PARTUUID=""
"#;

    #[test]
    fn test_parse_lsblk() {
        let devices = parse_lsblk(OUTPUT).expect("output must parse");
        assert_eq!(devices.len(), 4);

        let sda = &devices["sda"];
        assert_eq!(sda.dev_type, DevType::Disk);
        assert_eq!(sda.size, 10 << 30);
        assert_eq!(sda.serial.as_deref(), Some("QM00002"));
        assert_eq!(sda.ptable.as_deref(), Some("gpt"));
        assert!(sda.parent.is_none());

        let sda2 = &devices["sda2"];
        assert_eq!(sda2.dev_type, DevType::Partition);
        assert_eq!(sda2.parent.as_deref(), Some("sda"));
        // quoted value with a space survives the shell-style split
        assert_eq!(sda2.fs_label.as_deref(), Some("my root"));

        let lv = &devices["dm-0"];
        assert_eq!(lv.dev_type, DevType::Lvm);
        assert_eq!(lv.devpath, "/dev/dm-0");
    }

    #[test]
    fn test_parse_lsblk_bad_line() {
        parse_lsblk("KNAME\n").expect_err("line without pairs must fail");
    }
}
