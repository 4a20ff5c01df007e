use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::CurtinError;
use crate::probe::DeviceRecord;
use crate::utils::shell;

// blkid prints KEY="VAL" pairs, which happen to be valid TOML once
// split onto separate lines.
#[derive(Debug, Default, Deserialize)]
pub struct BlkidEntry {
    #[serde(rename = "UUID")]
    pub uuid: Option<String>,

    #[serde(rename = "TYPE")]
    pub fstype: Option<String>,

    #[serde(rename = "LABEL")]
    pub label: Option<String>,

    #[serde(rename = "PARTUUID")]
    pub part_uuid: Option<String>,

    #[serde(rename = "PTTYPE")]
    pub ptable: Option<String>,
}

pub fn probe() -> Result<BTreeMap<String, BlkidEntry>, CurtinError> {
    let out = shell::exec("blkid", &[])?;
    parse_blkid(&out.stdout)
}

pub fn parse_blkid(
    output: &str,
) -> Result<BTreeMap<String, BlkidEntry>, CurtinError> {
    let mut entries = BTreeMap::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        let Some((devname, rest)) = line.split_once(':') else {
            continue;
        };

        let pairs: Vec<&str> = rest.split_whitespace().collect();
        let pairs = pairs.join("\n");

        let entry: BlkidEntry = toml::from_str(&pairs).map_err(|err| {
            CurtinError::ProbeFailed(format!(
                "bad blkid output for {devname}: {err}"
            ))
        })?;

        entries.insert(devname.to_string(), entry);
    }

    Ok(entries)
}

/// Overlay blkid data onto the lsblk-derived records.
/// blkid wins for filesystem identity; lsblk values only fill gaps.
pub fn merge(
    devices: &mut BTreeMap<String, DeviceRecord>,
    blkid_map: &BTreeMap<String, BlkidEntry>,
) {
    for (devname, entry) in blkid_map {
        let kname = devname.trim_start_matches("/dev/");
        let Some(record) = devices.get_mut(kname) else {
            continue;
        };

        if entry.uuid.is_some() {
            record.fs_uuid = entry.uuid.clone();
        }
        if entry.fstype.is_some() {
            record.fstype = entry.fstype.clone();
        }
        if entry.label.is_some() {
            record.fs_label = entry.label.clone();
        }
        if record.ptable.is_none() {
            record.ptable = entry.ptable.clone();
        }
        if record.partuuid.is_none() {
            record.partuuid = entry.part_uuid.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"/dev/sda1: PARTUUID="11111111-1111-1111-1111-111111111111"
/dev/sda2: UUID="deadbeef-0000-0000-0000-000000000000" TYPE="ext4" LABEL="root" PARTUUID="22222222-2222-2222-2222-222222222222"
/dev/sdb: PTTYPE="dos"
"#;

    #[test]
    fn test_parse_blkid() {
        let entries = parse_blkid(OUTPUT).expect("blkid output must parse");
        assert_eq!(entries.len(), 3);

        let sda2 = &entries["/dev/sda2"];
        assert_eq!(sda2.fstype.as_deref(), Some("ext4"));
        assert_eq!(
            sda2.uuid.as_deref(),
            Some("deadbeef-0000-0000-0000-000000000000")
        );

        let sdb = &entries["/dev/sdb"];
        assert_eq!(sdb.ptable.as_deref(), Some("dos"));
        assert!(sdb.fstype.is_none());
    }
}
