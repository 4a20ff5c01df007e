use std::collections::BTreeMap;

use crate::errors::CurtinError;
use crate::utils::shell;

/// Detail of one assembled md array, from `mdadm --detail --export`.
#[derive(Debug, Default, Clone)]
pub struct MdDetail {
    pub level: Option<String>,
    pub metadata: Option<String>,
    pub uuid: Option<String>,
    pub raid_devices: Option<u32>,

    /// (device path, role); role is a slot number or "spare".
    pub members: Vec<(String, String)>,
}

impl MdDetail {
    pub fn active_devices(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, role)| role != "spare")
            .map(|(dev, _)| dev.as_str())
            .collect()
    }

    pub fn spare_devices(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, role)| role == "spare")
            .map(|(dev, _)| dev.as_str())
            .collect()
    }
}

pub fn detail(devpath: &str) -> Result<MdDetail, CurtinError> {
    let out = shell::exec("mdadm", &["--detail", "--export", devpath])?;
    Ok(parse_detail(&out.stdout))
}

/// Parse `mdadm --detail --export` KEY=value lines.
///
/// Member device uuids appear as MD_DEVICE_<dev>_DEV/_ROLE pairs keyed by
/// device; only the array-level fields and member uuids are kept.
pub fn parse_detail(output: &str) -> MdDetail {
    let mut pairs = BTreeMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            pairs.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let mut detail = MdDetail {
        level: pairs.get("MD_LEVEL").cloned(),
        metadata: pairs.get("MD_METADATA").cloned(),
        uuid: pairs.get("MD_UUID").cloned(),
        raid_devices: pairs.get("MD_DEVICES").and_then(|v| v.parse().ok()),
        members: Vec::new(),
    };

    for (key, value) in &pairs {
        let Some(middle) = key
            .strip_prefix("MD_DEVICE_")
            .and_then(|rest| rest.strip_suffix("_DEV"))
        else {
            continue;
        };

        let role = pairs
            .get(&format!("MD_DEVICE_{middle}_ROLE"))
            .cloned()
            .unwrap_or_default();

        detail.members.push((value.clone(), role));
    }

    detail
}

/// Member devices of an assembled array, from sysfs slave links.
pub fn member_devices(
    sysfs_root: &std::path::Path,
    md_kname: &str,
) -> Vec<String> {
    let slaves = sysfs_root.join(md_kname).join("slaves");
    let Ok(entries) = std::fs::read_dir(slaves) else {
        return Vec::new();
    };

    let mut members: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "MD_LEVEL=raid1
MD_DEVICES=2
MD_METADATA=1.2
MD_UUID=93a73e10:427f280b:b7076c02:204b8f7a
MD_NAME=host:md0
MD_DEVICE_sda1_DEV=/dev/sda1
MD_DEVICE_sda1_ROLE=0
MD_DEVICE_sdb1_DEV=/dev/sdb1
MD_DEVICE_sdb1_ROLE=1
MD_DEVICE_sdc1_DEV=/dev/sdc1
MD_DEVICE_sdc1_ROLE=spare
";

    #[test]
    fn test_parse_detail() {
        let detail = parse_detail(OUTPUT);

        assert_eq!(detail.level.as_deref(), Some("raid1"));
        assert_eq!(detail.metadata.as_deref(), Some("1.2"));
        assert_eq!(detail.raid_devices, Some(2));
        assert_eq!(
            detail.uuid.as_deref(),
            Some("93a73e10:427f280b:b7076c02:204b8f7a")
        );
        assert_eq!(detail.active_devices(), vec!["/dev/sda1", "/dev/sdb1"]);
        assert_eq!(detail.spare_devices(), vec!["/dev/sdc1"]);
    }
}
