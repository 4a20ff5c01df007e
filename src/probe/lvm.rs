use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::CurtinError;
use crate::utils::shell;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LvInfo {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct LvmState {
    /// PV device path -> owning VG name (empty string when unassigned).
    pub pvs: BTreeMap<String, String>,

    /// VG name -> LVs within it.
    pub lvs: BTreeMap<String, Vec<LvInfo>>,
}

impl LvmState {
    pub fn vg_devices(&self, vg_name: &str) -> Vec<&str> {
        self.pvs
            .iter()
            .filter(|(_, vg)| vg.as_str() == vg_name)
            .map(|(pv, _)| pv.as_str())
            .collect()
    }

    pub fn has_vg(&self, vg_name: &str) -> bool {
        self.lvs.contains_key(vg_name)
            || self.pvs.values().any(|vg| vg == vg_name)
    }

    pub fn lv(&self, vg_name: &str, lv_name: &str) -> Option<&LvInfo> {
        self.lvs
            .get(vg_name)?
            .iter()
            .find(|lv| lv.name == lv_name)
    }
}

pub fn probe() -> Result<LvmState, CurtinError> {
    let pvs_out = shell::exec(
        "pvs",
        &["--noheadings", "--separator", ":", "-o", "pv_name,vg_name"],
    )?;
    let lvs_out = shell::exec(
        "lvs",
        &[
            "--noheadings",
            "--separator",
            ":",
            "--units",
            "b",
            "--nosuffix",
            "-o",
            "vg_name,lv_name,lv_size",
        ],
    )?;

    Ok(parse_lvm(&pvs_out.stdout, &lvs_out.stdout))
}

/// Parse `pvs`/`lvs` colon-separated noheadings output.
pub fn parse_lvm(pvs_output: &str, lvs_output: &str) -> LvmState {
    let mut state = LvmState::default();

    for line in pvs_output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(':');
        let Some(pv) = fields.next() else {
            continue;
        };
        let vg = fields.next().unwrap_or("");

        state.pvs.insert(pv.trim().to_string(), vg.trim().to_string());
    }

    for line in lvs_output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(':');
        let (Some(vg), Some(lv)) = (fields.next(), fields.next()) else {
            continue;
        };
        let size = fields
            .next()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0);

        state.lvs.entry(vg.trim().to_string()).or_default().push(LvInfo {
            name: lv.trim().to_string(),
            size,
        });
    }

    state
}

/// Drop cached PV metadata so freshly wiped devices stop being reported.
pub fn lvm_scan() -> Result<(), CurtinError> {
    shell::exec("pvscan", &["--cache"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lvm() {
        let pvs = "  /dev/sda2:myvg\n  /dev/sdb1:myvg\n  /dev/sdc1:\n";
        let lvs = "  myvg:root:10737418240\n  myvg:swap:2147483648\n  othervg:data:1073741824\n";

        let state = parse_lvm(pvs, lvs);

        assert_eq!(state.pvs.len(), 3);
        assert_eq!(state.pvs["/dev/sda2"], "myvg");
        assert_eq!(state.pvs["/dev/sdc1"], "");

        let mut members = state.vg_devices("myvg");
        members.sort();
        assert_eq!(members, vec!["/dev/sda2", "/dev/sdb1"]);

        assert!(state.has_vg("myvg"));
        assert!(!state.has_vg("ghostvg"));

        let root = state.lv("myvg", "root").expect("root lv exists");
        assert_eq!(root.size, 10 << 30);
        assert!(state.lv("myvg", "data").is_none());
    }
}
