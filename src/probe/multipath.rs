use std::collections::BTreeMap;

use crate::errors::CurtinError;
use crate::utils::shell;

/// Map of multipath map name -> WWID, from `multipath -ll` topology output.
pub fn probe() -> Result<BTreeMap<String, String>, CurtinError> {
    let out = shell::exec_rcs("multipath", &["-ll"], &[0, 1])?;
    Ok(parse_maps(&out.stdout))
}

/// Topology lines open with `<alias> (<wwid>) <dm-name> ...`; member path
/// lines are indented and skipped here.
pub fn parse_maps(output: &str) -> BTreeMap<String, String> {
    let mut maps = BTreeMap::new();

    for line in output.lines() {
        if line.starts_with(char::is_whitespace) || line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        let Some(alias) = words.next() else {
            continue;
        };

        let Some(wwid) = words.next() else {
            continue;
        };

        if wwid.starts_with('(') && wwid.ends_with(')') {
            maps.insert(
                alias.to_string(),
                wwid.trim_matches(['(', ')']).to_string(),
            );
        }
    }

    maps
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "\
mpatha (360000000000000000e00000000010001) dm-0 IET,VIRTUAL-DISK
size=10G features='0' hwhandler='0' wp=rw
|-+- policy='service-time 0' prio=1 status=active
| `- 2:0:0:1 sda 8:0  active ready running
`-+- policy='service-time 0' prio=1 status=enabled
  `- 3:0:0:1 sdb 8:16 active ready running
";

    #[test]
    fn test_parse_maps() {
        let maps = parse_maps(OUTPUT);
        assert_eq!(maps.len(), 1);
        assert_eq!(maps["mpatha"], "360000000000000000e00000000010001");
    }
}
