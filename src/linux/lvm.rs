use crate::errors::CurtinError;
use crate::utils::shell;

/// Executes:
/// ```shell
/// pvcreate --force --zero=y --yes {device}
/// ```
pub fn create_pv(device: &str) -> Result<(), CurtinError> {
    shell::exec("pvcreate", &["--force", "--zero=y", "--yes", device])?;
    Ok(())
}

/// Executes:
/// ```shell
/// vgcreate --force --zero=y --yes {name} {devices...}
/// ```
pub fn create_vg(name: &str, devices: &[&str]) -> Result<(), CurtinError> {
    let mut args = vec!["--force", "--zero=y", "--yes", name];
    args.extend(devices);

    shell::exec("vgcreate", &args)?;
    Ok(())
}

/// Executes:
/// ```shell
/// lvcreate {vg} -n {name} -L {size}B
///
/// # or, without a size:
///
/// lvcreate {vg} -n {name} -l 100%FREE
/// ```
pub fn create_lv(vg: &str, name: &str, size: Option<u64>) -> Result<(), CurtinError> {
    let size_arg;
    let args: Vec<&str> = match size {
        Some(bytes) => {
            size_arg = format!("{bytes}B");
            vec![vg, "-n", name, "-L", &size_arg, "--wipesignatures=y", "--yes"]
        }
        None => vec![vg, "-n", name, "-l", "100%FREE", "--wipesignatures=y", "--yes"],
    };

    shell::exec("lvcreate", &args)?;
    Ok(())
}

/// LV names within a volume group.
pub fn list_lvs(vg: &str) -> Result<Vec<String>, CurtinError> {
    let out = shell::exec("lvs", &["--noheadings", "-o", "lv_name", vg])?;

    Ok(out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Split a device-mapper name into `(vg, lv)`.
///
/// dm encodes `{vg}-{lv}` with literal hyphens doubled, so the split
/// point is the only single hyphen.
pub fn split_dm_name(dm_name: &str) -> Result<(String, String), CurtinError> {
    let bytes = dm_name.as_bytes();
    let mut split_at: Option<usize> = None;

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'-' {
            i += 1;
            continue;
        }

        if i + 1 < bytes.len() && bytes[i + 1] == b'-' {
            i += 2;
            continue;
        }

        if split_at.is_some() {
            return Err(CurtinError::ProbeFailed(format!(
                "ambiguous dm name {dm_name:?}"
            )));
        }

        split_at = Some(i);
        i += 1;
    }

    let Some(at) = split_at else {
        return Err(CurtinError::ProbeFailed(format!(
            "dm name {dm_name:?} is not a vg-lv pair"
        )));
    };

    let unescape = |s: &str| s.replace("--", "-");

    Ok((unescape(&dm_name[..at]), unescape(&dm_name[at + 1..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_dm_name() {
        struct Test<'a> {
            dm_name: &'a str,
            expected: (&'a str, &'a str),
        }

        let tests = vec![
            Test { dm_name: "myvg-mylv", expected: ("myvg", "mylv") },
            Test { dm_name: "my--vg-mylv", expected: ("my-vg", "mylv") },
            Test { dm_name: "myvg-my--lv", expected: ("myvg", "my-lv") },
            Test {
                dm_name: "ubuntu--vg-ubuntu--lv",
                expected: ("ubuntu-vg", "ubuntu-lv"),
            },
        ];

        for test in tests {
            let (vg, lv) = split_dm_name(test.dm_name)
                .unwrap_or_else(|err| panic!("{}: {err:?}", test.dm_name));
            assert_eq!((vg.as_str(), lv.as_str()), test.expected);
        }
    }

    #[test]
    fn test_split_dm_name_invalid() {
        split_dm_name("nolvhere").expect_err("name without separator");
        split_dm_name("a-b-c").expect_err("two separators");
    }
}
