use crate::errors::CurtinError;
use crate::utils::shell;

/// Names of imported zpools. An absent zfs toolchain reports as an
/// empty list rather than an error.
pub fn list_zpools() -> Result<Vec<String>, CurtinError> {
    if !shell::in_path("zpool") {
        return Ok(Vec::new());
    }

    let out = shell::exec("zpool", &["list", "-H", "-o", "name"])?;
    Ok(parse_list(&out.stdout))
}

pub fn parse_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Vdev device paths of an imported pool.
pub fn pool_vdevs(pool: &str) -> Result<Vec<String>, CurtinError> {
    let out = shell::exec("zpool", &["list", "-H", "-v", "-P", pool])?;
    Ok(parse_vdevs(&out.stdout))
}

/// `zpool list -v -P` indents vdev lines below the pool line and prints
/// full device paths; mirror/raidz grouping lines carry no slash.
pub fn parse_vdevs(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter_map(|line| line.split_whitespace().next())
        .filter(|word| word.starts_with('/'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let pools = parse_list("rpool\ntank\n");
        assert_eq!(pools, vec!["rpool", "tank"]);

        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_vdevs() {
        let output = "\
rpool\t9.50G\t1.20G\t8.30G\t-\t-\t0%\t12%\t1.00x\tONLINE\t-
\tmirror-0\t9.50G\t1.20G\t8.30G\t-\t-\t0%\t12.6%\t-\tONLINE
\t\t/dev/disk/by-id/virtio-disk1-part1\t-\t-\t-\t-\t-\t-\t-\t-\tONLINE
\t\t/dev/disk/by-id/virtio-disk2-part1\t-\t-\t-\t-\t-\t-\t-\t-\tONLINE
";
        let vdevs = parse_vdevs(output);
        assert_eq!(
            vdevs,
            vec![
                "/dev/disk/by-id/virtio-disk1-part1",
                "/dev/disk/by-id/virtio-disk2-part1",
            ]
        );
    }
}
