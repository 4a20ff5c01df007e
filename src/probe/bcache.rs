use std::path::Path;

use crate::errors::CurtinError;

/// Read the active cache mode of a bcache device.
///
/// sysfs renders the selection with brackets, e.g.
/// `writethrough [writeback] writearound none`.
pub fn cache_mode(
    sysfs_root: &Path,
    bcache_kname: &str,
) -> Result<String, CurtinError> {
    let path = sysfs_root.join(bcache_kname).join("bcache/cache_mode");
    let raw = std::fs::read_to_string(&path).map_err(|err| {
        CurtinError::ProbeFailed(format!(
            "cannot read {}: {err}",
            path.display()
        ))
    })?;

    parse_cache_mode(&raw).ok_or_else(|| {
        CurtinError::ProbeFailed(format!("no selected cache mode in {raw:?}"))
    })
}

pub fn parse_cache_mode(raw: &str) -> Option<String> {
    raw.split_whitespace()
        .find(|word| word.starts_with('[') && word.ends_with(']'))
        .map(|word| word.trim_matches(['[', ']']).to_string())
}

/// Whether the bcache device has a cache set attached (the `cache`
/// symlink only exists once a cache device is registered and bound).
pub fn has_cache_attached(sysfs_root: &Path, bcache_kname: &str) -> bool {
    sysfs_root
        .join(bcache_kname)
        .join("bcache/cache")
        .exists()
}

/// The backing device kname underneath a bcache device, from sysfs
/// slave links.
pub fn backing_device(sysfs_root: &Path, bcache_kname: &str) -> Option<String> {
    let slaves = sysfs_root.join(bcache_kname).join("slaves");
    let entries = std::fs::read_dir(slaves).ok()?;

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_mode() {
        struct Test<'a> {
            raw: &'a str,
            expected: Option<&'a str>,
        }

        let tests = vec![
            Test {
                raw: "writethrough [writeback] writearound none\n",
                expected: Some("writeback"),
            },
            Test {
                raw: "[writethrough] writeback writearound none\n",
                expected: Some("writethrough"),
            },
            Test { raw: "", expected: None },
        ];

        for test in tests {
            let result = parse_cache_mode(test.raw);
            assert_eq!(
                test.expected.map(String::from),
                result,
                "raw: {:?}",
                test.raw
            );
        }
    }
}
