use std::path::Path;

use log::debug;

use crate::errors::CurtinError;
use crate::storage::CacheMode;
use crate::utils::shell;

/// Executes:
/// ```shell
/// make-bcache [-B {backing}] [-C {cache}]
/// ```
pub fn make_bcache(
    backing: Option<&str>,
    cache: Option<&str>,
) -> Result<(), CurtinError> {
    let mut args: Vec<&str> = Vec::new();

    if let Some(backing_dev) = backing {
        args.extend(["-B", backing_dev]);
    }
    if let Some(cache_dev) = cache {
        args.extend(["-C", cache_dev]);
    }

    shell::exec("make-bcache", &args)?;
    Ok(())
}

/// Poke a device at the bcache register file; the kernel ignores
/// devices that are already registered.
pub fn register(devpath: &str) -> Result<(), CurtinError> {
    let register_path = Path::new("/sys/fs/bcache/register");
    if !register_path.exists() {
        return Err(CurtinError::ProbeFailed(String::from(
            "bcache module not loaded (/sys/fs/bcache missing)",
        )));
    }

    debug!("registering {devpath} with bcache");
    if let Err(err) = std::fs::write(register_path, devpath) {
        // EINVAL here means already registered
        debug!("bcache register of {devpath}: {err}");
    }

    Ok(())
}

/// Select the cache mode through the device's sysfs knob.
pub fn set_cache_mode(
    sysfs_root: &Path,
    bcache_kname: &str,
    mode: CacheMode,
) -> Result<(), CurtinError> {
    let path = sysfs_root.join(bcache_kname).join("bcache/cache_mode");

    std::fs::write(&path, mode.to_string()).map_err(|err| {
        CurtinError::CmdFailed {
            error: Some(err),
            context: format!("cannot set cache_mode on {bcache_kname}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_cache_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("bcache0/bcache")).unwrap();
        std::fs::write(root.join("bcache0/bcache/cache_mode"), "").unwrap();

        set_cache_mode(root, "bcache0", CacheMode::Writeback).unwrap();

        let written =
            std::fs::read_to_string(root.join("bcache0/bcache/cache_mode")).unwrap();
        assert_eq!(written, "writeback");
    }
}
