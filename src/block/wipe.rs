use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use log::debug;

use crate::block;
use crate::errors::CurtinError;
use crate::probe::lvm;
use crate::storage::Wipe;
use crate::utils::shell;

const MIB: usize = 1 << 20;
const CHUNK: usize = 4 * MIB;

/// Destroy device content per the configured wipe policy.
///
/// `superblock` clears the metadata windows at both ends of the device;
/// `superblock-recursive` first does the same for every partition below
/// it; `pvremove` strips lvm PV metadata; `zero`/`random` overwrite the
/// whole device exactly once.
pub fn wipe_volume(devpath: &str, mode: Wipe) -> Result<(), CurtinError> {
    debug!("wiping {devpath} mode={mode:?}");

    match mode {
        Wipe::Pvremove => {
            // pvremove exits 5 when there is no label to remove, which is
            // fine when re-wiping an already blank device
            shell::exec_rcs(
                "pvremove",
                &["--force", "--force", "--yes", devpath],
                &[0, 5],
            )?;
            lvm::lvm_scan()
        }

        Wipe::Zero => wipe_full(devpath, false),
        Wipe::Random => wipe_full(devpath, true),

        Wipe::Superblock => quick_zero(devpath, false, Path::new(crate::probe::SYS_BLOCK)),
        Wipe::SuperblockRecursive => {
            quick_zero(devpath, true, Path::new(crate::probe::SYS_BLOCK))
        }
    }
}

/// Zero 1 MiB at the head and tail of `path`. With `partitions`, do the
/// partitions below it first (deepest last in the table, wiped first).
pub fn quick_zero(
    path: &str,
    partitions: bool,
    sysfs_root: &Path,
) -> Result<(), CurtinError> {
    if partitions {
        let mut knames = block::sysfs_partitions(sysfs_root, path);
        knames.reverse();

        for kname in knames {
            quick_zero(&block::kname_to_path(&kname), false, sysfs_root)?;
        }
    }

    zero_at_offsets(path, &[0, -(MIB as i64)])
}

/// Write 1 MiB of zeros at each offset; negative offsets count back from
/// the end. Writes past the end are shortened, offsets outside the
/// device are skipped.
pub fn zero_at_offsets(path: &str, offsets: &[i64]) -> Result<(), CurtinError> {
    let mut file = exclusive_open(path)?;
    let size = file
        .seek(SeekFrom::End(0))
        .map_err(|err| wipe_err(path, err))?;

    let buf = vec![0u8; MIB];

    for &offset in offsets {
        let pos = match offset < 0 {
            true => {
                let back = offset.unsigned_abs();
                match size >= back {
                    true => size - back,
                    false => continue,
                }
            }
            false => offset as u64,
        };

        if pos > size {
            debug!("{path}: skipping wipe offset {offset} beyond size {size}");
            continue;
        }

        let len = std::cmp::min(MIB as u64, size - pos) as usize;
        file.seek(SeekFrom::Start(pos))
            .map_err(|err| wipe_err(path, err))?;
        file.write_all(&buf[..len])
            .map_err(|err| wipe_err(path, err))?;
    }

    file.sync_all().map_err(|err| wipe_err(path, err))?;

    Ok(())
}

// Full-device overwrite, zeros or urandom.
fn wipe_full(path: &str, random: bool) -> Result<(), CurtinError> {
    let mut file = exclusive_open(path)?;
    let size = file
        .seek(SeekFrom::End(0))
        .map_err(|err| wipe_err(path, err))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|err| wipe_err(path, err))?;

    debug!("{path} is {size} bytes, overwriting (random={random})");

    let mut reader: Option<std::fs::File> = match random {
        true => Some(
            std::fs::File::open("/dev/urandom")
                .map_err(|err| wipe_err("/dev/urandom", err))?,
        ),
        false => None,
    };

    let mut buf = vec![0u8; CHUNK];
    let mut remaining = size;

    while remaining > 0 {
        let len = std::cmp::min(CHUNK as u64, remaining) as usize;

        if let Some(urandom) = reader.as_mut() {
            urandom
                .read_exact(&mut buf[..len])
                .map_err(|err| wipe_err("/dev/urandom", err))?;
        }

        file.write_all(&buf[..len])
            .map_err(|err| wipe_err(path, err))?;
        remaining -= len as u64;
    }

    file.sync_all().map_err(|err| wipe_err(path, err))?;

    Ok(())
}

// O_EXCL on a block device fails while any other opener (mounts, dm,
// md) still holds it, which is exactly the guard we want before
// destroying content.
fn exclusive_open(path: &str) -> Result<std::fs::File, CurtinError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(nix::libc::O_EXCL)
        .open(path)
        .map_err(|err| CurtinError::CmdFailed {
            error: Some(err),
            context: format!("cannot exclusively open {path}"),
        })
}

fn wipe_err(path: &str, err: std::io::Error) -> CurtinError {
    CurtinError::CmdFailed {
        error: Some(err),
        context: format!("wipe failed on {path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_file(len: usize) -> (tempfile::TempDir, String) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("blockdev");
        let data: Vec<u8> = (0..len).map(|i| (i % 251 + 1) as u8).collect();
        std::fs::write(&path, data).unwrap();
        (tmp, path.display().to_string())
    }

    #[test]
    fn test_zero_at_offsets_head_and_tail() {
        let len = 4 * MIB;
        let (_tmp, path) = patterned_file(len);

        zero_at_offsets(&path, &[0, -(MIB as i64)]).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), len);

        // first MiB is zeroed
        assert!(data[..MIB].iter().all(|&b| b == 0));
        // middle is untouched
        assert!(data[MIB..len - MIB].iter().all(|&b| b != 0));
        // last MiB is zeroed
        assert!(data[len - MIB..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_at_offsets_short_device() {
        // device smaller than the wipe window: whole file ends up zeroed
        let (_tmp, path) = patterned_file(1024);

        zero_at_offsets(&path, &[0, -(MIB as i64)]).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_full_zero() {
        let len = CHUNK + 17;
        let (_tmp, path) = patterned_file(len);

        wipe_full(&path, false).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), len);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_full_random() {
        let len = 2 * MIB;
        let (_tmp, path) = patterned_file(len);

        wipe_full(&path, true).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), len);
        // urandom output of this length is never all zeros
        assert!(data.iter().any(|&b| b != 0));
    }
}
