use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};

use crate::block;
use crate::block::wipe;
use crate::errors::CurtinError;
use crate::holders::PlanEntry;
use crate::linux::{lvm, mount, udev};
use crate::probe::{mdadm, mounts, zfs, DevType};
use crate::storage::Wipe;
use crate::utils::shell;

const RETRY_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Context shared by all teardown steps.
pub struct ShutdownCtx {
    pub sysfs_root: PathBuf,

    /// The mount table to plan unmounts from and to re-read when
    /// checking that an unmount took; /proc/mounts on a live host.
    pub proc_mounts_path: PathBuf,

    /// Knames of disks carrying an msdos table, used to recognize
    /// extended partitions (which must not be wiped).
    pub msdos_disks: Vec<String>,
}

/// Best-effort assembly of half-alive stacks so the holder scan sees
/// them. Failures here only mean there was nothing to assemble.
pub fn prepare_for_scan() {
    if let Err(err) = shell::exec_rcs("mdadm", &["--assemble", "--scan"], &[0, 1, 2]) {
        debug!("mdadm assemble scan: {err:?}");
    }

    if let Err(err) = shell::exec_rcs("modprobe", &["bcache"], &[0, 1]) {
        debug!("modprobe bcache: {err:?}");
    }
}

/// Export any imported zpool with a vdev on one of the target devices.
/// zpool membership is invisible in sysfs, so this runs before the
/// holder-tree walk.
pub fn export_zpools(devices: &[String]) -> Result<(), CurtinError> {
    let pools = zfs::list_zpools()?;
    if pools.is_empty() {
        return Ok(());
    }

    let target_knames: Vec<String> =
        devices.iter().map(|dev| block::path_to_kname(dev)).collect();

    for pool in pools {
        let vdevs = zfs::pool_vdevs(&pool)?;

        let occupies_target = vdevs.iter().any(|vdev| {
            let vdev_kname = block::path_to_kname(vdev);
            target_knames
                .iter()
                .any(|target| vdev_kname.starts_with(target.as_str()))
        });

        if occupies_target {
            info!("exporting zpool {pool} occupying a target device");
            shell::exec("zpool", &["export", &pool])?;
        }
    }

    Ok(())
}

/// Run one plan step until the device is gone, within the retry budget.
/// A node that cannot be quiesced is fatal: the engine must never
/// repartition a device whose holders are still live.
pub fn shutdown_with_retry(
    ctx: &ShutdownCtx,
    entry: &PlanEntry,
) -> Result<(), CurtinError> {
    let mut last_err: Option<CurtinError> = None;

    for attempt in 1..=RETRY_ATTEMPTS {
        if attempt > 1 {
            std::thread::sleep(RETRY_BACKOFF);
        }

        info!(
            "shutdown {:?} {} (attempt {attempt}/{RETRY_ATTEMPTS})",
            entry.dev_type, entry.devpath
        );

        if let Err(err) = shutdown(ctx, entry) {
            warn!("shutdown of {} failed: {err:?}", entry.devpath);
            last_err = Some(err);
            continue;
        }

        udev::settle()?;

        if node_gone(ctx, entry) {
            return Ok(());
        }

        warn!("{} still present after shutdown", entry.devpath);
    }

    Err(CurtinError::HoldersNotClear(format!(
        "could not quiesce {} ({:?}) after {RETRY_ATTEMPTS} attempts: {:?}",
        entry.devpath, entry.dev_type, last_err
    )))
}

fn shutdown(ctx: &ShutdownCtx, entry: &PlanEntry) -> Result<(), CurtinError> {
    match entry.dev_type {
        DevType::Mount => shutdown_mount(entry),
        DevType::Lvm => shutdown_lvm(ctx, entry),
        DevType::Crypt => shutdown_crypt(entry),
        DevType::Raid => shutdown_mdadm(ctx, entry),
        DevType::Bcache => shutdown_bcache(ctx, entry),
        DevType::Mpath => shutdown_mpath(ctx, entry),
        DevType::Partition | DevType::Disk => wipe_superblock(ctx, entry),
        DevType::Other => {
            warn!("no teardown for {} (unknown type)", entry.devpath);
            Ok(())
        }
    }
}

// A live filesystem is released before its device is touched; the
// planner puts these steps first on their level.
fn shutdown_mount(entry: &PlanEntry) -> Result<(), CurtinError> {
    let Some(mountpoint) = &entry.mountpoint else {
        return Err(CurtinError::CurtinRsBug(format!(
            "mount step for {} carries no mountpoint",
            entry.devpath
        )));
    };

    info!("unmounting {mountpoint} ({})", entry.devpath);
    mount::umount(mountpoint)
}

// A torn-down device must also stop being rediscoverable: dm and md
// nodes disappear outright, disks and partitions merely lose their
// holders and signatures, and an unmounted path leaves the mount table.
fn node_gone(ctx: &ShutdownCtx, entry: &PlanEntry) -> bool {
    let dev_dir = ctx.sysfs_root.join(&entry.kname);

    match entry.dev_type {
        DevType::Mount => match &entry.mountpoint {
            Some(mountpoint) => {
                !mounts::load(&ctx.proc_mounts_path).contains_mountpoint(mountpoint)
            }
            None => true,
        },

        DevType::Partition | DevType::Disk => {
            let holders = std::fs::read_dir(dev_dir.join("holders"))
                .map(|entries| entries.count())
                .unwrap_or(0);
            holders == 0
        }

        _ => !dev_dir.exists(),
    }
}

// lvm dm devices encode '{vg}-{lv}' in their dm name. The lv is removed
// with force in case its vg lost other members; an emptied vg goes too.
fn shutdown_lvm(ctx: &ShutdownCtx, entry: &PlanEntry) -> Result<(), CurtinError> {
    let name_file = ctx.sysfs_root.join(&entry.kname).join("dm/name");
    let dm_name = std::fs::read_to_string(&name_file).map_err(|err| {
        CurtinError::ProbeFailed(format!(
            "cannot read {}: {err}",
            name_file.display()
        ))
    })?;

    let (vg_name, lv_name) = lvm::split_dm_name(dm_name.trim())?;

    debug!("lvremove {vg_name}/{lv_name}");
    shell::exec_rcs(
        "lvremove",
        &["--force", "--force", &format!("{vg_name}/{lv_name}")],
        &[0, 5],
    )?;

    if lvm::list_lvs(&vg_name)?.is_empty() {
        shell::exec_rcs("vgremove", &["--force", "--force", &vg_name], &[0, 5])?;
    }

    crate::probe::lvm::lvm_scan()
}

fn shutdown_crypt(entry: &PlanEntry) -> Result<(), CurtinError> {
    shell::exec("cryptsetup", &["remove", &entry.devpath])?;
    Ok(())
}

// Stop the array, then zero each member's superblock so a later scan
// cannot resurrect it (a degraded array with a missing peer would
// otherwise come right back).
fn shutdown_mdadm(ctx: &ShutdownCtx, entry: &PlanEntry) -> Result<(), CurtinError> {
    let members = mdadm::member_devices(&ctx.sysfs_root, &entry.kname);

    shell::exec("mdadm", &["--manage", "--stop", &entry.devpath])?;

    for member in members {
        let member_path = block::kname_to_path(&member);
        shell::exec("mdadm", &["--zero-superblock", &member_path])?;
    }

    Ok(())
}

fn shutdown_bcache(ctx: &ShutdownCtx, entry: &PlanEntry) -> Result<(), CurtinError> {
    let bcache_dir = ctx.sysfs_root.join(&entry.kname).join("bcache");

    if !bcache_dir.exists() {
        // already stopped while handling another bcache device
        info!("bcache {} already shut down, skipping", entry.devpath);
        return Ok(());
    }

    // detach the cache set first, then stop the backing device
    let cache_dir = bcache_dir.join("cache");
    if cache_dir.exists() {
        let stop = std::fs::canonicalize(&cache_dir)
            .unwrap_or(cache_dir)
            .join("stop");
        if let Err(err) = std::fs::write(&stop, "1") {
            warn!("bcache cache-set stop failed: {err}");
        }
    }

    std::fs::write(bcache_dir.join("stop"), "1").map_err(|err| {
        CurtinError::CmdFailed {
            error: Some(err),
            context: format!("cannot stop bcache {}", entry.devpath),
        }
    })
}

fn shutdown_mpath(ctx: &ShutdownCtx, entry: &PlanEntry) -> Result<(), CurtinError> {
    let name_file = ctx.sysfs_root.join(&entry.kname).join("dm/name");
    let map_name = std::fs::read_to_string(name_file)
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| entry.devpath.clone());

    shell::exec_rcs("multipath", &["-f", &map_name], &[0, 1])?;
    Ok(())
}

fn wipe_superblock(ctx: &ShutdownCtx, entry: &PlanEntry) -> Result<(), CurtinError> {
    if is_extended_partition(ctx, entry) {
        // the extended slot shares its bytes with the first logical EBR
        info!("skipping wipe of extended partition {}", entry.devpath);
        return Ok(());
    }

    wipe::wipe_volume(&entry.devpath, Wipe::Superblock)
}

fn is_extended_partition(ctx: &ShutdownCtx, entry: &PlanEntry) -> bool {
    if entry.dev_type != DevType::Partition {
        return false;
    }

    let dev_dir = ctx.sysfs_root.join(&entry.kname);
    let number: u32 = match std::fs::read_to_string(dev_dir.join("partition")) {
        Ok(raw) => raw.trim().parse().unwrap_or(0),
        Err(_) => return false,
    };

    if number > 4 {
        return false;
    }

    let Some(parent) = parent_kname(&ctx.sysfs_root, &entry.kname) else {
        return false;
    };

    ctx.msdos_disks.contains(&parent) && has_dos_signature(&entry.devpath)
}

/// Owning disk of a partition, from the sysfs directory layout
/// (partitions live inside their disk's directory).
pub fn parent_kname(sysfs_root: &Path, kname: &str) -> Option<String> {
    let resolved = std::fs::canonicalize(sysfs_root.join(kname)).ok()?;
    let parent = resolved.parent()?.file_name()?.to_string_lossy().to_string();

    let root_name = std::fs::canonicalize(sysfs_root)
        .ok()?
        .file_name()?
        .to_string_lossy()
        .to_string();

    match parent == root_name {
        true => None,
        false => Some(parent),
    }
}

// An extended partition carries its own 0x55aa boot signature, because
// its format is that of a nested mbr.
fn has_dos_signature(devpath: &str) -> bool {
    use std::io::{Read, Seek, SeekFrom};

    let Ok(mut file) = std::fs::File::open(devpath) else {
        return false;
    };

    if file.seek(SeekFrom::Start(510)).is_err() {
        return false;
    }

    let mut sig = [0u8; 2];
    match file.read_exact(&mut sig) {
        Ok(()) => sig == [0x55, 0xaa],
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir_all(root.join("sda1/holders")).unwrap();

        let ctx = ShutdownCtx {
            sysfs_root: root.to_path_buf(),
            proc_mounts_path: root.join("mounts"),
            msdos_disks: Vec::new(),
        };

        let part = PlanEntry {
            kname: String::from("sda1"),
            devpath: String::from("/dev/sda1"),
            dev_type: DevType::Partition,
            level: 1,
            mountpoint: None,
        };
        assert!(node_gone(&ctx, &part));

        std::fs::create_dir_all(root.join("sda1/holders/dm-0")).unwrap();
        assert!(!node_gone(&ctx, &part));

        let crypt = PlanEntry {
            kname: String::from("dm-0"),
            devpath: String::from("/dev/dm-0"),
            dev_type: DevType::Crypt,
            level: 2,
            mountpoint: None,
        };
        // dm node directory absent: gone
        assert!(node_gone(&ctx, &crypt));

        std::fs::create_dir_all(root.join("dm-0")).unwrap();
        assert!(!node_gone(&ctx, &crypt));
    }

    #[test]
    fn test_node_gone_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        let ctx = ShutdownCtx {
            sysfs_root: root.to_path_buf(),
            proc_mounts_path: root.join("mounts"),
            msdos_disks: Vec::new(),
        };

        let step = PlanEntry {
            kname: String::from("sda1"),
            devpath: String::from("/dev/sda1"),
            dev_type: DevType::Mount,
            level: 1,
            mountpoint: Some(String::from("/srv")),
        };

        std::fs::write(root.join("mounts"), "/dev/sda1 /srv ext4 rw 0 0\n")
            .unwrap();
        assert!(!node_gone(&ctx, &step));

        // unmounted: the path leaves the table
        std::fs::write(root.join("mounts"), "").unwrap();
        assert!(node_gone(&ctx, &step));
    }

    #[test]
    fn test_has_dos_signature() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dev");

        let mut data = vec![0u8; 1024];
        data[510] = 0x55;
        data[511] = 0xaa;
        std::fs::write(&path, &data).unwrap();
        assert!(has_dos_signature(&path.display().to_string()));

        data[511] = 0x00;
        std::fs::write(&path, &data).unwrap();
        assert!(!has_dos_signature(&path.display().to_string()));
    }
}
