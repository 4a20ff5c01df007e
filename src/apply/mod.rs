pub mod bcache;
pub mod dasd;
pub mod disk;
pub mod dm_crypt;
pub mod format;
pub mod lvm;
pub mod mount;
pub mod partition;
pub mod raid;
pub mod zfs;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use serde_json::json;

use crate::errors::CurtinError;
use crate::holders;
use crate::holders::shutdown::ShutdownCtx;
use crate::linux::udev;
use crate::persist;
use crate::persist::Artifacts;
use crate::plan::{self, StepKind};
use crate::probe::Snapshot;
use crate::storage::{Entry, StorageConfig};
use crate::utils::fs;
use crate::verify;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// SIGINT/SIGTERM are honored between actions only; external tools are
/// not transactional, so a mid-action abort would leave worse state
/// than finishing the action.
pub fn install_signal_handlers() {
    use nix::sys::signal::{signal, SigHandler, Signal};

    let handler = SigHandler::Handler(on_signal);
    unsafe {
        let _ = signal(Signal::SIGINT, handler);
        let _ = signal(Signal::SIGTERM, handler);
    }
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Paths and environment the engine was invoked with.
#[derive(Debug)]
pub struct RunEnv {
    pub target: PathBuf,
    pub output_fstab: Option<String>,
    pub working_dir: Option<String>,
}

/// Mutable state threaded through every executor.
pub struct ApplyContext {
    pub env: RunEnv,
    pub sysfs_root: PathBuf,
    pub snapshot: Snapshot,
    pub artifacts: Artifacts,
    pub nodev_fstypes: HashSet<String>,
    pub version: u32,
    pub grub_devices: Vec<String>,

    /// /dev paths of disks attached over iscsi; their mounts carry
    /// `_netdev`.
    pub iscsi_devices: Vec<String>,
}

impl ApplyContext {
    /// Resolved device path of an already-executed entry.
    pub fn device_path(&self, id: &str) -> Result<String, CurtinError> {
        self.artifacts.device_map.get(id).cloned().ok_or_else(|| {
            CurtinError::CurtinRsBug(format!(
                "entry {id:?} referenced before its device was resolved"
            ))
        })
    }

    pub fn record_device(&mut self, id: &str, devpath: &str) {
        self.artifacts
            .device_map
            .insert(id.to_string(), devpath.to_string());
    }

    pub fn reprobe(&mut self) -> Result<(), CurtinError> {
        udev::settle()?;
        self.snapshot = Snapshot::probe()?;
        Ok(())
    }
}

/// Filesystem types the kernel mounts without a backing device; these
/// take passno 0 in fstab. Read from /proc/filesystems, not hard-coded.
pub fn nodev_fstypes() -> HashSet<String> {
    let Ok(raw) = std::fs::read_to_string("/proc/filesystems") else {
        return HashSet::new();
    };

    parse_proc_filesystems(&raw)
}

pub fn parse_proc_filesystems(raw: &str) -> HashSet<String> {
    raw.lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("nodev") => words.next().map(String::from),
                _ => None,
            }
        })
        .collect()
}

/// Run the full pipeline: teardown, execution, verification, persistence.
pub fn run(storage: &StorageConfig, env: RunEnv) -> Result<(), CurtinError> {
    let plan = plan::build_plan(storage)?;

    install_signal_handlers();

    let snapshot = Snapshot::probe()?;
    let mut ctx = ApplyContext {
        env,
        sysfs_root: PathBuf::from(crate::probe::SYS_BLOCK),
        snapshot,
        artifacts: Artifacts::default(),
        nodev_fstypes: nodev_fstypes(),
        version: storage.version,
        grub_devices: Vec::new(),
        iscsi_devices: Vec::new(),
    };

    clear_target_disks(&mut ctx, &plan.entries)?;

    for step in &plan.steps {
        if interrupted() {
            return Err(CurtinError::ApplyFailed {
                id: plan.entries[step.index].id().to_string(),
                entry_type: plan.entries[step.index].type_name().to_string(),
                context: String::from("interrupted by signal between actions"),
            });
        }

        let entry = &plan.entries[step.index];
        info!("{:?} {} ({})", step.kind, entry.id(), entry.type_name());

        let result = match step.kind {
            StepKind::Execute => execute_entry(&mut ctx, &plan.entries, step.index),
            StepKind::Verify => verify::verify_entry(&mut ctx, &plan.entries, step.index),
        };

        let devpath = match result {
            Ok(devpath) => devpath,
            Err(err) => {
                write_failure_report(&ctx, entry, &err);
                return Err(err);
            }
        };

        if let Some(devpath) = devpath {
            let id = plan.entries[step.index].id().to_string();
            ctx.record_device(&id, &devpath);
        }

        if step.kind == StepKind::Execute && mutates_topology(&plan.entries[step.index])
        {
            ctx.reprobe()?;
        }
    }

    persist::persist_all(
        &ctx.env.target,
        &ctx.artifacts,
        ctx.env.output_fstab.as_deref(),
        storage.device_map_path.as_deref(),
    )?;

    info!(
        "storage apply complete: {} devices, {} grub devices",
        ctx.artifacts.device_map.len(),
        ctx.grub_devices.len()
    );

    Ok(())
}

fn mutates_topology(entry: &Entry) -> bool {
    !matches!(
        entry,
        Entry::Mount(_) | Entry::NvmeController(_) | Entry::Device(_)
    )
}

fn execute_entry(
    ctx: &mut ApplyContext,
    entries: &[Entry],
    index: usize,
) -> Result<Option<String>, CurtinError> {
    let entry = &entries[index];

    let with_context = |err: CurtinError| match err {
        err @ CurtinError::ApplyFailed { .. } => err,
        other => CurtinError::ApplyFailed {
            id: entry.id().to_string(),
            entry_type: entry.type_name().to_string(),
            context: format!("{other}: {other:?}"),
        },
    };

    let devpath = match entry {
        Entry::Dasd(dasd_entry) => dasd::handle(ctx, dasd_entry),
        Entry::Disk(disk_entry) => disk::handle(ctx, disk_entry),
        Entry::Device(device_entry) => disk::handle_device(ctx, device_entry),
        Entry::Partition(part) => partition::handle(ctx, entries, part),
        Entry::Format(format_entry) => format::handle(ctx, format_entry),
        Entry::Mount(mount_entry) => mount::handle(ctx, entries, mount_entry),
        Entry::LvmVolGroup(vg) => lvm::handle_volgroup(ctx, vg),
        Entry::LvmPartition(lv) => lvm::handle_partition(ctx, entries, lv),
        Entry::DmCrypt(crypt) => dm_crypt::handle(ctx, crypt),
        Entry::Raid(raid_entry) => raid::handle(ctx, raid_entry),
        Entry::Bcache(bcache_entry) => bcache::handle(ctx, bcache_entry),
        Entry::Zpool(zpool_entry) => zfs::handle_zpool(ctx, zpool_entry),
        Entry::Zfs(zfs_entry) => zfs::handle_zfs(ctx, zfs_entry),
        Entry::NvmeController(controller) => {
            ctx.artifacts.nvme_controllers.push(controller.clone());
            Ok(None)
        }
    };

    devpath.map_err(with_context)
}

// Disks that will be rewritten get their existing stacks torn down
// before any action runs.
fn clear_target_disks(
    ctx: &mut ApplyContext,
    entries: &[Entry],
) -> Result<(), CurtinError> {
    let mut targets: Vec<String> = Vec::new();

    for entry in entries {
        let devpath = match entry {
            Entry::Disk(d) if !d.preserve && (d.wipe.is_some() || d.ptable.is_some()) => {
                disk::locate(&ctx.snapshot, d)?
            }
            Entry::Device(d) if !d.preserve && d.ptable.is_some() => {
                disk::locate_device(d)?
            }
            _ => continue,
        };

        targets.push(devpath);
    }

    if targets.is_empty() {
        return Ok(());
    }

    info!("clearing holders on: {}", targets.join(", "));

    let shutdown_ctx = ShutdownCtx {
        sysfs_root: ctx.sysfs_root.clone(),
        proc_mounts_path: PathBuf::from(crate::probe::mounts::PROC_MOUNTS),
        msdos_disks: msdos_disks(&ctx.snapshot),
    };

    holders::shutdown::export_zpools(&targets)?;
    holders::clear_holders(&shutdown_ctx, &targets)?;
    holders::assert_clear(&ctx.sysfs_root, &targets)?;

    ctx.reprobe()
}

fn msdos_disks(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .devices
        .values()
        .filter(|record| {
            matches!(record.ptable.as_deref(), Some("dos") | Some("msdos"))
        })
        .map(|record| record.kname.clone())
        .collect()
}

fn write_failure_report(ctx: &ApplyContext, entry: &Entry, err: &CurtinError) {
    let report = json!({
        "entry_id": entry.id(),
        "entry_type": entry.type_name(),
        "error": format!("{err:?}"),
        "probe": &ctx.snapshot,
    });

    let dir = ctx
        .env
        .working_dir
        .clone()
        .unwrap_or_else(|| String::from("/tmp"));
    let path = format!("{dir}/curtin-failure-report.json");

    match fs::write_file(&path, &report.to_string()) {
        Ok(()) => warn!("failure report written to {path}"),
        Err(write_err) => warn!("could not write failure report: {write_err:?}"),
    }
}
