use std::path::Path;

use crate::cli;
use crate::errors::CurtinError;
use crate::holders;
use crate::holders::shutdown::{self, ShutdownCtx};
use crate::probe::{mounts, Snapshot, SYS_BLOCK};

pub(super) fn run(args: cli::ArgsClearHolders) -> Result<(), CurtinError> {
    let sysfs_root = Path::new(SYS_BLOCK);

    if args.shutdown_plan {
        let trees: Vec<holders::HolderTree> = args
            .devices
            .iter()
            .map(|device| holders::gen_holders_tree(sysfs_root, device))
            .collect();

        let mounts = mounts::proc_mounts();
        let plan = holders::plan_shutdown(&trees, &mounts);
        let rendered = serde_json::to_string_pretty(&plan)
            .map_err(|err| CurtinError::CurtinRsBug(err.to_string()))?;
        println!("{rendered}");

        return Ok(());
    }

    let snapshot = Snapshot::probe()?;
    let ctx = ShutdownCtx {
        sysfs_root: sysfs_root.to_path_buf(),
        proc_mounts_path: std::path::PathBuf::from(mounts::PROC_MOUNTS),
        msdos_disks: snapshot
            .devices
            .values()
            .filter(|record| {
                matches!(record.ptable.as_deref(), Some("dos") | Some("msdos"))
            })
            .map(|record| record.kname.clone())
            .collect(),
    };

    shutdown::export_zpools(&args.devices)?;
    holders::clear_holders(&ctx, &args.devices)?;
    holders::assert_clear(sysfs_root, &args.devices)
}
