use std::path::PathBuf;
use std::time::Duration;

use log::info;

use crate::apply::{self, RunEnv};
use crate::cli;
use crate::errors::CurtinError;
use crate::lock::HostLock;
use crate::storage::{self, validation};
use crate::utils::fs;

// How long a second engine instance may wait on the host lock before
// giving up.
const LOCK_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub(super) fn run(
    config_arg: Option<&str>,
    args: cli::ArgsBlockMeta,
) -> Result<(), CurtinError> {
    let cli::BlockMetaMode::Custom = args.mode;

    let config_path = match config_arg {
        Some(path) => path.to_string(),
        None => std::env::var("CONFIG").map_err(|_| {
            CurtinError::BadEnvironment(String::from(
                "no --config argument and CONFIG is unset",
            ))
        })?,
    };

    let target = std::env::var("TARGET_MOUNT_POINT").map_err(|_| {
        CurtinError::BadEnvironment(String::from("TARGET_MOUNT_POINT is unset"))
    })?;

    // progress events carry the installer's reporting prefix when set
    let stack_prefix = std::env::var("CURTIN_REPORT_STACK_PREFIX")
        .unwrap_or_else(|_| String::from("cmd-block-meta"));

    let start = std::time::Instant::now();
    info!("{stack_prefix}: applying storage config from {config_path}");

    let config_yaml = fs::read_file(&config_path)?;
    let storage = storage::parse(&config_yaml)?;

    // structural errors abort before any device is touched
    validation::validate(&storage)?;

    let _lock = HostLock::acquire(LOCK_TIMEOUT)?;

    let env = RunEnv {
        target: PathBuf::from(target),
        output_fstab: std::env::var("OUTPUT_FSTAB").ok(),
        working_dir: std::env::var("WORKING_DIR").ok(),
    };

    apply::run(&storage, env)?;

    info!("{stack_prefix}: finished in {:?}", start.elapsed());

    Ok(())
}
