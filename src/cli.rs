use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::errors::CurtinError;

#[derive(Debug, Parser)]
#[clap(
    version,
    about = "Declarative block-storage provisioning engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub commands: Commands,

    /// Installer config file holding the `storage` document.
    /// Falls back to the CONFIG environment variable.
    #[arg(global = true, short = 'c', long = "config")]
    pub config: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply the storage configuration to the current host
    BlockMeta(ArgsBlockMeta),

    /// Shut down every device stack above the given devices
    ClearHolders(ArgsClearHolders),

    /// Exit zero iff no holders remain above the given devices
    AssertClear(ArgsAssertClear),
}

#[derive(Debug, Args)]
pub struct ArgsBlockMeta {
    /// Meta-mode; only `custom` is configuration-driven
    #[arg(value_enum)]
    pub mode: BlockMetaMode,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum BlockMetaMode {
    /// Materialize the topology described under `storage.config`
    Custom,
}

#[derive(Debug, Args)]
pub struct ArgsClearHolders {
    /// Print the ordered shutdown plan without executing it
    #[arg(long = "shutdown-plan")]
    pub shutdown_plan: bool,

    /// Target devices, as /dev or /sys/block paths
    #[arg(required = true, value_parser = validate_device_arg)]
    pub devices: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ArgsAssertClear {
    /// Target devices, as /dev or /sys/block paths
    #[arg(required = true, value_parser = validate_device_arg)]
    pub devices: Vec<String>,
}

fn validate_device_arg(name: &str) -> Result<String, CurtinError> {
    if name.is_empty() {
        return Err(CurtinError::BadArgs(String::from("empty device path")));
    }

    Ok(name.to_string())
}
