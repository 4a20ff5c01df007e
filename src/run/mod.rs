mod block_meta;
mod clear_holders;

use std::path::Path;

use crate::cli;
use crate::errors::CurtinError;
use crate::holders;
use crate::probe::SYS_BLOCK;

pub fn run(args: cli::Cli) -> Result<(), CurtinError> {
    match args.commands {
        cli::Commands::BlockMeta(meta_args) => {
            block_meta::run(args.config.as_deref(), meta_args)
        }

        cli::Commands::ClearHolders(clear_args) => clear_holders::run(clear_args),

        cli::Commands::AssertClear(assert_args) => {
            holders::assert_clear(Path::new(SYS_BLOCK), &assert_args.devices)
        }
    }
}
