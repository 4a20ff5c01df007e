mod apply;
mod block;
mod cli;
mod errors;
mod holders;
mod linux;
mod lock;
mod persist;
mod plan;
mod probe;
mod run;
mod storage;
mod utils;
mod verify;

use clap::Parser;
use env_logger::Env;
use log::error;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = cli::Cli::parse();

    if let Err(err) = run::run(args) {
        error!("{err}: {err:?}");
        std::process::exit(err.exit_code());
    }
}
