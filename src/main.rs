//! Thin binary entry point: parse the CLI, set up logging, and hand off to
//! [`sni_proxy::run`] on a single-threaded Tokio runtime — one cooperative
//! event loop, no session ever touched from more than one task.

use clap::Parser;
use sni_proxy::cli::Cli;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, sni_proxy::run(cli))
}
