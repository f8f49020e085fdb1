pub mod cli;
pub mod coordinator;
pub mod daemons;
pub mod db;
pub mod desktop_bridge;
pub mod engine;
pub mod error;
pub mod notify;
pub mod reliability;
pub mod scheduler;
pub mod screen;
pub mod settings;
pub mod terminal;
mod utils;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

use clap::Parser;

pub use engine::Engine;
pub use error::{AutomationError, AutomationResult, ErrorKind};

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = cli::Cli::parse();
    log::info!("termreg starting up...");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(cli::execute(cli)) {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
