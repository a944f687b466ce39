//! Binary entry point: parses CLI configuration and runs the server to
//! completion.

use clap::Parser;
use objstore::config::{Cli, Config};

fn main() {
    env_logger::init();

    let config = Config::from(Cli::parse());
    if let Err(err) = objstore::run(config) {
        log::error!("fatal startup error: {err}");
        std::process::exit(1);
    }
}
