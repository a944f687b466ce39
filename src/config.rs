//! Server configuration.
//!
//! Every field defaults to the reference server's fixed paths, so invoking
//! the binary with zero arguments reproduces that behavior exactly.
//! Overrides exist purely for test isolation and local development, the
//! same way `fuser`'s example binaries layer a `clap`-derived CLI on top of
//! a library that is itself argument-agnostic.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "objstore-server", about = "Multi-client object-store server")]
pub struct Cli {
    /// Path of the UNIX-domain socket to listen on.
    #[arg(long, default_value = "./objstore.sock")]
    pub socket_path: PathBuf,

    /// Root directory under which per-user object directories are created.
    #[arg(long, default_value = "./data")]
    pub data_root: PathBuf,

    /// Timeout, in milliseconds, for each accept-readiness poll.
    #[arg(long, default_value_t = 1000)]
    pub accept_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub socket_path: PathBuf,
    pub data_root: PathBuf,
    pub accept_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: PathBuf::from("./objstore.sock"),
            data_root: PathBuf::from("./data"),
            accept_timeout: Duration::from_secs(1),
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            socket_path: cli.socket_path,
            data_root: cli.data_root,
            accept_timeout: Duration::from_millis(cli.accept_timeout_ms),
        }
    }
}
