//! A multi-client object-store server exposing a text-framed binary
//! protocol over a UNIX-domain stream socket.
//!
//! Registered clients store, retrieve, and delete named byte blocks within
//! a per-client namespace; the server persists blocks on local disk and
//! maintains live per-client session state in memory.

pub mod acceptor;
pub mod config;
pub mod error;
pub mod handler;
pub mod io_ops;
pub mod protocol;
pub mod session_map;
pub mod signal;
pub mod socket;
pub mod worker;

use config::Config;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Builds and runs the server to completion: installs the signal mask,
/// binds the listening socket, and runs the accept loop until a shutdown
/// signal arrives. Returns once every handler and the signal thread have
/// been joined.
pub fn run(config: Config) -> std::io::Result<()> {
    let signal_set = signal::install_process_mask()
        .map_err(|err| std::io::Error::other(format!("installing signal mask: {err}")))?;

    let worker = Arc::new(worker::Worker::new(&config.data_root)?);
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_thread = signal::spawn(signal_set, Arc::clone(&worker), Arc::clone(&shutdown));

    let listener = socket::ServerSocket::bind(&config.socket_path)?;
    log::info!(
        "started on socket {:?} and waiting for connections",
        config.socket_path
    );
    let acceptor =
        acceptor::Acceptor::new(listener, worker, Arc::clone(&shutdown), config.accept_timeout);
    let result = acceptor.run();

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    if result.is_err() {
        // The accept loop only returns `Err` on an unrecoverable failure, with
        // no guarantee a real SIGINT/SIGTERM/SIGQUIT is ever coming; without
        // this, the signal thread can stay parked in `set.wait()` forever and
        // the join below never returns.
        if let Err(err) = signal::wake_for_shutdown() {
            log::warn!("failed to wake signal thread for shutdown: {err}");
        }
    }
    if signal_thread.join().is_err() {
        log::warn!("signal thread panicked");
    }
    log::info!("server stopped");
    result
}
