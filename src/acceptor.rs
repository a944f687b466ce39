//! Connection acceptor and supervisor.
//!
//! One thread owns the listening socket, accepts with a bounded-timeout
//! poll so the shutdown flag is observed promptly, and spawns one handler
//! thread per connection — mirroring the worker-thread bookkeeping in
//! `fuser`'s `session_mt::MtState` (a tracked `Vec` of join handles, joined
//! on the way out), just without the idle-thread reclamation `fuser` does
//! for FUSE's fixed-size worker pool: here it's one thread per live
//! connection, unbounded.

use crate::handler;
use crate::socket::ServerSocket;
use crate::worker::Worker;
use log::info;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct Acceptor {
    socket: ServerSocket,
    worker: Arc<Worker>,
    shutdown: Arc<AtomicBool>,
    accept_timeout: Duration,
    next_conn_id: AtomicU64,
}

impl Acceptor {
    pub fn new(
        socket: ServerSocket,
        worker: Arc<Worker>,
        shutdown: Arc<AtomicBool>,
        accept_timeout: Duration,
    ) -> Acceptor {
        Acceptor {
            socket,
            worker,
            shutdown,
            accept_timeout,
            next_conn_id: AtomicU64::new(0),
        }
    }

    /// Runs the accept loop until the shutdown flag is set, then joins
    /// every spawned handler thread in LIFO order and tears down the
    /// listening socket.
    ///
    /// Returns `Ok(())` on a graceful (signal-driven) shutdown. An
    /// unrecoverable accept-loop error is fatal to the process: it is
    /// returned here so the caller can `exit(1)` without waiting on
    /// in-flight handlers.
    pub fn run(self) -> std::io::Result<()> {
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();
        let mut fatal = None;

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.socket.accept_timeout(self.accept_timeout) {
                Ok(Some(stream)) => {
                    let conn = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    info!("accepted connection {conn}");
                    handlers.push(self.spawn_handler(conn, stream));
                }
                Ok(None) => continue,
                Err(err) => {
                    log::error!("accept failed: {err}");
                    fatal = Some(err);
                    break;
                }
            }
        }

        while let Some(handle) = handlers.pop() {
            let id = handle.thread().id();
            if handle.join().is_err() {
                log::warn!("handler thread {id:?} panicked");
            } else {
                log::debug!("handler thread {id:?} terminated");
            }
        }

        if let Err(err) = self.socket.shutdown() {
            log::warn!("failed to tear down listening socket: {err}");
        }
        info!("acceptor stopped");

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_handler(&self, conn: u64, stream: UnixStream) -> JoinHandle<()> {
        let worker = Arc::clone(&self.worker);
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::spawn(move || handler::run_connection(conn, stream, &worker, &shutdown))
    }
}
