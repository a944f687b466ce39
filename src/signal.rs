//! Signal-driven lifecycle thread.
//!
//! A dedicated thread blocks synchronously on a fixed signal set so that
//! asynchronous signal handlers never touch the session map or do I/O.
//! All other threads must have these signals blocked in their mask before
//! this thread is started, so only it ever dequeues them — the same
//! discipline the reference C signal handler documents (`objectstore.c`:
//! `pthread_sigmask` before spawning any worker thread).

use crate::worker::Worker;
use log::info;
use nix::sys::signal::{kill, SigSet, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Builds the signal set this process cares about and blocks it on the
/// calling thread. Must be called before any other thread (acceptor,
/// handlers) is spawned, so the mask is inherited by all of them.
pub fn install_process_mask() -> nix::Result<SigSet> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGQUIT);
    set.add(Signal::SIGUSR1);
    set.add(Signal::SIGPIPE);
    set.thread_block()?;
    Ok(set)
}

/// Spawns the lifecycle thread. Loops on `set.wait()` (the `sigwait(3)`
/// equivalent): shutdown signals flip `shutdown`, `SIGUSR1` prints a
/// report, `SIGPIPE` is dequeued and silently dropped so a write to a
/// disconnected peer never raises it process-wide.
pub fn spawn(set: SigSet, worker: Arc<Worker>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        info!("signal thread started");
        while !shutdown.load(Ordering::Relaxed) {
            let signal = match set.wait() {
                Ok(signal) => signal,
                Err(err) => {
                    log::warn!("signal wait failed: {err}");
                    continue;
                }
            };
            match signal {
                Signal::SIGINT | Signal::SIGTERM | Signal::SIGQUIT => {
                    info!("received {signal:?}, shutting down");
                    shutdown.store(true, Ordering::Relaxed);
                }
                Signal::SIGUSR1 => print_report(&worker),
                Signal::SIGPIPE => {}
                other => log::debug!("ignoring unexpected signal {other:?}"),
            }
        }
        info!("signal thread stopped");
    })
}

/// Wakes the lifecycle thread out of its blocking `set.wait()` when no real
/// signal is expected to arrive on its own, e.g. after a fatal accept-loop
/// error. Must be `kill(getpid(), ...)`, process-directed: `raise(3)` only
/// targets the calling thread, which already has this signal blocked in its
/// own mask, and would never hand it to the thread parked in `sigwait`.
pub fn wake_for_shutdown() -> nix::Result<()> {
    kill(Pid::this(), Signal::SIGTERM)
}

fn print_report(worker: &Worker) {
    match worker.report() {
        Ok(report) => println!(
            "clients={} objects={} bytes={}",
            report.live_sessions, report.object_count, report.total_bytes
        ),
        Err(err) => log::warn!("failed to compute report: {err}"),
    }
}
