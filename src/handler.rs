//! Per-connection state machine: reads a framed request, routes it to the
//! [`Worker`], and writes back a framed reply.
//!
//! Runs single-threaded with respect to its own connection, one OS thread
//! per live connection — the same per-connection-thread shape as `fuser`'s
//! `session_mt` worker threads, just driven by a socket read loop instead of
//! a `/dev/fuse` read loop.

use crate::error::StoreError;
use crate::io_ops::{read_exact, wait_readable, write_exact};
use crate::protocol::{self, ParsedHeader, Verb, MAX_HEADER_LEN};
use crate::worker::Worker;
use log::{debug, warn};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How often an idle connection re-checks the shutdown flag while waiting
/// for its next header, so shutdown reaches an idle connection within
/// seconds rather than only between requests.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unregistered,
    Registered,
    Terminated,
}

/// Drives one connection's request/reply loop to completion.
///
/// Returns once the connection reaches `Terminated`: LEAVE, peer EOF, or
/// the shutdown flag becoming set.
pub fn run_connection(conn: u64, stream: UnixStream, worker: &Worker, shutdown: &AtomicBool) {
    let mut state = State::Unregistered;
    let mut carry: Vec<u8> = Vec::new();

    while state != State::Terminated {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let header = match read_header(&stream, &mut carry, shutdown) {
            Ok(Some(header)) => header,
            Ok(None) => break, // peer EOF, or shutdown observed while idle
            Err(err) => {
                warn!("conn {conn}: failed to read header: {err}");
                break;
            }
        };
        debug!("conn {conn}: {:?} {:?}", header.verb, header.name);

        match dispatch(conn, &stream, worker, &mut state, &header, &mut carry) {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Terminate) => state = State::Terminated,
            Err(err) => {
                warn!("conn {conn}: reply transmission failed, abandoning connection: {err}");
                break;
            }
        }
    }

    worker.leave(conn);
}

enum Outcome {
    Continue,
    Terminate,
}

fn dispatch(
    conn: u64,
    stream: &UnixStream,
    worker: &Worker,
    state: &mut State,
    header: &ParsedHeader,
    carry: &mut Vec<u8>,
) -> io::Result<Outcome> {
    if header.verb == Verb::Leave {
        return Ok(Outcome::Terminate);
    }

    if *state == State::Unregistered && header.verb != Verb::Register {
        write_reply(stream, &protocol::ko_reply(StoreError::NotRegistered.code()))?;
        return Ok(Outcome::Continue);
    }

    match header.verb {
        Verb::Register => match worker.register(conn, &header.name) {
            Ok(()) => {
                *state = State::Registered;
                write_reply(stream, &protocol::ok_reply())?;
            }
            Err(err) => write_reply(stream, &protocol::ko_reply(err.code()))?,
        },
        Verb::Store => {
            let length = header.length.expect("parser guarantees STORE carries a length");
            match read_payload(stream, carry, length) {
                Ok(data) => match worker.store(conn, &header.name, &data, length) {
                    Ok(()) => write_reply(stream, &protocol::ok_reply())?,
                    Err(err) => write_reply(stream, &protocol::ko_reply(err.code()))?,
                },
                Err(err) => {
                    write_reply(stream, &protocol::ko_reply(err.code()))?;
                }
            }
        }
        Verb::Retrieve => match worker.retrieve(conn, &header.name) {
            Ok(data) => {
                let mut reply = protocol::data_header(data.len() as u64);
                reply.extend_from_slice(&data);
                write_reply(stream, &reply)?;
            }
            Err(err) => write_reply(stream, &protocol::ko_reply(err.code()))?,
        },
        Verb::Delete => match worker.delete(conn, &header.name) {
            Ok(()) => write_reply(stream, &protocol::ok_reply())?,
            Err(err) => write_reply(stream, &protocol::ko_reply(err.code()))?,
        },
        Verb::Leave => unreachable!("handled above"),
    }

    Ok(Outcome::Continue)
}

fn write_reply(stream: &UnixStream, reply: &[u8]) -> io::Result<()> {
    write_exact(stream.as_raw_fd(), reply).map(|_| ())
}

/// Reads a complete request header, draining the consumed header bytes out
/// of `carry` and leaving any leftover payload-prefix (or pipelined next
/// request) bytes behind for the next call.
///
/// While waiting for bytes that haven't arrived yet, this polls with a
/// bounded timeout and re-checks `shutdown` between waits, rather than
/// blocking in `read(2)` forever — otherwise an idle connection would never
/// notice the server shutting down.
fn read_header(
    stream: &UnixStream,
    carry: &mut Vec<u8>,
    shutdown: &AtomicBool,
) -> io::Result<Option<ParsedHeader>> {
    let fd: RawFd = stream.as_raw_fd();
    loop {
        if carry.iter().position(|&b| b == b'\n').is_some() {
            let header = protocol::parse_header(carry)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            let rest = carry.split_off(header.header_len);
            *carry = rest;
            return Ok(Some(header));
        }
        if carry.len() >= MAX_HEADER_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, StoreError::BadArgument(
                "header exceeds maximum length".into(),
            )));
        }
        if shutdown.load(Ordering::Relaxed) {
            return Ok(None);
        }
        if !wait_readable(fd, SHUTDOWN_POLL_INTERVAL)? {
            continue;
        }
        let mut chunk = [0u8; MAX_HEADER_LEN];
        let room = MAX_HEADER_LEN - carry.len();
        let n = read_exact_partial(fd, &mut chunk[..room])?;
        if n == 0 {
            return Ok(None);
        }
        carry.extend_from_slice(&chunk[..n]);
    }
}

/// A single (possibly short) read, used while hunting for the header
/// terminator — we must not block waiting for `room` bytes that may never
/// arrive in one read.
fn read_exact_partial(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let rc = unsafe {
            libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len() as libc::size_t)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc as usize);
    }
}

/// Consumes `length` bytes of payload: first whatever is already sitting in
/// `carry` (the header's own bytes were drained by [`read_header`]), then
/// reads the rest directly off the socket.
///
/// `length` comes straight from the client's STORE header (up to 2^64-1) and
/// must never be handed to an infallible allocator: reserves the buffer with
/// [`Vec::try_reserve_exact`] so an attacker-sized length fails the request
/// with [`StoreError::OutOfMemory`] instead of aborting the process.
fn read_payload(stream: &UnixStream, carry: &mut Vec<u8>, length: u64) -> crate::error::Result<Vec<u8>> {
    let length = length as usize;
    let mut leftover = std::mem::take(carry);

    if leftover.len() >= length {
        let rest = leftover.split_off(length);
        *carry = rest;
        return Ok(leftover);
    }

    let have = leftover.len();
    leftover
        .try_reserve_exact(length - have)
        .map_err(|_| StoreError::OutOfMemory)?;
    leftover.resize(length, 0);
    let got = read_exact(stream.as_raw_fd(), &mut leftover[have..])?;
    leftover.truncate(have + got);
    Ok(leftover)
}
