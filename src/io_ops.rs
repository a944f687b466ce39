//! Unbuffered whole-buffer read/write over a raw file descriptor.
//!
//! This is the only layer in the crate allowed to call `read(2)`/`write(2)`
//! directly; every other component goes through [`read_exact`]/[`write_exact`].
//! Grounded on the raw-fd receive/send pair in `fuser`'s `io_ops` module and
//! the `EINTR`-retry handling in its session loop, generalized here into an
//! explicit loop-until-n-bytes contract.

use libc::{c_void, size_t};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::time::Duration;

/// Reads exactly `buf.len()` bytes from `fd`, looping over interruptions.
///
/// Returns the number of bytes actually obtained, in `[0, buf.len()]`. A
/// short count is only ever returned on EOF; an EINTR never produces one.
pub fn read_exact(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let rc = unsafe {
            libc::read(
                fd,
                buf[total..].as_mut_ptr() as *mut c_void,
                (buf.len() - total) as size_t,
            )
        };
        match rc {
            0 => break, // EOF
            n if n < 0 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            n => total += n as usize,
        }
    }
    Ok(total)
}

/// Writes exactly `buf.len()` bytes to `fd`, looping over interruptions.
///
/// A zero-byte write reported without an error is treated as
/// interruption-equivalent and retried.
pub fn write_exact(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let rc = unsafe {
            libc::write(
                fd,
                buf[total..].as_ptr() as *const c_void,
                (buf.len() - total) as size_t,
            )
        };
        match rc {
            n if n < 0 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            0 => continue, // zero-byte write with no error: interruption-equivalent
            n => total += n as usize,
        }
    }
    Ok(total)
}

/// Waits up to `timeout` for `fd` to become readable (or hit EOF/HUP).
/// Returns `false` on timeout so a caller can re-check a shutdown flag
/// between waits instead of blocking in `read(2)` indefinitely — the same
/// bounded-wait discipline [`crate::socket::ServerSocket::accept_timeout`]
/// uses for the listening socket.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
    let ready = poll(&mut fds, timeout).map_err(io::Error::from)?;
    Ok(ready > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::thread;

    #[test]
    fn round_trips_exact_bytes() {
        let (a, b) = UnixStream::pair().unwrap();
        let payload = vec![7u8; 70_000];
        let payload2 = payload.clone();
        let writer = thread::spawn(move || {
            write_exact(a.as_raw_fd(), &payload2).unwrap();
        });
        let mut buf = vec![0u8; 70_000];
        let n = read_exact(b.as_raw_fd(), &mut buf).unwrap();
        writer.join().unwrap();
        assert_eq!(n, 70_000);
        assert_eq!(buf, payload);
    }

    #[test]
    fn read_exact_returns_short_count_on_eof() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let mut buf = vec![0u8; 16];
        let n = read_exact(b.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(n, 0);
    }
}
