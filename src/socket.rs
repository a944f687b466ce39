//! UNIX-domain socket endpoint lifecycle.
//!
//! A single listening endpoint bound to a well-known path, with a readiness
//! primitive so the accept loop can observe the shutdown flag promptly
//! instead of blocking forever in `accept(2)`. Grounded on the same
//! "poll with a bounded timeout, then act" shape `fuser`'s `nix`-based
//! examples use for their control-plane sockets.

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::unix::io::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ServerSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl ServerSocket {
    /// Binds a stream, address-local listener at `path`. The listener is
    /// set non-blocking so [`accept_timeout`] can poll it with a bounded
    /// wait instead of blocking indefinitely.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<ServerSocket> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        Ok(ServerSocket { listener, path })
    }

    /// Waits up to `timeout` for a connection, then accepts it if one is
    /// ready. Returns `Ok(None)` on timeout so the caller can re-check the
    /// shutdown flag.
    pub fn accept_timeout(&self, timeout: Duration) -> io::Result<Option<UnixStream>> {
        let fd = self.listener.as_fd();
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
        let ready = poll(&mut fds, timeout).map_err(io::Error::from)?;
        if ready == 0 {
            return Ok(None);
        }
        match self.listener.accept() {
            Ok((stream, _addr)) => Ok(Some(stream)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Closes the listening descriptor and unlinks the socket path.
    pub fn shutdown(self) -> io::Result<()> {
        drop(self.listener);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
