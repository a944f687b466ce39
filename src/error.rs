//! Error taxonomy for the object store.
//!
//! Mirrors the `KO <code>` wire values of the protocol (see
//! `crate::protocol`). Kept dependency-light on purpose, the same way the
//! rest of this crate avoids `thiserror`/`anyhow` in favor of a small
//! hand-rolled `std::error::Error` impl.

use std::fmt;
use std::io;

/// A single stable numeric code sent back to clients as `KO <code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const BAD_ARGUMENT: ErrorCode = ErrorCode(22);
    pub const NOT_REGISTERED: ErrorCode = ErrorCode(107);
    pub const ALREADY_PRESENT: ErrorCode = ErrorCode(114);
    pub const NO_SUCH_BLOCK: ErrorCode = ErrorCode(2);
    pub const OUT_OF_MEMORY: ErrorCode = ErrorCode(12);

    /// An io-failure code, carrying the raw OS errno when one is available.
    pub fn io(raw_errno: Option<i32>) -> ErrorCode {
        ErrorCode(raw_errno.unwrap_or(libc::EIO))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request-scoped failure. Never aborts the process; handlers convert
/// this into a `KO <code>` reply.
#[derive(Debug)]
pub enum StoreError {
    /// Malformed header, bad verb, bad length, empty name, etc.
    BadArgument(String),
    /// The requesting connection has no session entry.
    NotRegistered,
    /// REGISTER on a connection that is already registered.
    AlreadyPresent,
    /// RETRIEVE/DELETE on a name with no backing file.
    NoSuchBlock,
    /// Any read/write/open/unlink/stat failure.
    Io(io::Error),
    /// Allocation failure, raised by the fallible `try_reserve_exact`
    /// calls sizing a buffer off a client- or disk-supplied length:
    /// `handler::read_payload` (STORE) and `worker::retrieve` (RETRIEVE).
    OutOfMemory,
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::BadArgument(_) => ErrorCode::BAD_ARGUMENT,
            StoreError::NotRegistered => ErrorCode::NOT_REGISTERED,
            StoreError::AlreadyPresent => ErrorCode::ALREADY_PRESENT,
            StoreError::NoSuchBlock => ErrorCode::NO_SUCH_BLOCK,
            StoreError::Io(err) => ErrorCode::io(err.raw_os_error()),
            StoreError::OutOfMemory => ErrorCode::OUT_OF_MEMORY,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::BadArgument(msg) => write!(f, "bad argument: {msg}"),
            StoreError::NotRegistered => write!(f, "connection is not registered"),
            StoreError::AlreadyPresent => write!(f, "connection is already registered"),
            StoreError::NoSuchBlock => write!(f, "no such block"),
            StoreError::Io(err) => write!(f, "io failure: {err}"),
            StoreError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
