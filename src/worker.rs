//! On-disk layout, per-block I/O and aggregate reporting.
//!
//! A pure library invoked under handler context: it owns nothing persistent
//! beyond the on-disk tree and is consulted through the shared
//! [`SessionMap`]. Modeled after the way `fuser`'s filesystem trait methods
//! are plain functions taking a request context and returning `io::Result`,
//! without any background state of their own.

use crate::error::{Result, StoreError};
use crate::io_ops::{read_exact, write_exact};
use crate::session_map::{MapError, SessionMap};
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Aggregate counters computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub live_sessions: usize,
    pub object_count: u64,
    pub total_bytes: u64,
}

pub struct Worker {
    root: PathBuf,
    sessions: SessionMap,
}

impl Worker {
    /// Creates the store root directory if absent. The directory tree is
    /// never torn down; only in-memory structures are.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Worker> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Worker {
            root,
            sessions: SessionMap::new(),
        })
    }

    fn user_dir(&self, user: &str) -> PathBuf {
        self.root.join(user)
    }

    fn block_path(&self, user: &str, block_name: &str) -> PathBuf {
        self.user_dir(user).join(block_name)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ensures the user's directory exists and inserts `(conn, name)` into
    /// the session map. Fails with [`StoreError::AlreadyPresent`] if `conn`
    /// is already mapped.
    pub fn register(&self, conn: u64, name: &str) -> Result<()> {
        let dir = self.user_dir(name);
        let existed = dir.exists();
        fs::create_dir_all(&dir)?;
        match self.sessions.insert(conn, name.to_owned()) {
            Ok(()) => {
                if existed {
                    info!("register: conn {conn} reusing existing directory for {name:?}");
                } else {
                    info!("register: conn {conn} created directory for {name:?}");
                }
                Ok(())
            }
            Err(MapError::AlreadyPresent) => Err(StoreError::AlreadyPresent),
            Err(MapError::NotPresent) => unreachable!("insert never returns NotPresent"),
        }
    }

    fn resolve_user(&self, conn: u64) -> Result<String> {
        self.sessions.lookup(conn).map_err(|_| StoreError::NotRegistered)
    }

    /// Opens `<root>/<user>/<block-name>` for writing, creating and
    /// truncating as needed, and writes exactly `length` bytes. A STORE
    /// onto an existing name overwrites it rather than failing.
    pub fn store(&self, conn: u64, block_name: &str, data: &[u8], length: u64) -> Result<()> {
        crate::protocol::validate_name(block_name)?;
        let user = self.resolve_user(conn)?;
        let path = self.block_path(&user, block_name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let written = write_exact(file.as_raw_fd(), data)?;
        if (written as u64) != length {
            warn!(
                "store: truncated write for {block_name:?} ({written}/{length} bytes); removing partial file"
            );
            let _ = fs::remove_file(&path);
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write",
            )));
        }
        Ok(())
    }

    /// Resolves the user, stats the file for its length, reads it whole.
    /// Fails with [`StoreError::NoSuchBlock`] if the file does not exist.
    ///
    /// The on-disk length drives the read buffer's size and is not trusted
    /// to be allocator-friendly (a prior STORE, or an externally-placed
    /// file, could have any length): reserves fallibly and fails the
    /// request with [`StoreError::OutOfMemory`] rather than aborting.
    pub fn retrieve(&self, conn: u64, block_name: &str) -> Result<Vec<u8>> {
        crate::protocol::validate_name(block_name)?;
        let user = self.resolve_user(conn)?;
        let path = self.block_path(&user, block_name);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(StoreError::NoSuchBlock),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let length = file.metadata()?.len();
        let mut buf = Vec::new();
        buf.try_reserve_exact(length as usize)
            .map_err(|_| StoreError::OutOfMemory)?;
        buf.resize(length as usize, 0);
        let n = read_exact(file.as_raw_fd(), &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Unlinks the file. Fails with [`StoreError::NoSuchBlock`] if absent.
    pub fn delete(&self, conn: u64, block_name: &str) -> Result<()> {
        crate::protocol::validate_name(block_name)?;
        let user = self.resolve_user(conn)?;
        let path = self.block_path(&user, block_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NoSuchBlock),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Removes `(conn, *)` from the session map. The directory and its
    /// objects remain on disk. Idempotent: a missing entry is not an error.
    pub fn leave(&self, conn: u64) {
        let _ = self.sessions.remove(conn);
    }

    /// Walks the store root to compute object count and total byte size,
    /// and reads the session map's live count.
    pub fn report(&self) -> io::Result<Report> {
        let mut object_count = 0u64;
        let mut total_bytes = 0u64;
        walk_files(&self.root, &mut |meta| {
            object_count += 1;
            total_bytes += meta.len();
        })?;
        Ok(Report {
            live_sessions: self.sessions.len(),
            object_count,
            total_bytes,
        })
    }
}

fn walk_files(dir: &Path, visit: &mut impl FnMut(&fs::Metadata)) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            walk_files(&entry.path(), visit)?;
        } else if meta.is_file() {
            visit(&meta);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_creates_directory_and_session() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        assert!(dir.path().join("data").join("alice").is_dir());
        assert_eq!(worker.session_count(), 1);
    }

    #[test]
    fn register_twice_same_conn_fails() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        assert!(matches!(worker.register(1, "alice"), Err(StoreError::AlreadyPresent)));
    }

    #[test]
    fn store_retrieve_roundtrip() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        worker.store(1, "foo", &payload, payload.len() as u64).unwrap();
        let got = worker.retrieve(1, "foo").unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn store_overwrites_last_writer_wins() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        worker.store(1, "foo", b"first", 5).unwrap();
        worker.store(1, "foo", b"second!!", 8).unwrap();
        assert_eq!(worker.retrieve(1, "foo").unwrap(), b"second!!");
    }

    #[test]
    fn retrieve_missing_is_no_such_block() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        assert!(matches!(worker.retrieve(1, "nope"), Err(StoreError::NoSuchBlock)));
    }

    #[test]
    fn store_without_register_is_not_registered() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        assert!(matches!(worker.store(1, "foo", b"abc", 3), Err(StoreError::NotRegistered)));
    }

    #[test]
    fn delete_then_delete_is_no_such_block() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        worker.store(1, "foo", b"abc", 3).unwrap();
        worker.delete(1, "foo").unwrap();
        assert!(matches!(worker.delete(1, "foo"), Err(StoreError::NoSuchBlock)));
    }

    #[test]
    fn leave_does_not_remove_disk_state() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        worker.store(1, "foo", b"abc", 3).unwrap();
        worker.leave(1);
        assert_eq!(worker.session_count(), 0);
        assert!(dir.path().join("data").join("alice").join("foo").exists());
    }

    #[test]
    fn report_counts_files_and_bytes() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "u1").unwrap();
        worker.register(2, "u2").unwrap();
        worker.store(1, "a", b"0123456789", 10).unwrap();
        worker.store(2, "b", &[0u8; 20], 20).unwrap();
        worker.store(2, "c", &[0u8; 30], 30).unwrap();
        let report = worker.report().unwrap();
        assert_eq!(report.live_sessions, 2);
        assert_eq!(report.object_count, 3);
        assert_eq!(report.total_bytes, 60);
    }

    #[test]
    fn reregister_same_name_reuses_directory_across_sessions() {
        let dir = tempdir().unwrap();
        let worker = Worker::new(dir.path().join("data")).unwrap();
        worker.register(1, "alice").unwrap();
        worker.store(1, "foo", b"abc", 3).unwrap();
        worker.leave(1);
        worker.register(2, "alice").unwrap();
        assert_eq!(worker.retrieve(2, "foo").unwrap(), b"abc");
    }
}
