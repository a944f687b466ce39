//! Partitioned concurrent map from connection id to user name.
//!
//! Sharded into a fixed number of partitions, each behind its own
//! `parking_lot::Mutex` — the same "contention proportional to connection
//! count" discipline `fuser`'s multi-threaded session (`session_mt.rs`)
//! applies to its worker-thread bookkeeping, here applied to session state
//! instead of thread state.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of partitions. Must be a power of two; 16 matches the reference
/// C hashtable (`src/lib/hashtable/hashtable.c`, which locks with 16 mutexes).
const PARTITIONS: usize = 16;

#[derive(Debug, PartialEq, Eq)]
pub enum MapError {
    AlreadyPresent,
    NotPresent,
}

/// djb2-style mix, chosen for dispersion across sequential connection ids.
fn hash_conn_id(conn: u64) -> u64 {
    let mut hash: u64 = 5381;
    for byte in conn.to_le_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

fn partition_of(conn: u64) -> usize {
    (hash_conn_id(conn) % PARTITIONS as u64) as usize
}

struct Partition {
    entries: Mutex<Vec<(u64, String)>>,
}

/// Mapping connection-id -> user-name, sharded into [`PARTITIONS`] locks.
pub struct SessionMap {
    partitions: Vec<Partition>,
    len: AtomicUsize,
}

impl SessionMap {
    pub fn new() -> SessionMap {
        let partitions = (0..PARTITIONS)
            .map(|_| Partition {
                entries: Mutex::new(Vec::new()),
            })
            .collect();
        SessionMap {
            partitions,
            len: AtomicUsize::new(0),
        }
    }

    /// Inserts `(conn, name)`. Fails with [`MapError::AlreadyPresent`] if
    /// `conn` already has an entry.
    pub fn insert(&self, conn: u64, name: String) -> Result<(), MapError> {
        let part = &self.partitions[partition_of(conn)];
        let mut entries = part.entries.lock();
        if entries.iter().any(|(k, _)| *k == conn) {
            return Err(MapError::AlreadyPresent);
        }
        entries.push((conn, name));
        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Removes and returns the entry for `conn`, or `NotPresent`.
    pub fn remove(&self, conn: u64) -> Result<String, MapError> {
        let part = &self.partitions[partition_of(conn)];
        let mut entries = part.entries.lock();
        let idx = entries
            .iter()
            .position(|(k, _)| *k == conn)
            .ok_or(MapError::NotPresent)?;
        let (_, name) = entries.swap_remove(idx);
        self.len.fetch_sub(1, Ordering::Relaxed);
        Ok(name)
    }

    /// Returns a copy of the user name registered for `conn`, if any.
    pub fn lookup(&self, conn: u64) -> Result<String, MapError> {
        let part = &self.partitions[partition_of(conn)];
        let entries = part.entries.lock();
        entries
            .iter()
            .find(|(k, _)| *k == conn)
            .map(|(_, v)| v.clone())
            .ok_or(MapError::NotPresent)
    }

    /// Number of live session entries. Read without a lock: a
    /// stale-but-monotonic read is acceptable for reporting.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        SessionMap::new()
    }
}
