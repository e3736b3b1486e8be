//! Thread-safe wrapper for concurrent database access.
//!
//! `SyncDB` wraps `DB` in `Arc<parking_lot::RwLock<..>>`: many threads may
//! read at once, writes take the lock exclusively. Scans are materialized
//! under the read lock, trading laziness for a handle that can be cloned
//! across threads.

use crate::config::{Config, DbStats, Timestamp, WriteOptions};
use crate::db::{AtomicBatch, CancelHandle, ReclaimableRecord, DB};
use crate::error::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Thread-safe, cloneable handle over a [`DB`].
///
/// # Example
///
/// ```rust
/// use tempra::{SyncDB, Timestamp, WriteOptions};
///
/// # fn main() -> tempra::Result<()> {
/// let db = SyncDB::memory()?;
/// let writer = db.clone();
///
/// std::thread::spawn(move || {
///     writer.put("k", b"v", Some(WriteOptions::at(1u64))).unwrap();
/// })
/// .join()
/// .unwrap();
///
/// assert!(db.latest("k")?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncDB {
    inner: Arc<RwLock<DB>>,
}

impl SyncDB {
    /// Creates a new in-memory database with default configuration.
    pub fn memory() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(DB::memory()?)),
        })
    }

    /// Creates a new in-memory database with custom configuration.
    pub fn memory_with_config(config: Config) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(DB::memory_with_config(config)?)),
        })
    }

    /// Opens a database with AOF persistence at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(DB::open(path)?)),
        })
    }

    /// Opens a database with AOF persistence and custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(DB::open_with_config(path, config)?)),
        })
    }

    pub fn put(
        &self,
        entity: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        opts: Option<WriteOptions>,
    ) -> Result<Timestamp> {
        self.inner.write().put(entity, value, opts)
    }

    pub fn remove(
        &self,
        entity: impl AsRef<[u8]>,
        opts: Option<WriteOptions>,
    ) -> Result<Timestamp> {
        self.inner.write().remove(entity, opts)
    }

    pub fn get_as_of(
        &self,
        entity: impl AsRef<[u8]>,
        horizon: Timestamp,
    ) -> Result<Option<Bytes>> {
        self.inner.read().get_as_of(entity, horizon)
    }

    pub fn latest(&self, entity: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.inner.read().latest(entity)
    }

    /// Scans every entity's state at `horizon`, collected under one read lock.
    pub fn scan_as_of(&self, horizon: Timestamp) -> Result<Vec<(Bytes, Bytes)>> {
        self.scan_as_of_with(horizon, CancelHandle::new())
    }

    /// Scan with a cancellation handle that another thread may signal.
    pub fn scan_as_of_with(
        &self,
        horizon: Timestamp,
        cancel: CancelHandle,
    ) -> Result<Vec<(Bytes, Bytes)>> {
        let guard = self.inner.read();
        guard.scan_as_of_with(horizon, cancel)?.collect()
    }

    /// Runs a group of writes that commit atomically under the write lock.
    pub fn atomic<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut AtomicBatch<'_>) -> Result<R>,
    {
        self.inner.write().atomic(f)
    }

    /// Collects every record reclaimable at `min_horizon`.
    pub fn list_reclaimable(&self, min_horizon: Timestamp) -> Result<Vec<ReclaimableRecord>> {
        let guard = self.inner.read();
        guard.list_reclaimable(min_horizon)?.collect()
    }

    pub fn purge(&self, records: Vec<ReclaimableRecord>) -> Result<usize> {
        self.inner.write().purge(records)
    }

    pub fn set_low_water_mark(&self, horizon: Timestamp) -> Result<Timestamp> {
        self.inner.write().set_low_water_mark(horizon)
    }

    pub fn low_water_mark(&self) -> Timestamp {
        self.inner.read().low_water_mark()
    }

    pub fn stats(&self) -> DbStats {
        self.inner.read().stats()
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.write().sync()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.write().close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_closed()
    }

    /// Acquires a read lock for direct access to the database.
    ///
    /// This allows multiple read operations under a single lock.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, DB> {
        self.inner.read()
    }

    /// Acquires a write lock for direct access to the database.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, DB> {
        self.inner.write()
    }
}
