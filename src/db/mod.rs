//! The temporal database: public handle and operations.
//!
//! `DB` is a single-writer handle over a multi-versioned record map. Writes
//! take `&mut self` and reads take `&self`, so the borrow checker is the
//! isolation mechanism: any number of scans may be live at once, and no write
//! can interleave with them.

mod batch;
mod internal;
mod retention;
mod scan;
#[cfg(feature = "sync")]
mod sync;

pub use batch::AtomicBatch;
pub use retention::{ReclaimableIter, ReclaimableRecord};
pub use scan::{AsOfScan, CancelHandle};
#[cfg(feature = "sync")]
pub use sync::SyncDB;

use crate::builder::DBBuilder;
use crate::codec;
use crate::config::{Config, DbStats, Timestamp, Version, WriteOptions};
use crate::error::{Result, TempraError};
#[cfg(feature = "aof")]
use crate::persistence::AOFFile;
use bytes::Bytes;
use std::collections::BTreeMap;
#[cfg(not(feature = "sync"))]
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};
use std::path::Path;

/// Path sentinel that opens a non-persistent store.
pub const MEMORY_PATH: &str = ":memory:";

pub(crate) struct DBInner {
    /// Encoded temporal key -> version. The map's lexicographic order is
    /// entity ascending, timestamp descending.
    pub(crate) records: BTreeMap<Bytes, Version>,
    #[cfg(feature = "aof")]
    pub(crate) aof_file: Option<AOFFile>,
    pub(crate) closed: bool,
    pub(crate) stats: DbStats,
    pub(crate) config: Config,
    /// Oldest horizon the store still serves. Monotonically non-decreasing.
    pub(crate) low_water: Timestamp,
    /// Greatest timestamp handed out or observed by the write clock.
    pub(crate) last_assigned: Timestamp,
    pub(crate) sync_ops_since_flush: usize,
}

/// A temporal store mapping entity keys to timestamped version histories.
///
/// Every write appends a version; nothing is overwritten in place. Reads are
/// all horizon-parameterized: `get_as_of` and `scan_as_of` answer "what did
/// this data look like at time H" directly against the live record map.
///
/// # Example
///
/// ```rust
/// use tempra::{Timestamp, WriteOptions, DB};
///
/// # fn main() -> tempra::Result<()> {
/// let mut db = DB::memory()?;
/// db.put("greeting", b"hello", Some(WriteOptions::at(10u64)))?;
/// db.put("greeting", b"world", Some(WriteOptions::at(20u64)))?;
///
/// let then = db.get_as_of("greeting", Timestamp::from_nanos(15))?;
/// assert_eq!(then.unwrap().as_ref(), b"hello");
/// # Ok(())
/// # }
/// ```
pub struct DB {
    pub(crate) inner: DBInner,
    // Writes are single-threaded by construction; wrap in `SyncDB` to share.
    #[cfg(not(feature = "sync"))]
    pub(crate) _not_send_sync: PhantomData<*const ()>,
}

impl DB {
    /// Open a database backed by an append-only file at `path`.
    ///
    /// Creates the file if absent, otherwise replays it to rebuild state.
    /// The sentinel path `":memory:"` opens a non-persistent store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Open with an explicit configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate().map_err(TempraError::Other)?;
        let path = path.as_ref();
        let in_memory = path.to_str() == Some(MEMORY_PATH);

        let mut inner = DBInner::new_with_config(&config);

        #[cfg(feature = "aof")]
        if !in_memory {
            let mut aof_file = AOFFile::open(path)?;
            inner.load_from_aof(&mut aof_file)?;
            inner.aof_file = Some(aof_file);
            log::info!(
                "opened {:?}: {} records, low-water mark {}",
                path,
                inner.stats.record_count,
                inner.low_water
            );
        }
        #[cfg(not(feature = "aof"))]
        if !in_memory {
            log::warn!(
                "persistence requires the `aof` feature; opening {:?} in memory only",
                path
            );
        }

        Ok(Self::from_inner(inner))
    }

    /// Open a non-persistent in-memory database.
    pub fn memory() -> Result<Self> {
        Self::open(MEMORY_PATH)
    }

    /// Open a non-persistent in-memory database with an explicit configuration.
    pub fn memory_with_config(config: Config) -> Result<Self> {
        Self::open_with_config(MEMORY_PATH, config)
    }

    /// Start building a database with non-default settings.
    pub fn builder() -> DBBuilder {
        DBBuilder::new()
    }

    pub(crate) fn from_inner(inner: DBInner) -> Self {
        Self {
            inner,
            #[cfg(not(feature = "sync"))]
            _not_send_sync: PhantomData,
        }
    }

    /// Record a new version of `entity`, returning its timestamp.
    ///
    /// With no explicit timestamp the store assigns one that is strictly
    /// greater than every previously assigned timestamp.
    pub fn put(
        &mut self,
        entity: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        opts: Option<WriteOptions>,
    ) -> Result<Timestamp> {
        self.write_version(
            entity.as_ref(),
            Version::Value(Bytes::copy_from_slice(value.as_ref())),
            opts,
        )
    }

    /// Record a deletion of `entity` as a tombstone version.
    ///
    /// The entity's history stays intact; horizons before the tombstone still
    /// see the prior value.
    pub fn remove(
        &mut self,
        entity: impl AsRef<[u8]>,
        opts: Option<WriteOptions>,
    ) -> Result<Timestamp> {
        self.write_version(entity.as_ref(), Version::Tombstone, opts)
    }

    fn write_version(
        &mut self,
        entity: &[u8],
        version: Version,
        opts: Option<WriteOptions>,
    ) -> Result<Timestamp> {
        self.check_open()?;
        let entity = Bytes::copy_from_slice(entity);
        let ts = DBInner::next_timestamp(self.inner.last_assigned, opts.and_then(|o| o.at));
        let encoded = codec::encode(&entity, ts);

        self.inner.validate_write(&entity, ts, &encoded)?;

        // Validated; the record becomes visible only after it is logged, and
        // the clock moves only once the write has committed.
        #[cfg(feature = "aof")]
        self.inner.write_put_to_aof_if_needed(&entity, ts, &version)?;

        self.inner.apply_version(encoded, version);
        self.inner.commit_timestamp(ts);
        Ok(ts)
    }

    /// Resolve `entity` at horizon `horizon`: the payload of its greatest
    /// version at or before the horizon, or `None` when that version is a
    /// tombstone or no version qualifies.
    ///
    /// A single ordered-map seek; cost is independent of how much newer or
    /// older history the entity carries.
    pub fn get_as_of(
        &self,
        entity: impl AsRef<[u8]>,
        horizon: Timestamp,
    ) -> Result<Option<Bytes>> {
        self.check_open()?;
        self.check_horizon(horizon)?;

        let entity = entity.as_ref();
        // The entity's first record at or past this key has ts <= horizon.
        let start = codec::encode(entity, horizon);
        let end = codec::entity_last(entity);

        let resolved = self
            .inner
            .records
            .range((Bound::Included(start), Bound::Included(end)))
            .next();

        match resolved {
            Some((_, Version::Value(value))) => Ok(Some(value.clone())),
            Some((_, Version::Tombstone)) | None => Ok(None),
        }
    }

    /// Resolve `entity` at the maximum horizon: its current value.
    pub fn latest(&self, entity: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.get_as_of(entity, Timestamp::MAX)
    }

    /// Scan every entity's resolved state at `horizon`, in ascending entity
    /// order. Lazy; see [`AsOfScan`].
    pub fn scan_as_of(&self, horizon: Timestamp) -> Result<AsOfScan<'_>> {
        self.scan_as_of_with(horizon, CancelHandle::new())
    }

    /// Scan with a caller-supplied cancellation handle.
    pub fn scan_as_of_with(
        &self,
        horizon: Timestamp,
        cancel: CancelHandle,
    ) -> Result<AsOfScan<'_>> {
        self.check_open()?;
        self.check_horizon(horizon)?;
        Ok(AsOfScan::new(
            &self.inner.records,
            horizon,
            Bound::Unbounded,
            Bound::Unbounded,
            cancel,
        ))
    }

    /// Scan restricted to a range of entity keys, e.g. `"a".."b"`.
    pub fn scan_as_of_range<B, R>(&self, horizon: Timestamp, range: R) -> Result<AsOfScan<'_>>
    where
        B: AsRef<[u8]>,
        R: RangeBounds<B>,
    {
        self.check_open()?;
        self.check_horizon(horizon)?;
        let (start, end) = scan::scan_bounds(range);
        Ok(AsOfScan::new(
            &self.inner.records,
            horizon,
            start,
            end,
            CancelHandle::new(),
        ))
    }

    /// Run a group of writes that commit atomically.
    ///
    /// The closure stages operations on the [`AtomicBatch`]; when it returns
    /// `Ok`, the whole batch is validated and applied as a unit. An error
    /// from the closure or from validation leaves the store untouched.
    pub fn atomic<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut AtomicBatch<'_>) -> Result<R>,
    {
        self.check_open()?;
        let mut batch = AtomicBatch::new(&mut self.inner);
        let result = f(&mut batch)?;
        batch.commit()?;
        Ok(result)
    }

    /// Current record counts.
    pub fn stats(&self) -> DbStats {
        self.inner.stats.clone()
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Force any buffered AOF data to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.check_open()?;
        #[cfg(feature = "aof")]
        if let Some(aof_file) = self.inner.aof_file.as_mut() {
            aof_file.sync_with_mode(self.inner.config.sync_mode)?;
            self.inner.sync_ops_since_flush = 0;
        }
        Ok(())
    }

    /// Flush, sync and mark the database closed. Idempotent; every operation
    /// after close fails with `DatabaseClosed`.
    pub fn close(&mut self) -> Result<()> {
        if self.inner.closed {
            return Ok(());
        }
        #[cfg(feature = "aof")]
        if let Some(aof_file) = self.inner.aof_file.as_mut() {
            aof_file.sync_with_mode(self.inner.config.sync_mode)?;
        }
        self.inner.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed {
            return Err(TempraError::DatabaseClosed);
        }
        Ok(())
    }

    fn check_horizon(&self, horizon: Timestamp) -> Result<()> {
        if horizon < self.inner.low_water {
            return Err(TempraError::InvalidHorizon {
                horizon,
                low_water: self.inner.low_water,
            });
        }
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if self.inner.closed {
            return;
        }
        if let Err(e) = self.close() {
            log::error!("error closing database on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: u64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    #[test]
    fn test_get_as_of_resolves_nearest_at_or_below() {
        let mut db = DB::memory().unwrap();
        db.put("k", b"v10", Some(WriteOptions::at(10u64))).unwrap();
        db.put("k", b"v20", Some(WriteOptions::at(20u64))).unwrap();

        assert_eq!(db.get_as_of("k", ts(9)).unwrap(), None);
        assert_eq!(db.get_as_of("k", ts(10)).unwrap().unwrap().as_ref(), b"v10");
        assert_eq!(db.get_as_of("k", ts(15)).unwrap().unwrap().as_ref(), b"v10");
        assert_eq!(db.get_as_of("k", ts(20)).unwrap().unwrap().as_ref(), b"v20");
        assert_eq!(db.latest("k").unwrap().unwrap().as_ref(), b"v20");
    }

    #[test]
    fn test_tombstone_hides_value_from_later_horizons_only() {
        let mut db = DB::memory().unwrap();
        db.put("k", b"v", Some(WriteOptions::at(5u64))).unwrap();
        db.remove("k", Some(WriteOptions::at(8u64))).unwrap();

        assert_eq!(db.get_as_of("k", ts(7)).unwrap().unwrap().as_ref(), b"v");
        assert_eq!(db.get_as_of("k", ts(8)).unwrap(), None);
        assert_eq!(db.latest("k").unwrap(), None);
    }

    #[test]
    fn test_get_does_not_leak_neighboring_entities() {
        let mut db = DB::memory().unwrap();
        db.put("aa", b"1", Some(WriteOptions::at(1u64))).unwrap();
        db.put("ac", b"3", Some(WriteOptions::at(1u64))).unwrap();

        // "ab" has no history; its block is empty even though neighbors exist.
        assert_eq!(db.get_as_of("ab", ts(10)).unwrap(), None);
    }

    #[test]
    fn test_operations_fail_after_close() {
        let mut db = DB::memory().unwrap();
        db.put("k", b"v", None).unwrap();
        db.close().unwrap();
        assert!(db.is_closed());

        assert!(matches!(
            db.put("k", b"w", None),
            Err(TempraError::DatabaseClosed)
        ));
        assert!(matches!(
            db.get_as_of("k", Timestamp::MAX),
            Err(TempraError::DatabaseClosed)
        ));
        assert!(matches!(
            db.scan_as_of(Timestamp::MAX).err(),
            Some(TempraError::DatabaseClosed)
        ));
        // Close is idempotent.
        db.close().unwrap();
    }

    #[test]
    fn test_reads_below_low_water_are_refused() {
        let mut db = DB::memory().unwrap();
        db.put("k", b"v", Some(WriteOptions::at(10u64))).unwrap();
        db.set_low_water_mark(ts(10)).unwrap();

        assert!(matches!(
            db.get_as_of("k", ts(9)),
            Err(TempraError::InvalidHorizon { .. })
        ));
        assert!(db.scan_as_of(ts(9)).is_err());
        // The mark itself is still servable.
        assert!(db.get_as_of("k", ts(10)).unwrap().is_some());
    }

    #[test]
    fn test_binary_entity_keys() {
        let mut db = DB::memory().unwrap();
        let spiky: &[u8] = &[0x00, 0xFF, 0x00, 0x00, 0x01];
        db.put(spiky, b"binary", Some(WriteOptions::at(1u64))).unwrap();

        assert_eq!(
            db.get_as_of(spiky, ts(5)).unwrap().unwrap().as_ref(),
            b"binary"
        );
        let all: Vec<_> = db
            .scan_as_of(ts(5))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0.as_ref(), spiky);
    }

    #[test]
    fn test_concurrent_scans_over_one_store() {
        let mut db = DB::memory().unwrap();
        db.put("a", b"1", Some(WriteOptions::at(1u64))).unwrap();
        db.put("b", b"2", Some(WriteOptions::at(2u64))).unwrap();

        let mut early = db.scan_as_of(ts(1)).unwrap();
        let mut late = db.scan_as_of(ts(2)).unwrap();
        // Interleaved pulls from two live scans at different horizons.
        assert_eq!(early.next().unwrap().unwrap().1.as_ref(), b"1");
        assert_eq!(late.next().unwrap().unwrap().1.as_ref(), b"1");
        assert_eq!(late.next().unwrap().unwrap().1.as_ref(), b"2");
        assert!(early.next().is_none());
    }
}
