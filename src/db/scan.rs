//! The as-of scan engine.
//!
//! Given a horizon H, the scan enumerates every entity's resolved version at
//! or before H in ascending entity order, visiting work proportional to the
//! number of distinct entities plus the versions newer than H — never to the
//! total amount of history. Two cursor moves make that true:
//!
//! - records within an entity's block are timestamp-descending, so the first
//!   record with `ts <= H` is already the answer for that entity;
//! - once an entity is resolved (or tombstoned), the cursor seeks straight
//!   past `entity_last`, jumping the rest of the block in one ordered-map
//!   seek instead of walking the remaining older versions.
//!
//! A miss (`ts > H`) advances a single record, since an older version of the
//! same entity may still satisfy the horizon.

use crate::codec;
use crate::config::{Timestamp, Version};
use crate::error::{Result, TempraError};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation handle for an in-flight scan.
///
/// Cloneable and sendable; signalling it from any thread makes the scan yield
/// `TempraError::Cancelled` at its next iteration step and then fuse.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the scan to stop at its next step.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Lazy, forward-ordered as-of scan over the store.
///
/// Yields one `(entity, payload)` pair per live entity. The iterator borrows
/// the store immutably, so the record set is guaranteed stable for the scan's
/// whole lifetime: no write can commit while it exists.
///
/// Restartable per call (issue a new scan to re-read), not resumable
/// mid-stream.
pub struct AsOfScan<'a> {
    records: &'a BTreeMap<Bytes, Version>,
    horizon: Timestamp,
    cursor: Bound<Bytes>,
    end: Bound<Bytes>,
    cancel: CancelHandle,
    visited: usize,
    done: bool,
}

impl<'a> AsOfScan<'a> {
    pub(crate) fn new(
        records: &'a BTreeMap<Bytes, Version>,
        horizon: Timestamp,
        cursor: Bound<Bytes>,
        end: Bound<Bytes>,
        cancel: CancelHandle,
    ) -> Self {
        // An inverted caller range would panic inside `BTreeMap::range`;
        // start past end is simply an empty scan.
        let done = match (&cursor, &end) {
            (
                Bound::Included(start) | Bound::Excluded(start),
                Bound::Included(stop) | Bound::Excluded(stop),
            ) => {
                start > stop
                    || (start == stop
                        && matches!(cursor, Bound::Excluded(_))
                        && matches!(end, Bound::Excluded(_)))
            }
            _ => false,
        };

        Self {
            records,
            horizon,
            cursor,
            end,
            cancel,
            visited: 0,
            done,
        }
    }

    /// A handle that cancels this scan when signalled.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Number of physical records the cursor has landed on so far. Bounded by
    /// (distinct entities in range) + (versions newer than the horizon).
    pub fn records_visited(&self) -> usize {
        self.visited
    }

    pub fn horizon(&self) -> Timestamp {
        self.horizon
    }
}

impl Iterator for AsOfScan<'_> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.done = true;
                return Some(Err(TempraError::Cancelled));
            }

            let head = self
                .records
                .range::<Bytes, _>((self.cursor.as_ref(), self.end.as_ref()))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()));

            let Some((key, version)) = head else {
                self.done = true;
                return None;
            };
            self.visited += 1;

            let (entity, ts) = match codec::decode(&key) {
                Ok(parts) => parts,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if ts <= self.horizon {
                // First eligible record in a descending block is the greatest
                // timestamp <= horizon: resolved. Jump the rest of the block.
                self.cursor = Bound::Excluded(codec::entity_last(&entity));
                match version {
                    Version::Tombstone => continue,
                    Version::Value(value) => return Some(Ok((entity, value))),
                }
            } else {
                // Newer than the horizon; an older version of this entity may
                // still qualify, so advance one record only.
                self.cursor = Bound::Excluded(key);
            }
        }
    }
}

/// Translate an entity-key range filter into encoded cursor bounds.
pub(crate) fn scan_bounds<B, R>(range: R) -> (Bound<Bytes>, Bound<Bytes>)
where
    B: AsRef<[u8]>,
    R: RangeBounds<B>,
{
    let start = match range.start_bound() {
        Bound::Included(e) => Bound::Included(codec::entity_prefix(e.as_ref())),
        Bound::Excluded(e) => Bound::Excluded(codec::entity_last(e.as_ref())),
        Bound::Unbounded => Bound::Unbounded,
    };
    let end = match range.end_bound() {
        Bound::Included(e) => Bound::Included(codec::entity_last(e.as_ref())),
        Bound::Excluded(e) => Bound::Excluded(codec::entity_prefix(e.as_ref())),
        Bound::Unbounded => Bound::Unbounded,
    };
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Timestamp, WriteOptions};
    use crate::db::DB;

    fn ts(n: u64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    fn collect(db: &DB, horizon: u64) -> Vec<(Bytes, Bytes)> {
        db.scan_as_of(ts(horizon))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    /// The canonical jump-correctness scenario: entity A at t=1("x"),
    /// t=3("y"), t=5(tombstone); entity B at t=2("z").
    #[test]
    fn test_jump_correctness() {
        let mut db = DB::memory().unwrap();
        db.put("A", b"x", Some(WriteOptions::at(1u64))).unwrap();
        db.put("A", b"y", Some(WriteOptions::at(3u64))).unwrap();
        db.remove("A", Some(WriteOptions::at(5u64))).unwrap();
        db.put("B", b"z", Some(WriteOptions::at(2u64))).unwrap();

        // At horizon 4 the tombstone at t=5 is invisible; A resolves to t=3.
        let at4 = collect(&db, 4);
        assert_eq!(at4.len(), 2);
        assert_eq!(at4[0].0.as_ref(), b"A");
        assert_eq!(at4[0].1.as_ref(), b"y");
        assert_eq!(at4[1].0.as_ref(), b"B");
        assert_eq!(at4[1].1.as_ref(), b"z");

        // At horizon 6 the tombstone resolves and A is absent.
        let at6 = collect(&db, 6);
        assert_eq!(at6.len(), 1);
        assert_eq!(at6[0].0.as_ref(), b"B");
        assert_eq!(at6[0].1.as_ref(), b"z");
    }

    #[test]
    fn test_scan_is_idempotent() {
        let mut db = DB::memory().unwrap();
        for i in 0..20u64 {
            let entity = format!("e{}", i % 5);
            db.put(&entity, format!("v{i}").as_bytes(), Some(WriteOptions::at(i + 1)))
                .unwrap();
        }

        let first = collect(&db, 12);
        let second = collect(&db, 12);
        assert_eq!(first, second);
    }

    #[test]
    fn test_entity_with_no_version_at_horizon_is_absent() {
        let mut db = DB::memory().unwrap();
        db.put("early", b"1", Some(WriteOptions::at(1u64))).unwrap();
        db.put("late", b"2", Some(WriteOptions::at(100u64))).unwrap();

        let results = collect(&db, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.as_ref(), b"early");
    }

    #[test]
    fn test_visit_bound_is_keys_plus_newer_versions() {
        let mut db = DB::memory().unwrap();
        // 4 entities, 50 versions each, all at timestamps 10..=500.
        for e in 0..4u64 {
            for v in 0..50u64 {
                db.put(
                    format!("entity{e}"),
                    b"payload",
                    Some(WriteOptions::at(10 * (v + 1))),
                )
                .unwrap();
            }
        }

        // Horizon above all history: one visit per entity, no misses.
        let mut scan = db.scan_as_of(ts(1_000)).unwrap();
        let n = scan.by_ref().count();
        assert_eq!(n, 4);
        assert_eq!(scan.records_visited(), 4);

        // Horizon below all history: every version is a miss, nothing resolves.
        let mut scan = db.scan_as_of(ts(5)).unwrap();
        assert_eq!(scan.by_ref().count(), 0);
        assert_eq!(scan.records_visited(), 200);

        // Mid horizon: per entity, misses for versions newer than H plus the
        // single hit. H=105 -> versions 110..=500 are misses (40 per entity).
        let mut scan = db.scan_as_of(ts(105)).unwrap();
        assert_eq!(scan.by_ref().count(), 4);
        assert_eq!(scan.records_visited(), 4 * 40 + 4);
    }

    #[test]
    fn test_range_filter() {
        let mut db = DB::memory().unwrap();
        for k in ["a", "b", "c", "d"] {
            db.put(k, k.as_bytes(), Some(WriteOptions::at(1u64))).unwrap();
        }

        let results: Vec<_> = db
            .scan_as_of_range(ts(5), "b".."d")
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let keys: Vec<_> = results.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);

        let results: Vec<_> = db
            .scan_as_of_range(ts(5), "b"..="d")
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_inverted_range_yields_empty_scan() {
        let mut db = DB::memory().unwrap();
        for k in ["a", "b", "c"] {
            db.put(k, k.as_bytes(), Some(WriteOptions::at(1u64))).unwrap();
        }

        // Start past end: empty, never a panic.
        let mut scan = db.scan_as_of_range(ts(5), "c".."a").unwrap();
        assert!(scan.next().is_none());
        assert_eq!(scan.records_visited(), 0);

        // Same key excluded on both sides is empty too.
        let empty: Vec<_> = db
            .scan_as_of_range::<&str, _>(ts(5), (Bound::Excluded("b"), Bound::Excluded("b")))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_cancellation_stops_scan() {
        let mut db = DB::memory().unwrap();
        for i in 0..10u64 {
            db.put(format!("k{i}"), b"v", Some(WriteOptions::at(1u64)))
                .unwrap();
        }

        let mut scan = db.scan_as_of(ts(5)).unwrap();
        let handle = scan.cancel_handle();

        // Take two results, then cancel mid-stream.
        assert!(scan.next().unwrap().is_ok());
        assert!(scan.next().unwrap().is_ok());
        handle.cancel();

        match scan.next() {
            Some(Err(TempraError::Cancelled)) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|r| r.map(|_| ()))),
        }
        // Fused after cancellation.
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_ties_resolve_to_last_write_under_overwrite() {
        use crate::config::{CollisionPolicy, Config};

        let config = Config::default().with_collision_policy(CollisionPolicy::Overwrite);
        let mut db = DB::memory_with_config(config).unwrap();
        db.put("k", b"first", Some(WriteOptions::at(7u64))).unwrap();
        db.put("k", b"second", Some(WriteOptions::at(7u64))).unwrap();

        let results = collect(&db, 7);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.as_ref(), b"second");
    }
}
