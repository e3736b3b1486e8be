//! Retention: reclaimability analysis, physical purge, and the low-water mark.
//!
//! A version is reclaimable at a minimum horizon H when some strictly newer
//! version of the same entity has a timestamp at or below H. Every horizon
//! the store still serves (all >= H) then resolves the entity through that
//! newer version, so the older record can never influence a result again.
//! The newest version at or below H is itself never reclaimable, and neither
//! is anything newer than H.

use crate::codec;
use crate::config::{Timestamp, Version};
use crate::error::{Result, TempraError};
use bytes::Bytes;
use std::collections::{BTreeSet, btree_map};
use std::ops::Bound;

use super::DB;

/// Identifies one physical version record eligible for purging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimableRecord {
    pub entity: Bytes,
    pub timestamp: Timestamp,
    pub(crate) encoded: Bytes,
}

/// Lazy enumeration of reclaimable records, in storage order.
///
/// Walks the record map once. Within an entity's block the newest version
/// comes first, so a single "have we passed a version at or below the
/// horizon" flag per entity decides reclaimability for everything older.
#[derive(Debug)]
pub struct ReclaimableIter<'a> {
    iter: btree_map::Iter<'a, Bytes, Version>,
    min_horizon: Timestamp,
    current_entity: Option<Bytes>,
    shadowed: bool,
}

impl Iterator for ReclaimableIter<'_> {
    type Item = Result<ReclaimableRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        for (key, _) in self.iter.by_ref() {
            let (entity, timestamp) = match codec::decode(key) {
                Ok(parts) => parts,
                Err(e) => return Some(Err(e)),
            };

            if self.current_entity.as_ref() != Some(&entity) {
                self.current_entity = Some(entity.clone());
                self.shadowed = false;
            }

            if self.shadowed {
                return Some(Ok(ReclaimableRecord {
                    entity,
                    timestamp,
                    encoded: key.clone(),
                }));
            }
            if timestamp <= self.min_horizon {
                // Everything older in this block is now shadowed by this one.
                self.shadowed = true;
            }
        }
        None
    }
}

impl DB {
    /// Whether the version of `entity` at `ts` is reclaimable at `min_horizon`.
    ///
    /// True iff the nearest strictly-newer version of the entity has a
    /// timestamp at or below `min_horizon`. Checking only the nearest newer
    /// version suffices: all other newer versions are newer still.
    pub fn is_reclaimable(
        &self,
        entity: impl AsRef<[u8]>,
        ts: Timestamp,
        min_horizon: Timestamp,
    ) -> bool {
        let entity = entity.as_ref();
        let target = codec::encode(entity, ts);
        let prefix = codec::entity_prefix(entity);

        // Newer versions sort before `target` inside the block; the nearest
        // one is the record immediately preceding it.
        let nearest_newer = self
            .inner
            .records
            .range((Bound::Included(prefix), Bound::Excluded(target)))
            .next_back();

        match nearest_newer {
            Some((key, _)) => match codec::decode(key) {
                Ok((_, newer_ts)) => newer_ts <= min_horizon,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Enumerate every record reclaimable at `min_horizon`, lazily.
    ///
    /// Fails with `InvalidHorizon` when `min_horizon` exceeds the current
    /// low-water mark: purging against a horizon no reader is yet barred from
    /// querying would destroy answers the store still owes.
    pub fn list_reclaimable(&self, min_horizon: Timestamp) -> Result<ReclaimableIter<'_>> {
        if self.inner.closed {
            return Err(TempraError::DatabaseClosed);
        }
        if min_horizon > self.inner.low_water {
            return Err(TempraError::InvalidHorizon {
                horizon: min_horizon,
                low_water: self.inner.low_water,
            });
        }

        Ok(ReclaimableIter {
            iter: self.inner.records.iter(),
            min_horizon,
            current_entity: None,
            shadowed: false,
        })
    }

    /// Physically delete the given records, returning how many were removed.
    ///
    /// Every record is re-verified against the current low-water mark first;
    /// entries that are absent, duplicated, or no longer reclaimable are
    /// skipped with a warning rather than failing the whole purge. The
    /// surviving set is appended to the AOF as one batch before any record
    /// leaves the map, so a failed append removes nothing.
    ///
    /// Verifying against the un-removed map is sound: the newest version at
    /// or below the mark is never reclaimable, so every staged record keeps
    /// at least that shadow after the whole set is gone.
    pub fn purge(
        &mut self,
        records: impl IntoIterator<Item = ReclaimableRecord>,
    ) -> Result<usize> {
        if self.inner.closed {
            return Err(TempraError::DatabaseClosed);
        }

        let low_water = self.inner.low_water;
        let mut staged: BTreeSet<Bytes> = BTreeSet::new();
        let mut victims: Vec<ReclaimableRecord> = Vec::new();

        for record in records {
            if staged.contains(&record.encoded) {
                log::warn!(
                    "skipping duplicate purge of entity {:?} at {}",
                    record.entity,
                    record.timestamp
                );
                continue;
            }
            if !self.inner.records.contains_key(&record.encoded) {
                log::warn!(
                    "skipping purge of entity {:?} at {}: record already absent",
                    record.entity,
                    record.timestamp
                );
                continue;
            }
            if !self.is_reclaimable(&record.entity, record.timestamp, low_water) {
                log::warn!(
                    "skipping purge of entity {:?} at {}: no longer reclaimable at low-water mark {}",
                    record.entity,
                    record.timestamp,
                    low_water
                );
                continue;
            }
            staged.insert(record.encoded.clone());
            victims.push(record);
        }

        #[cfg(feature = "aof")]
        self.inner.write_purge_batch_to_aof(&victims)?;

        let removed = victims.len();
        for record in &victims {
            self.inner.remove_encoded(&record.encoded);
            self.inner.stats.purged_count += 1;
        }

        if removed > 0 {
            log::debug!("purged {removed} reclaimable records");
        }
        Ok(removed)
    }

    /// Advance the low-water mark to `horizon` and return the effective mark.
    ///
    /// The mark only moves forward; an older horizon leaves it unchanged.
    /// Once advanced, reads below the mark fail with `InvalidHorizon` and
    /// records shadowed at or below it become eligible for `purge`.
    pub fn set_low_water_mark(&mut self, horizon: Timestamp) -> Result<Timestamp> {
        if self.inner.closed {
            return Err(TempraError::DatabaseClosed);
        }

        if horizon > self.inner.low_water {
            // Logged before it takes effect, like every other mutation.
            #[cfg(feature = "aof")]
            self.inner.write_low_water_to_aof_if_needed(horizon)?;
            self.inner.low_water = horizon;
        }
        Ok(self.inner.low_water)
    }

    /// The current low-water mark: the oldest horizon the store still serves.
    pub fn low_water_mark(&self) -> Timestamp {
        self.inner.low_water
    }
}
