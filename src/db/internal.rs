//! Internal store state and the versioned write path.

use super::DBInner;
use crate::codec;
use crate::config::{CollisionPolicy, Config, DbStats, Timestamp, Version};
use crate::error::{Result, TempraError};
#[cfg(feature = "aof")]
use crate::persistence::{AOFCommand, AOFFile};
use bytes::Bytes;
use std::collections::BTreeMap;

impl DBInner {
    pub(crate) fn new_with_config(config: &Config) -> Self {
        Self {
            records: BTreeMap::new(),
            #[cfg(feature = "aof")]
            aof_file: None,
            closed: false,
            stats: DbStats::default(),
            config: config.clone(),
            low_water: Timestamp::ZERO,
            last_assigned: Timestamp::ZERO,
            sync_ops_since_flush: 0,
        }
    }

    /// Resolve the timestamp for a write against `clock`, the greatest
    /// timestamp committed so far: the explicit one if given, otherwise a
    /// store-assigned value strictly greater than `clock` even when the wall
    /// clock stalls or steps backwards.
    ///
    /// Pure; the caller folds the result back via [`commit_timestamp`] only
    /// once the write actually commits, so a rejected write never moves the
    /// store clock.
    ///
    /// [`commit_timestamp`]: DBInner::commit_timestamp
    pub(crate) fn next_timestamp(clock: Timestamp, explicit: Option<Timestamp>) -> Timestamp {
        match explicit {
            Some(ts) => ts,
            None => Timestamp::now().max(clock.next()),
        }
    }

    /// Record a committed write's timestamp in the clock.
    pub(crate) fn commit_timestamp(&mut self, ts: Timestamp) {
        if ts > self.last_assigned {
            self.last_assigned = ts;
        }
    }

    /// Validate a write against the collision policy. Read-only: a rejected
    /// write leaves no trace in the store.
    pub(crate) fn validate_write(
        &self,
        entity: &Bytes,
        ts: Timestamp,
        encoded: &Bytes,
    ) -> Result<()> {
        if ts < self.low_water {
            log::warn!(
                "write for entity {:?} at {} predates the low-water mark {}; \
                 the version may be unreachable by any servable horizon",
                entity,
                ts,
                self.low_water
            );
        }

        if self.config.collision_policy == CollisionPolicy::Reject
            && self.records.contains_key(encoded)
        {
            return Err(TempraError::Collision {
                entity: entity.clone(),
                timestamp: ts,
            });
        }
        Ok(())
    }

    /// Apply a validated version record to the map. Infallible; callers
    /// append to the AOF before calling this, so the visible state and the
    /// reported outcome always agree.
    ///
    /// This never consults an entity's history: correctness of the as-of
    /// semantics comes entirely from the key layout, so a write is a single
    /// ordered-map insert.
    pub(crate) fn apply_version(&mut self, encoded: Bytes, version: Version) {
        let is_tombstone = version.is_tombstone();
        let old = self.records.insert(encoded, version);

        if let Some(old) = old
            && old.is_tombstone()
        {
            self.stats.tombstone_count -= 1;
        }
        if is_tombstone {
            self.stats.tombstone_count += 1;
        }
        self.stats.record_count = self.records.len();
    }

    /// Remove a record by its encoded key. Used by purge and AOF replay only;
    /// ordinary reads never destroy records.
    pub(crate) fn remove_encoded(&mut self, encoded: &Bytes) -> Option<Version> {
        let removed = self.records.remove(encoded);
        if let Some(ref version) = removed {
            if version.is_tombstone() {
                self.stats.tombstone_count -= 1;
            }
            self.stats.record_count = self.records.len();
        }
        removed
    }

    /// Load store state from the AOF file (startup replay).
    ///
    /// Replays every command in order to rebuild the record map, the
    /// low-water mark and the write clock. Commands were only appended after
    /// passing validation, so replay applies them without re-checking the
    /// collision policy; a duplicate slot indicates overwrite-policy history
    /// and keeps the later write.
    #[cfg(feature = "aof")]
    pub(crate) fn load_from_aof(&mut self, aof_file: &mut AOFFile) -> Result<()> {
        for command in aof_file.replay()? {
            match command {
                AOFCommand::Put {
                    entity,
                    timestamp,
                    version,
                } => {
                    let encoded = codec::encode(&entity, timestamp);
                    self.apply_version(encoded, version);
                    self.commit_timestamp(timestamp);
                }
                AOFCommand::Purge { entity, timestamp } => {
                    let encoded = codec::encode(&entity, timestamp);
                    if self.remove_encoded(&encoded).is_some() {
                        self.stats.purged_count += 1;
                    } else {
                        log::warn!(
                            "purge of absent record for entity {:?} at {} during replay",
                            entity,
                            timestamp
                        );
                    }
                }
                AOFCommand::LowWaterMark { horizon } => {
                    if horizon > self.low_water {
                        self.low_water = horizon;
                    }
                }
            }
        }

        self.stats.record_count = self.records.len();
        Ok(())
    }

    /// Append a put to the AOF if persistence is configured.
    #[cfg(feature = "aof")]
    pub(crate) fn write_put_to_aof_if_needed(
        &mut self,
        entity: &Bytes,
        ts: Timestamp,
        version: &Version,
    ) -> Result<()> {
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        aof_file.write_put(entity, ts, version)?;
        self.maybe_flush_or_sync()
    }

    /// Append purge frames for a whole validated batch, then flush once.
    #[cfg(feature = "aof")]
    pub(crate) fn write_purge_batch_to_aof(
        &mut self,
        victims: &[super::ReclaimableRecord],
    ) -> Result<()> {
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        for record in victims {
            aof_file.write_purge(&record.entity, record.timestamp)?;
        }
        self.maybe_flush_or_sync()
    }

    #[cfg(feature = "aof")]
    pub(crate) fn write_low_water_to_aof_if_needed(&mut self, horizon: Timestamp) -> Result<()> {
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        aof_file.write_low_water(horizon)?;
        self.maybe_flush_or_sync()
    }

    /// Append a whole batch of puts, then flush once.
    #[cfg(feature = "aof")]
    pub(crate) fn write_batch_to_aof(&mut self, ops: &[(Bytes, Timestamp, Version)]) -> Result<()> {
        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        for (entity, ts, version) in ops {
            aof_file.write_put(entity, *ts, version)?;
        }
        self.maybe_flush_or_sync()
    }

    #[cfg(feature = "aof")]
    fn maybe_flush_or_sync(&mut self) -> Result<()> {
        use crate::config::SyncPolicy;

        let policy = self.config.sync_policy;
        let mode = self.config.sync_mode;
        let batch_size = self.config.sync_batch_size;

        let Some(aof_file) = self.aof_file.as_mut() else {
            return Ok(());
        };

        match policy {
            SyncPolicy::Always => {
                self.sync_ops_since_flush += 1;
                if self.sync_ops_since_flush >= batch_size {
                    aof_file.sync_with_mode(mode)?;
                    self.sync_ops_since_flush = 0;
                } else {
                    aof_file.flush()?;
                }
            }
            SyncPolicy::EverySecond => {
                aof_file.flush()?;
            }
            SyncPolicy::Never => {}
        }

        Ok(())
    }
}
