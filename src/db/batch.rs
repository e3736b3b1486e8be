//! All-or-nothing multi-entity writes.

use crate::codec;
use crate::config::{CollisionPolicy, Timestamp, Version, WriteOptions};
use crate::error::{Result, TempraError};
use bytes::Bytes;
use std::collections::BTreeSet;

use super::DBInner;

enum StagedOp {
    Put {
        entity: Bytes,
        value: Bytes,
        at: Option<Timestamp>,
    },
    Remove {
        entity: Bytes,
        at: Option<Timestamp>,
    },
}

/// A staged group of writes that commits atomically.
///
/// Operations are buffered until the batch closure returns, then validated as
/// a unit against the collision policy (including collisions between batch
/// members) and applied. No intermediate state is ever observable: the
/// borrow of the store is exclusive for the batch's whole lifetime, and a
/// validation failure leaves the record map untouched.
pub struct AtomicBatch<'a> {
    inner: &'a mut DBInner,
    ops: Vec<StagedOp>,
}

impl<'a> AtomicBatch<'a> {
    pub(crate) fn new(inner: &'a mut DBInner) -> Self {
        Self {
            inner,
            ops: Vec::new(),
        }
    }

    /// Stage a put. Timestamps are resolved at commit time, so all
    /// store-assigned timestamps in one batch share the commit's clock window.
    pub fn put(
        &mut self,
        entity: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        opts: Option<WriteOptions>,
    ) -> &mut Self {
        self.ops.push(StagedOp::Put {
            entity: Bytes::copy_from_slice(entity.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            at: opts.and_then(|o| o.at),
        });
        self
    }

    /// Stage a tombstone write.
    pub fn remove(&mut self, entity: impl AsRef<[u8]>, opts: Option<WriteOptions>) -> &mut Self {
        self.ops.push(StagedOp::Remove {
            entity: Bytes::copy_from_slice(entity.as_ref()),
            at: opts.and_then(|o| o.at),
        });
        self
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Validate every staged operation, log the batch as one AOF append with
    /// a single flush, and only then apply it to the record map.
    ///
    /// Timestamps are resolved against a local clock that is folded into the
    /// store's only on success, so a failed batch moves neither the map nor
    /// the clock.
    pub(crate) fn commit(self) -> Result<()> {
        let mut clock = self.inner.last_assigned;
        let mut resolved: Vec<(Bytes, Timestamp, Version)> = Vec::with_capacity(self.ops.len());
        for op in self.ops {
            let (entity, at, version) = match op {
                StagedOp::Put { entity, value, at } => (entity, at, Version::Value(value)),
                StagedOp::Remove { entity, at } => (entity, at, Version::Tombstone),
            };
            let ts = DBInner::next_timestamp(clock, at);
            if ts > clock {
                clock = ts;
            }
            resolved.push((entity, ts, version));
        }

        if self.inner.config.collision_policy == CollisionPolicy::Reject {
            let mut staged_slots = BTreeSet::new();
            for (entity, ts, _) in &resolved {
                let encoded = codec::encode(entity, *ts);
                if self.inner.records.contains_key(&encoded) || !staged_slots.insert(encoded) {
                    return Err(TempraError::Collision {
                        entity: entity.clone(),
                        timestamp: *ts,
                    });
                }
            }
        }

        #[cfg(feature = "aof")]
        self.inner.write_batch_to_aof(&resolved)?;

        // Validated and logged; applying cannot fail.
        for (entity, ts, version) in resolved {
            let encoded = codec::encode(&entity, ts);
            self.inner.apply_version(encoded, version);
        }
        self.inner.commit_timestamp(clock);
        Ok(())
    }
}
