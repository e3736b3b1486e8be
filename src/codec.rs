//! Temporal key codec.
//!
//! Packs (entity key, version timestamp) into a single byte sequence whose
//! plain lexicographic order is: entity key ascending, timestamp descending.
//! That layout makes every entity's versions physically contiguous with the
//! newest version first, which is what the as-of scan relies on.
//!
//! Entity bytes are escaped so arbitrary binary keys cannot collide with the
//! terminator: `0x00` becomes `0x00 0xFF`, and the entity is closed with
//! `0x00 0x00`. The timestamp is appended as the big-endian bitwise
//! complement of its u64 value, so larger timestamps sort earlier within an
//! entity's block.

use crate::config::Timestamp;
use crate::error::{Result, TempraError};
use bytes::{BufMut, Bytes, BytesMut};

/// Closes the escaped entity portion of an encoded key.
const TERMINATOR: [u8; 2] = [0x00, 0x00];
/// Replacement for a literal `0x00` inside an entity key.
const ESCAPE: [u8; 2] = [0x00, 0xFF];

const TIMESTAMP_LEN: usize = 8;

/// Encode an (entity, timestamp) pair into its ordered storage key.
///
/// Injective and order-preserving: for encoded keys `a`, `b`,
/// `a < b` iff `(entity_a, !ts_a) < (entity_b, !ts_b)` lexicographically.
pub fn encode(entity: &[u8], ts: Timestamp) -> Bytes {
    let mut buf = BytesMut::with_capacity(entity.len() + TERMINATOR.len() + TIMESTAMP_LEN + 2);
    put_escaped(&mut buf, entity);
    buf.put_u64(!ts.as_nanos());
    buf.freeze()
}

/// Decode a storage key back into its (entity, timestamp) pair.
pub fn decode(encoded: &[u8]) -> Result<(Bytes, Timestamp)> {
    let (entity, rest) = take_entity(encoded)?;

    if rest.len() != TIMESTAMP_LEN {
        return Err(TempraError::CorruptKey("timestamp suffix has wrong length"));
    }
    let mut ts_buf = [0u8; TIMESTAMP_LEN];
    ts_buf.copy_from_slice(rest);
    let ts = Timestamp::from_nanos(!u64::from_be_bytes(ts_buf));

    Ok((entity, ts))
}

/// The escaped-and-terminated entity prefix shared by every version of
/// `entity`. Strictly less than all of the entity's record keys, so it is a
/// valid inclusive lower seek bound for the entity's block.
pub fn entity_prefix(entity: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(entity.len() + TERMINATOR.len() + 2);
    put_escaped(&mut buf, entity);
    buf.freeze()
}

/// The greatest possible record key for `entity`: its version at timestamp
/// zero. Seeking strictly past this key lands on the first record of the next
/// entity — the "jump" primitive of the as-of scan.
pub fn entity_last(entity: &[u8]) -> Bytes {
    encode(entity, Timestamp::ZERO)
}

fn put_escaped(buf: &mut BytesMut, entity: &[u8]) {
    for &b in entity {
        if b == 0x00 {
            buf.put_slice(&ESCAPE);
        } else {
            buf.put_u8(b);
        }
    }
    buf.put_slice(&TERMINATOR);
}

/// Split an encoded key into its unescaped entity and the remaining suffix.
fn take_entity(encoded: &[u8]) -> Result<(Bytes, &[u8])> {
    let mut entity = BytesMut::new();
    let mut i = 0;

    while i < encoded.len() {
        if encoded[i] != 0x00 {
            entity.put_u8(encoded[i]);
            i += 1;
            continue;
        }
        match encoded.get(i + 1) {
            Some(0xFF) => {
                entity.put_u8(0x00);
                i += 2;
            }
            Some(0x00) => return Ok((entity.freeze(), &encoded[i + 2..])),
            Some(_) => return Err(TempraError::CorruptKey("invalid escape sequence")),
            None => return Err(TempraError::CorruptKey("truncated escape sequence")),
        }
    }

    Err(TempraError::CorruptKey("missing entity terminator"))
}
