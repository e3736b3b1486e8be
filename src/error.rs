//! Error types for tempra.

use crate::config::Timestamp;
use bytes::Bytes;
use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TempraError>;

/// All errors the store can produce.
#[derive(Error, Debug)]
pub enum TempraError {
    /// A write targeted an (entity, timestamp) slot that is already occupied
    /// and the configured collision policy is `Reject`.
    #[error("version collision for entity {entity:?} at timestamp {timestamp}")]
    Collision { entity: Bytes, timestamp: Timestamp },

    /// The requested horizon predates the retained low-water mark. Answering
    /// it could silently omit purged history, so the read fails instead.
    #[error("horizon {horizon} predates retained low-water mark {low_water}")]
    InvalidHorizon {
        horizon: Timestamp,
        low_water: Timestamp,
    },

    /// A scan was stopped through its cancellation handle.
    #[error("scan cancelled")]
    Cancelled,

    /// Operation attempted on a closed database.
    #[error("database is closed")]
    DatabaseClosed,

    /// A timestamp could not be derived from the system clock.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// An encoded temporal key did not decode cleanly.
    #[error("corrupt temporal key: {0}")]
    CorruptKey(&'static str),

    /// A persisted command frame did not match any known layout.
    #[cfg(feature = "aof")]
    #[error("invalid AOF format")]
    InvalidFormat,

    /// Clean end of the AOF during replay.
    #[cfg(feature = "aof")]
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// I/O failure from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for contextual failures.
    #[error("{0}")]
    Other(String),
}
