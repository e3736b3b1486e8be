//! # Tempra
//!
//! An embedded temporal key-value store with point-in-time reads.
//!
//! Every write appends a timestamped version instead of replacing state, so
//! the store can answer "what did this data look like at time H" for any
//! retained horizon. Entities map to byte payloads; deletes are tombstone
//! versions that hide, never destroy, earlier history.
//!
//! ## Features
//!
//! - **As-of reads**: `get_as_of` and `scan_as_of` resolve entities at any
//!   horizon with cost independent of how much history each entity carries
//! - **Append-only writes** with store-assigned strictly-monotonic
//!   timestamps, or caller-supplied ones
//! - **Atomic batches** across entities
//! - **Retention**: a monotonic low-water mark plus explicit `purge` of
//!   versions no servable horizon can reach
//! - **AOF persistence** with configurable sync policies (`aof` feature,
//!   on by default)
//! - **Thread-safe wrapper** via [`SyncDB`] (`sync` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use tempra::{Timestamp, WriteOptions, DB};
//!
//! # fn main() -> tempra::Result<()> {
//! let mut db = DB::memory()?;
//!
//! db.put("sensor:1", b"20.5", Some(WriteOptions::at(100u64)))?;
//! db.put("sensor:1", b"21.0", Some(WriteOptions::at(200u64)))?;
//!
//! // Point-in-time read.
//! let reading = db.get_as_of("sensor:1", Timestamp::from_nanos(150))?;
//! assert_eq!(reading.unwrap().as_ref(), b"20.5");
//!
//! // Full snapshot at a horizon.
//! for entry in db.scan_as_of(Timestamp::from_nanos(250))? {
//!     let (entity, payload) = entry?;
//!     println!("{:?} => {:?}", entity, payload);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "aof")]
pub mod persistence;

pub use builder::DBBuilder;
pub use config::{
    CollisionPolicy, Config, DbStats, SyncMode, SyncPolicy, Timestamp, Version, WriteOptions,
};
pub use db::{AsOfScan, AtomicBatch, CancelHandle, DB, ReclaimableIter, ReclaimableRecord};
#[cfg(feature = "sync")]
pub use db::SyncDB;
pub use error::{Result, TempraError};
#[cfg(feature = "aof")]
pub use persistence::{AOFCommand, AOFFile};

/// Convenience alias for the main database type.
pub type Tempra = DB;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used imports.
pub mod prelude {
    pub use crate::builder::DBBuilder;
    pub use crate::config::{
        CollisionPolicy, Config, Timestamp, Version, WriteOptions,
    };
    pub use crate::db::{CancelHandle, DB, ReclaimableRecord};
    #[cfg(feature = "sync")]
    pub use crate::db::SyncDB;
    pub use crate::error::{Result, TempraError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_alias_constructs() {
        let db = Tempra::memory().unwrap();
        assert_eq!(db.stats().record_count, 0);
    }
}
