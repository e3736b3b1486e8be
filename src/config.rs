//! Configuration and core value types for tempra.
//!
//! This module provides the serializable configuration surface plus the small
//! value types (`Timestamp`, `Version`, `WriteOptions`) shared across the
//! store.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A version timestamp: nanoseconds since the Unix epoch, or any
/// caller-chosen logical coordinate. Only ordering matters to the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The earliest representable timestamp.
    pub const ZERO: Timestamp = Timestamp(0);
    /// The latest representable timestamp. Useful as a "latest state" horizon.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Current wall-clock time in nanoseconds since the Unix epoch.
    ///
    /// Saturates to zero for clocks set before the epoch; the write path
    /// layers its own monotonicity guarantee on top (see `DBInner`).
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(0);
        Timestamp(nanos)
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// The next representable timestamp, saturating at `MAX`.
    pub(crate) const fn next(self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Timestamp(nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single stored version of an entity: live data or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// The entity held this payload as of the version's timestamp.
    Value(Bytes),
    /// The entity was logically deleted as of the version's timestamp.
    Tombstone,
}

impl Version {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Version::Tombstone)
    }

    /// The live payload, or `None` for a tombstone.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Version::Value(v) => Some(v),
            Version::Tombstone => None,
        }
    }
}

/// Options accepted by `put` and `remove`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Explicit version timestamp. When `None`, the store assigns a
    /// strictly-monotonic wall-clock timestamp.
    pub at: Option<Timestamp>,
}

impl WriteOptions {
    /// Write at an explicit timestamp instead of the store-assigned clock.
    pub fn at(ts: impl Into<Timestamp>) -> Self {
        Self { at: Some(ts.into()) }
    }
}

/// What to do when a write targets an already-occupied (entity, timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Fail the write with `TempraError::Collision` (default).
    #[default]
    Reject,
    /// Replace the existing version deterministically: last write wins.
    Overwrite,
}

/// Synchronization policy for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Never sync to disk (fastest, least safe)
    Never,
    /// Sync every second (recommended default)
    #[default]
    EverySecond,
    /// Sync after every write (slowest, safest)
    Always,
}

/// File synchronization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Call `fsync` / `File::sync_all` to persist metadata + data.
    #[default]
    All,
    /// Call `fdatasync` / `File::sync_data` to persist data only.
    Data,
}

/// Database configuration
///
/// Designed to be easily serializable and loadable from JSON, TOML, or other
/// formats while keeping complexity minimal.
///
/// # Example
///
/// ```rust
/// use tempra::{CollisionPolicy, Config};
///
/// let config = Config::default().with_collision_policy(CollisionPolicy::Overwrite);
///
/// // Load from JSON
/// let json = r#"{
///     "collision_policy": "overwrite",
///     "sync_policy": "always"
/// }"#;
/// let config: Config = Config::from_json(json).unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Behavior for writes targeting an occupied (entity, timestamp) slot.
    #[serde(default)]
    pub collision_policy: CollisionPolicy,

    /// How often data is synced to disk
    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// Controls whether the database issues `fsync` or `fdatasync`.
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Number of writes to batch before forcing a sync when `SyncPolicy::Always`.
    #[serde(default = "Config::default_sync_batch_size")]
    pub sync_batch_size: usize,
}

impl Config {
    const fn default_sync_batch_size() -> usize {
        1
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Adjust the number of writes to batch before syncing when `SyncPolicy::Always`.
    pub fn with_sync_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "Sync batch size must be greater than zero");
        self.sync_batch_size = batch_size;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_batch_size == 0 {
            return Err("Sync batch size must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        use serde::de::Error;

        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        use serde::de::Error;

        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::default(),
            sync_policy: SyncPolicy::default(),
            sync_mode: SyncMode::default(),
            sync_batch_size: Self::default_sync_batch_size(),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Default)]
pub struct DbStats {
    /// Total number of stored version records (live values and tombstones).
    pub record_count: usize,
    /// Number of stored tombstone records.
    pub tombstone_count: usize,
    /// Number of records physically removed by `purge` over this session.
    pub purged_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering_and_next() {
        assert!(Timestamp::ZERO < Timestamp::from_nanos(1));
        assert!(Timestamp::from_nanos(1) < Timestamp::MAX);
        assert_eq!(Timestamp::from_nanos(41).next(), Timestamp::from_nanos(42));
        assert_eq!(Timestamp::MAX.next(), Timestamp::MAX);
    }

    #[test]
    fn test_version_liveness() {
        let live = Version::Value(Bytes::from_static(b"payload"));
        assert!(!live.is_tombstone());
        assert_eq!(live.value().unwrap().as_ref(), b"payload");

        let dead = Version::Tombstone;
        assert!(dead.is_tombstone());
        assert!(dead.value().is_none());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::default()
            .with_collision_policy(CollisionPolicy::Overwrite)
            .with_sync_policy(SyncPolicy::Always)
            .with_sync_batch_size(8);

        let json = config.to_json().unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.collision_policy, CollisionPolicy::Overwrite);
        assert_eq!(parsed.sync_policy, SyncPolicy::Always);
        assert_eq!(parsed.sync_batch_size, 8);
    }

    #[test]
    fn test_config_rejects_zero_batch_size() {
        let json = r#"{"sync_batch_size": 0}"#;
        assert!(Config::from_json(json).is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default().with_collision_policy(CollisionPolicy::Overwrite);
        let toml_str = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.collision_policy, CollisionPolicy::Overwrite);
    }
}
