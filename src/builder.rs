//! Database builder for flexible configuration
//!
//! This module provides a builder pattern for creating databases with
//! custom persistence paths and configuration.

use crate::config::{CollisionPolicy, Config};
use crate::db::DB;
use crate::error::{Result, TempraError};
#[cfg(feature = "aof")]
use std::path::PathBuf;

/// Builder for database configuration with custom persistence paths and settings.
#[derive(Debug)]
pub struct DBBuilder {
    #[cfg(feature = "aof")]
    aof_path: Option<PathBuf>,
    config: Config,
    in_memory: bool,
}

impl DBBuilder {
    /// Create a new builder with default in-memory configuration.
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "aof")]
            aof_path: None,
            config: Config::default(),
            in_memory: true,
        }
    }

    /// Set the AOF path for persistence. File is created if needed and replayed on startup.
    #[cfg(feature = "aof")]
    pub fn aof_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.aof_path = Some(path.into());
        self.in_memory = false;
        self
    }

    /// Configure for in-memory storage with no persistence.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        #[cfg(feature = "aof")]
        {
            self.aof_path = None;
        }
        self
    }

    /// Set the database configuration (collision policy, sync policy, etc.).
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting only the collision policy.
    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.config = self.config.with_collision_policy(policy);
        self
    }

    /// Build the database. Opens the persistence file if configured and
    /// replays its state.
    pub fn build(self) -> Result<DB> {
        self.config.validate().map_err(TempraError::Other)?;

        #[cfg(feature = "aof")]
        if let Some(aof_path) = self.aof_path {
            return DB::open_with_config(aof_path, self.config);
        }

        DB::memory_with_config(self.config)
    }
}

impl Default for DBBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncPolicy, Timestamp, WriteOptions};

    #[test]
    fn test_builder_default() {
        let builder = DBBuilder::new();
        assert!(builder.in_memory);
    }

    #[test]
    fn test_builder_in_memory() {
        let mut db = DBBuilder::new().in_memory().build().unwrap();
        db.put("test", b"value", Some(WriteOptions::at(1u64))).unwrap();
        assert_eq!(
            db.get_as_of("test", Timestamp::from_nanos(1))
                .unwrap()
                .unwrap()
                .as_ref(),
            b"value"
        );
    }

    #[test]
    fn test_builder_with_config() {
        let config = Config::default()
            .with_sync_policy(SyncPolicy::Always)
            .with_collision_policy(CollisionPolicy::Overwrite);

        let mut db = DBBuilder::new().config(config).build().unwrap();
        db.put("test", b"value", Some(WriteOptions::at(1u64))).unwrap();
        db.put("test", b"again", Some(WriteOptions::at(1u64))).unwrap();
    }

    #[cfg(feature = "aof")]
    #[test]
    fn test_builder_aof_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let aof_path = temp_dir.path().join("builder.aof");

        let mut db = DBBuilder::new().aof_path(&aof_path).build().unwrap();
        db.put("persistent", b"data", Some(WriteOptions::at(9u64)))
            .unwrap();
        drop(db);

        // Reopen and verify data persisted
        let db2 = DBBuilder::new().aof_path(&aof_path).build().unwrap();
        assert_eq!(
            db2.get_as_of("persistent", Timestamp::from_nanos(9))
                .unwrap()
                .unwrap()
                .as_ref(),
            b"data"
        );
    }

    #[cfg(feature = "aof")]
    #[test]
    fn test_builder_aof_path_disables_in_memory() {
        let builder = DBBuilder::new().in_memory().aof_path("some.aof");
        assert!(!builder.in_memory);
        assert!(builder.aof_path.is_some());
    }

    #[cfg(feature = "aof")]
    #[test]
    fn test_builder_in_memory_clears_aof_path() {
        let builder = DBBuilder::new().aof_path("some.aof").in_memory();
        assert!(builder.in_memory);
        assert!(builder.aof_path.is_none());
    }
}
