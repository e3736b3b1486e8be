//! Append-only file persistence.
//!
//! The AOF records every committed write as a self-delimiting binary frame.
//! On open the whole file is replayed in order to rebuild the record map,
//! the low-water mark and the write clock. Append-only suits a versioned
//! store well: the log and the store share the same "nothing is ever
//! modified in place" shape, and purges append rather than rewrite.

use crate::config::{SyncMode, Timestamp, Version};
use crate::error::{Result, TempraError};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const SCRATCH_INITIAL_CAPACITY: usize = 8 * 1024;
const SCRATCH_SHRINK_THRESHOLD: usize = 1 << 20;

/// One persisted store mutation.
#[derive(Debug)]
pub enum AOFCommand {
    /// A committed version: live payload or tombstone.
    Put {
        entity: Bytes,
        timestamp: Timestamp,
        version: Version,
    },
    /// Physical removal of one version record by `purge`.
    Purge { entity: Bytes, timestamp: Timestamp },
    /// The low-water mark advanced to `horizon`.
    LowWaterMark { horizon: Timestamp },
}

/// Append-only command log backing a persistent store.
pub struct AOFFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    scratch: BytesMut,
}

impl AOFFile {
    const CMD_PUT: u8 = 0;
    const CMD_PURGE: u8 = 1;
    const CMD_LOW_WATER: u8 = 2;

    const FLAG_TOMBSTONE: u8 = 0b0000_0001;

    /// Open (or create) the AOF at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let writer_file = file.try_clone()?;
        let writer = BufWriter::new(writer_file);

        Ok(AOFFile {
            file,
            writer,
            path,
            size,
            scratch: BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY),
        })
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a committed version.
    pub fn write_put(&mut self, entity: &[u8], ts: Timestamp, version: &Version) -> Result<()> {
        let command = AOFCommand::Put {
            entity: Bytes::copy_from_slice(entity),
            timestamp: ts,
            version: version.clone(),
        };
        self.write_command(&command)
    }

    /// Append a physical purge of one version record.
    pub fn write_purge(&mut self, entity: &[u8], ts: Timestamp) -> Result<()> {
        let command = AOFCommand::Purge {
            entity: Bytes::copy_from_slice(entity),
            timestamp: ts,
        };
        self.write_command(&command)
    }

    /// Append a low-water mark advancement.
    pub fn write_low_water(&mut self, horizon: Timestamp) -> Result<()> {
        self.write_command(&AOFCommand::LowWaterMark { horizon })
    }

    fn write_command(&mut self, command: &AOFCommand) -> Result<()> {
        let written_len = self.serialize_command(command);
        self.writer.write_all(&self.scratch[..written_len])?;
        self.size += written_len as u64;

        if self.scratch.capacity() > SCRATCH_SHRINK_THRESHOLD
            && written_len <= SCRATCH_INITIAL_CAPACITY
        {
            self.scratch = BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY);
        }

        Ok(())
    }

    /// Serialize a command into the reusable scratch buffer.
    fn serialize_command(&mut self, command: &AOFCommand) -> usize {
        self.scratch.clear();
        match command {
            AOFCommand::Put {
                entity,
                timestamp,
                version,
            } => {
                let payload_len = version.value().map_or(0, |v| v.len());
                let needed = 1 + 4 + entity.len() + 1 + 8 + 4 + payload_len;
                if self.scratch.capacity() < needed {
                    self.scratch.reserve(needed - self.scratch.capacity());
                }
                let buf = &mut self.scratch;

                buf.put_u8(Self::CMD_PUT);
                buf.put_u32(entity.len() as u32);
                buf.put(entity.as_ref());

                let mut flags = 0u8;
                if version.is_tombstone() {
                    flags |= Self::FLAG_TOMBSTONE;
                }
                buf.put_u8(flags);
                buf.put_u64(timestamp.as_nanos());

                if let Some(value) = version.value() {
                    buf.put_u32(value.len() as u32);
                    buf.put(value.as_ref());
                }

                buf.len()
            }
            AOFCommand::Purge { entity, timestamp } => {
                let needed = 1 + 4 + entity.len() + 8;
                if self.scratch.capacity() < needed {
                    self.scratch.reserve(needed - self.scratch.capacity());
                }
                let buf = &mut self.scratch;

                buf.put_u8(Self::CMD_PURGE);
                buf.put_u32(entity.len() as u32);
                buf.put(entity.as_ref());
                buf.put_u64(timestamp.as_nanos());

                buf.len()
            }
            AOFCommand::LowWaterMark { horizon } => {
                let buf = &mut self.scratch;
                buf.put_u8(Self::CMD_LOW_WATER);
                buf.put_u64(horizon.as_nanos());
                buf.len()
            }
        }
    }

    /// Replay every persisted command in append order.
    pub fn replay(&mut self) -> Result<Vec<AOFCommand>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut commands = Vec::new();

        loop {
            match Self::deserialize_command(&mut reader) {
                Ok(command) => commands.push(command),
                Err(TempraError::UnexpectedEof) => break, // End of file
                Err(e) => return Err(e),
            }
        }

        Ok(commands)
    }

    fn deserialize_command(reader: &mut BufReader<&mut File>) -> Result<AOFCommand> {
        let mut cmd_type_buf = [0u8; 1];
        if reader.read_exact(&mut cmd_type_buf).is_err() {
            return Err(TempraError::UnexpectedEof);
        }

        match cmd_type_buf[0] {
            Self::CMD_PUT => {
                let entity = Self::read_bytes(reader)?;

                let mut flags_buf = [0u8; 1];
                if let Err(err) = reader.read_exact(&mut flags_buf) {
                    return match err.kind() {
                        std::io::ErrorKind::UnexpectedEof => Err(TempraError::UnexpectedEof),
                        _ => Err(TempraError::from(err)),
                    };
                }
                let is_tombstone = (flags_buf[0] & Self::FLAG_TOMBSTONE) != 0;

                let timestamp = Self::read_u64(reader)?;

                let version = if is_tombstone {
                    Version::Tombstone
                } else {
                    Version::Value(Self::read_bytes(reader)?)
                };

                Ok(AOFCommand::Put {
                    entity,
                    timestamp: Timestamp::from_nanos(timestamp),
                    version,
                })
            }
            Self::CMD_PURGE => {
                let entity = Self::read_bytes(reader)?;
                let timestamp = Self::read_u64(reader)?;
                Ok(AOFCommand::Purge {
                    entity,
                    timestamp: Timestamp::from_nanos(timestamp),
                })
            }
            Self::CMD_LOW_WATER => {
                let horizon = Self::read_u64(reader)?;
                Ok(AOFCommand::LowWaterMark {
                    horizon: Timestamp::from_nanos(horizon),
                })
            }
            _ => Err(TempraError::InvalidFormat),
        }
    }

    /// Helper to read length-prefixed bytes.
    fn read_bytes(reader: &mut BufReader<&mut File>) -> Result<Bytes> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;

        Ok(Bytes::from(buf))
    }

    fn read_u64(reader: &mut BufReader<&mut File>) -> Result<u64> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Flush buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync.
    pub fn sync(&mut self) -> Result<()> {
        self.sync_with_mode(SyncMode::All)
    }

    /// Flush and sync using the provided mode.
    pub fn sync_with_mode(&mut self, mode: SyncMode) -> Result<()> {
        self.writer.flush()?;
        match mode {
            SyncMode::All => self.file.sync_all()?,
            SyncMode::Data => self.file.sync_data()?,
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AOFFile {
    fn drop(&mut self) {
        // Best effort flush on drop, ignore errors
        let _ = self.writer.flush();
    }
}
