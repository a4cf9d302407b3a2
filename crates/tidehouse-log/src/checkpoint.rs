//! Checkpoints
//!
//! A checkpoint is a named, monotonically advancing log position persisted
//! independently of the data it describes: "the index covers the log up to
//! here", "the existence filter is populated up to here". Readers compare
//! checkpoints to decide where to resume work after a restart.
//!
//! ## File Format
//!
//! `FileCheckpoint` stores 12 bytes: the position as a little-endian `i64`
//! followed by a CRC32 of those 8 bytes. Writes go to a temp file which is
//! renamed over the target, so a crash mid-write leaves the previous value
//! intact. A corrupt or truncated file fails `open` rather than silently
//! resetting - a checkpoint that lies causes re-reads at best and skipped
//! records at worst.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{Error, Result};

/// A named, monotonic log position.
pub trait Checkpoint: Send + Sync {
    fn name(&self) -> &str;

    /// Current value. `-1` means "nothing covered yet".
    fn read(&self) -> i64;

    /// Advance the in-memory value. Visible to `read` immediately; durable
    /// after `flush`.
    fn write(&self, value: i64);

    /// Persist the current value.
    fn flush(&self) -> Result<()>;
}

/// Volatile checkpoint for the in-memory mode and tests.
pub struct InMemoryCheckpoint {
    name: String,
    value: AtomicI64,
}

impl InMemoryCheckpoint {
    pub fn new(name: impl Into<String>, initial: i64) -> Self {
        Self {
            name: name.into(),
            value: AtomicI64::new(initial),
        }
    }
}

impl Checkpoint for InMemoryCheckpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    fn write(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed checkpoint.
#[derive(Debug)]
pub struct FileCheckpoint {
    name: String,
    path: PathBuf,
    value: AtomicI64,
}

impl FileCheckpoint {
    /// Open or create the checkpoint at `path`. A missing file starts at
    /// `-1`; an unreadable one is an error.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();

        let value = match std::fs::read(&path) {
            Ok(bytes) => Self::decode(&name, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => -1,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            name,
            path,
            value: AtomicI64::new(value),
        })
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<i64> {
        if bytes.len() != 12 {
            return Err(Error::CorruptCheckpoint {
                name: name.to_string(),
                reason: format!("expected 12 bytes, found {}", bytes.len()),
            });
        }
        let value = i64::from_le_bytes(bytes[..8].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let actual_crc = crc32fast::hash(&bytes[..8]);
        if stored_crc != actual_crc {
            return Err(Error::CorruptCheckpoint {
                name: name.to_string(),
                reason: "CRC mismatch".to_string(),
            });
        }
        Ok(value)
    }

    fn encode(value: i64) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        let crc = crc32fast::hash(&bytes[..8]);
        bytes[8..12].copy_from_slice(&crc.to_le_bytes());
        bytes
    }
}

impl Checkpoint for FileCheckpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    fn write(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    fn flush(&self) -> Result<()> {
        let value = self.read();
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, Self::encode(value))?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::trace!(checkpoint = %self.name, value, "checkpoint flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    // ---------------------------------------------------------------
    // InMemoryCheckpoint
    // ---------------------------------------------------------------

    #[test]
    fn test_in_memory_read_write() {
        let chk = InMemoryCheckpoint::new("chaser", -1);
        assert_eq!(chk.read(), -1);
        chk.write(42);
        assert_eq!(chk.read(), 42);
        chk.flush().unwrap();
        assert_eq!(chk.read(), 42);
    }

    // ---------------------------------------------------------------
    // FileCheckpoint
    // ---------------------------------------------------------------

    #[test]
    fn test_file_missing_starts_at_minus_one() {
        let dir = TempDir::new().unwrap();
        let chk = FileCheckpoint::open("filter", dir.path().join("filter.chk")).unwrap();
        assert_eq!(chk.read(), -1);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filter.chk");

        let chk = FileCheckpoint::open("filter", &path).unwrap();
        chk.write(123_456);
        chk.flush().unwrap();
        drop(chk);

        let reopened = FileCheckpoint::open("filter", &path).unwrap();
        assert_eq!(reopened.read(), 123_456);
    }

    #[test]
    fn test_unflushed_value_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filter.chk");

        let chk = FileCheckpoint::open("filter", &path).unwrap();
        chk.write(10);
        chk.flush().unwrap();
        chk.write(20);
        drop(chk);

        let reopened = FileCheckpoint::open("filter", &path).unwrap();
        assert_eq!(reopened.read(), 10);
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filter.chk");

        let chk = FileCheckpoint::open("filter", &path).unwrap();
        chk.write(77);
        chk.flush().unwrap();

        // Flip a payload bit; CRC must catch it.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = FileCheckpoint::open("filter", &path).unwrap_err();
        assert!(matches!(err, Error::CorruptCheckpoint { .. }));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filter.chk");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let err = FileCheckpoint::open("filter", &path).unwrap_err();
        assert!(matches!(err, Error::CorruptCheckpoint { .. }));
    }

    #[test]
    fn test_negative_positions_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filter.chk");
        let chk = FileCheckpoint::open("filter", &path).unwrap();
        chk.write(-1);
        chk.flush().unwrap();
        drop(chk);
        assert_eq!(FileCheckpoint::open("filter", &path).unwrap().read(), -1);
    }
}
