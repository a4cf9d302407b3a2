//! TideHouse Transaction-Log Plumbing
//!
//! This crate provides the pieces the read path needs to get records out of
//! the transaction log without knowing how the log is stored:
//!
//! 1. **`LogReader`**: the narrow interface over a positioned log reader -
//!    read the record at a position, read the next record, reposition.
//! 2. **`LogReaderPool`**: a bounded pool of readers handed out as scoped
//!    leases. Dropping a lease always returns the reader, on every exit
//!    path.
//! 3. **`Checkpoint`**: a named, monotonic log position persisted separately
//!    from the data it describes (in memory or as a small checksummed file).
//! 4. **`InMemoryLog`**: an append-only in-memory log implementing
//!    `LogReader`, backing the in-memory deployment mode and tests.
//!
//! ## Concurrency
//!
//! Readers are not thread-safe individually; the pool is. Concurrent leases
//! are bounded by the pool's `max_count` - callers beyond the bound wait
//! until a lease is returned.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod pool;
pub mod reader;

pub use checkpoint::{Checkpoint, FileCheckpoint, InMemoryCheckpoint};
pub use error::{Error, Result};
pub use memory::{InMemoryLog, InMemoryLogReader};
pub use pool::{LogReaderLease, LogReaderPool};
pub use reader::{LogReader, LogRecord, RecordReadResult};
