//! Index entry: one (stream hash, event number) -> log position mapping.

use serde::{Deserialize, Serialize};

/// A single entry of the secondary index. Entries are ordered by
/// `(stream_hash, version)`; several streams may share a hash, and a version
/// may appear more than once after index rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub stream_hash: u64,

    /// Event number within the stream.
    pub version: i64,

    /// Log position of the prepare record.
    pub position: i64,
}

impl IndexEntry {
    pub fn new(stream_hash: u64, version: i64, position: i64) -> Self {
        Self {
            stream_hash,
            version,
            position,
        }
    }
}
