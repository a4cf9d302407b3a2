//! Index Configuration
//!
//! Knobs for the read path. Live handles (the log-reader factory, the
//! existence-filter checkpoint, the chaser checkpoint) are wired in code;
//! everything that is plain data lives here so deployments can load it from
//! their config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tidehouse_core::metadata::StreamMetadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Root directory for index state (existence filter, stream-name
    /// index). Unused when `in_memory` is set.
    pub index_directory: PathBuf,

    /// Keep all index state in memory; nothing is persisted.
    #[serde(default)]
    pub in_memory: bool,

    /// Log readers created eagerly at startup (default: 5).
    #[serde(default = "default_initial_reader_count")]
    pub initial_reader_count: usize,

    /// Upper bound on concurrently leased log readers (default: 100).
    #[serde(default = "default_max_reader_count")]
    pub max_reader_count: usize,

    /// Size of the stream-existence filter in bytes. 0 disables it.
    #[serde(default)]
    pub stream_existence_filter_size: i64,

    /// How many non-matching index entries to inspect before giving up on
    /// resolving a colliding stream (default: 100).
    #[serde(default = "default_hash_collision_read_limit")]
    pub hash_collision_read_limit: usize,

    /// Skip duplicate-entry reconciliation on range reads. Safe only when
    /// the index is known to carry no duplicates.
    #[serde(default)]
    pub skip_index_scan_on_read: bool,

    /// Capacity of each stream-info cache map (default: 100 000 streams).
    #[serde(default = "default_stream_info_cache_capacity")]
    pub stream_info_cache_capacity: usize,

    /// Metadata reported for every metastream. Fixed by configuration,
    /// never read from the log.
    #[serde(skip, default = "default_metastream_metadata")]
    pub metastream_metadata: StreamMetadata,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_directory: PathBuf::from("./data/index"),
            in_memory: false,
            initial_reader_count: default_initial_reader_count(),
            max_reader_count: default_max_reader_count(),
            stream_existence_filter_size: 0,
            hash_collision_read_limit: default_hash_collision_read_limit(),
            skip_index_scan_on_read: false,
            stream_info_cache_capacity: default_stream_info_cache_capacity(),
            metastream_metadata: default_metastream_metadata(),
        }
    }
}

impl IndexConfig {
    /// Directory holding the existence filter blob and checkpoint.
    pub fn stream_existence_dir(&self) -> PathBuf {
        self.index_directory.join("stream-existence")
    }

    /// Directory holding the stream-name index (numeric format only).
    pub fn stream_name_index_dir(&self) -> PathBuf {
        self.index_directory.join("stream-name-index")
    }
}

fn default_initial_reader_count() -> usize {
    5
}

fn default_max_reader_count() -> usize {
    100
}

fn default_hash_collision_read_limit() -> usize {
    100
}

fn default_stream_info_cache_capacity() -> usize {
    100_000
}

fn default_metastream_metadata() -> StreamMetadata {
    // Only the latest metadata event matters, so metastreams keep one.
    StreamMetadata {
        max_count: Some(1),
        ..StreamMetadata::EMPTY
    }
}
