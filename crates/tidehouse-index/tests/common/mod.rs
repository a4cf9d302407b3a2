//! Shared read-path test fixture.
//!
//! Stands in for the commit pipeline: appends prepares to an in-memory log
//! and index entries to an in-memory table index, leaving the stream-info
//! cache cold so tests exercise the full uncached resolution path. Tests
//! that need cache interplay poke the backend directly.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use tidehouse_core::event_number::DELETED_STREAM;
use tidehouse_core::hashing::StreamHasher;
use tidehouse_core::metadata::StreamMetadata;
use tidehouse_core::record::{LogRecordVersion, PrepareFlags, PrepareRecord};
use tidehouse_core::streams::metastream_of;
use tidehouse_core::time::now_ms;
use tidehouse_index::backend::IndexBackend;
use tidehouse_index::config::IndexConfig;
use tidehouse_index::existence::StreamExistenceFilter;
use tidehouse_index::format::{LogFormat, StringFormat};
use tidehouse_index::reader::IndexReader;
use tidehouse_index::table::InMemoryTableIndex;
use tidehouse_log::memory::InMemoryLog;
use tidehouse_log::pool::LogReaderPool;
use tidehouse_log::reader::{LogReader, LogRecord};

/// Hash function that sends every input to the same value, forcing hash
/// collisions between all streams.
#[derive(Debug, Clone, Copy)]
pub struct ConstHasher(pub u32);

impl StreamHasher for ConstHasher {
    fn hash(&self, _data: &[u8]) -> u32 {
        self.0
    }
}

/// A string-format read path over in-memory storage.
pub struct Fixture<F: LogFormat<StreamId = String>> {
    pub format: Arc<F>,
    pub log: InMemoryLog<String>,
    pub table: Arc<InMemoryTableIndex>,
    pub backend: Arc<IndexBackend<String>>,
    pub filter: Arc<StreamExistenceFilter>,
    pub reader: IndexReader<F>,
}

impl Fixture<StringFormat> {
    pub fn new() -> Self {
        Self::with_format(StringFormat::default(), IndexConfig::default())
    }

    pub fn with_config(config: IndexConfig) -> Self {
        Self::with_format(StringFormat::default(), config)
    }
}

impl<F: LogFormat<StreamId = String>> Fixture<F> {
    pub fn with_format(format: F, config: IndexConfig) -> Self {
        let format = Arc::new(format);
        let log = InMemoryLog::<String>::new();
        let table = Arc::new(InMemoryTableIndex::new());
        let backend = Arc::new(IndexBackend::new(config.stream_info_cache_capacity));
        let filter = Arc::new(StreamExistenceFilter::in_memory(
            config.stream_existence_filter_size,
        ));

        let pool = Arc::new(LogReaderPool::new(
            "test-readers",
            config.initial_reader_count,
            config.max_reader_count,
            Box::new({
                let log = log.clone();
                move || -> Box<dyn LogReader<String>> { Box::new(log.reader()) }
            }),
        ));

        let reader = IndexReader::new(
            format.clone(),
            backend.clone(),
            table.clone(),
            pool,
            filter.clone(),
            &config,
        );

        Self {
            format,
            log,
            table,
            backend,
            filter,
            reader,
        }
    }

    pub fn hash_of(&self, stream: &str) -> u64 {
        self.format.stream_hash(&stream.to_string())
    }

    /// Append a committed prepare and index it. Returns the log position.
    pub fn append_raw(
        &self,
        stream: &str,
        event_number: i64,
        data: &[u8],
        timestamp: i64,
        flags: PrepareFlags,
    ) -> i64 {
        let position = self.log.reserve_position();
        self.log.append(LogRecord::Prepare(PrepareRecord {
            log_position: position,
            transaction_position: position,
            event_stream_id: stream.to_string(),
            event_number,
            event_type: "test-event".to_string(),
            timestamp,
            flags,
            data: Bytes::copy_from_slice(data),
            metadata: Bytes::new(),
            record_version: LogRecordVersion::V1,
        }));
        self.table
            .add(self.hash_of(stream), event_number, position);
        if self.filter.is_enabled() {
            self.filter.add_hash(self.hash_of(stream));
        }
        position
    }

    /// Append an ordinary committed event stamped "now".
    pub fn append_event(&self, stream: &str, event_number: i64, data: &[u8]) -> i64 {
        self.append_event_at(stream, event_number, data, now_ms())
    }

    /// Append an ordinary committed event with an explicit timestamp.
    pub fn append_event_at(
        &self,
        stream: &str,
        event_number: i64,
        data: &[u8],
        timestamp: i64,
    ) -> i64 {
        self.append_raw(
            stream,
            event_number,
            data,
            timestamp,
            PrepareFlags::DATA | PrepareFlags::IS_COMMITTED,
        )
    }

    /// Next free event number on `stream`, per the table index.
    pub async fn next_event_number(&self, stream: &str) -> i64 {
        use tidehouse_index::table::TableIndex;
        self.table
            .try_get_latest_entry(self.hash_of(stream))
            .await
            .map(|entry| entry.version + 1)
            .unwrap_or(0)
    }

    /// Write a metadata event for `stream` onto its metastream.
    pub async fn set_metadata(&self, stream: &str, metadata: &StreamMetadata) {
        self.set_metadata_json(stream, &metadata.to_json()).await;
    }

    /// Write a raw metadata payload (possibly malformed) for `stream`.
    pub async fn set_metadata_json(&self, stream: &str, json: &[u8]) {
        let meta_stream = metastream_of(stream);
        let event_number = self.next_event_number(&meta_stream).await;
        self.append_raw(
            &meta_stream,
            event_number,
            json,
            now_ms(),
            PrepareFlags::DATA | PrepareFlags::IS_COMMITTED | PrepareFlags::IS_JSON,
        );
    }

    /// Soft-delete `stream` by writing `$tb: -1` metadata.
    pub async fn soft_delete(&self, stream: &str) {
        self.set_metadata(
            stream,
            &StreamMetadata {
                truncate_before: Some(DELETED_STREAM),
                ..Default::default()
            },
        )
        .await;
    }

    /// Hard-delete `stream` by writing a tombstone at the deleted marker.
    pub fn tombstone(&self, stream: &str) -> i64 {
        self.append_raw(
            stream,
            DELETED_STREAM,
            b"",
            now_ms(),
            PrepareFlags::STREAM_DELETE | PrepareFlags::IS_COMMITTED,
        )
    }
}

/// Milliseconds-ago helper for age-based tests.
pub fn minutes_ago(minutes: i64) -> i64 {
    now_ms() - minutes * 60 * 1000
}
