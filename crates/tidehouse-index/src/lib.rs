//! TideHouse Stream Index Read Path
//!
//! This crate implements the read side of the stream index: the machinery
//! that turns "stream X, event N" into records read back out of the
//! append-only transaction log.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────┐
//! │         IndexReader           │  read_event / read_stream_forward /
//! │  (retention, deletion,        │  read_stream_backward / metadata /
//! │   collision correction)       │  last event number / ACLs
//! └───┬────────┬────────┬─────────┘
//!     │        │        │
//!     ▼        ▼        ▼
//! ┌────────┐ ┌──────────────┐ ┌──────────────────┐
//! │ Index  │ │  TableIndex  │ │  LogReaderPool   │
//! │Backend │ │ (hash,ver)→  │ │  (leased log     │
//! │ cache  │ │   position   │ │   readers)       │
//! └────────┘ └──────────────┘ └──────────────────┘
//!     ▲             ▲
//!     │             │
//! ┌──────────────────────────┐
//! │ StreamExistenceFilter    │  "definitely absent" short-circuit
//! │ StreamNameIndex (fmt B)  │  name → numeric id resolution
//! └──────────────────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`reader::IndexReader`] - the read-path orchestrator.
//! - [`table::TableIndex`] - the consumed sorted-index abstraction, plus an
//!   in-memory implementation.
//! - [`backend::IndexBackend`] - the versioned stream-info cache shared with
//!   the commit pipeline.
//! - [`format::LogFormat`] - string vs numeric stream ids, monomorphized.
//! - [`existence::StreamExistenceFilter`] - probabilistic "does this stream
//!   exist at all" filter with persisted checkpoint.
//! - [`name_index`] - the numeric format's persistent name -> id store and
//!   its decorator stack.
//!
//! ## Wiring Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidehouse_index::{
//!     backend::IndexBackend, config::IndexConfig, existence::StreamExistenceFilter,
//!     format::StringFormat, reader::IndexReader, table::InMemoryTableIndex,
//! };
//! use tidehouse_log::{memory::InMemoryLog, pool::LogReaderPool};
//!
//! let config = IndexConfig::default();
//! let log = InMemoryLog::<String>::new();
//! let pool = Arc::new(LogReaderPool::new(
//!     "index-readers",
//!     config.initial_reader_count,
//!     config.max_reader_count,
//!     Box::new({
//!         let log = log.clone();
//!         move || -> Box<dyn tidehouse_log::LogReader<String>> { Box::new(log.reader()) }
//!     }),
//! ));
//!
//! let reader = IndexReader::new(
//!     Arc::new(StringFormat::default()),
//!     Arc::new(IndexBackend::new(config.stream_info_cache_capacity)),
//!     Arc::new(InMemoryTableIndex::new()),
//!     pool,
//!     Arc::new(StreamExistenceFilter::in_memory(config.stream_existence_filter_size)),
//!     &config,
//! );
//!
//! let result = reader.read_stream_forward(&"orders".to_string(), 0, 100).await?;
//! ```

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod existence;
pub mod format;
pub mod name_index;
pub mod reader;
pub mod result;
pub mod table;

pub use backend::IndexBackend;
pub use config::IndexConfig;
pub use entry::IndexEntry;
pub use error::{Error, Result};
pub use existence::{FilterKey, StreamExistenceFilter};
pub use format::{LogFormat, NumericFormat, StringFormat};
pub use name_index::{
    FilteredNameIndex, MetastreamNameIndex, NameIndex, StreamNameIndex,
};
pub use reader::{IndexReader, ReaderCounters};
pub use result::{
    IndexReadEventResult, IndexReadStreamResult, ReadEventStatus, ReadStreamStatus,
};
pub use table::{InMemoryTableIndex, TableIndex};
