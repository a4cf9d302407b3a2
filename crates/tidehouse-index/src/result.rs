//! Read-path result types.
//!
//! Not-found conditions are values, not errors: a read of a missing stream
//! is a normal outcome the caller branches on, and it still carries the
//! stream's metadata and last event number so callers can make follow-up
//! decisions without a second round trip.

use tidehouse_core::metadata::StreamMetadata;
use tidehouse_core::record::EventRecord;
use tidehouse_core::streams::StreamId;

/// Outcome of a single-event read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEventStatus {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
}

#[derive(Debug, Clone)]
pub struct IndexReadEventResult<Id: StreamId> {
    pub status: ReadEventStatus,

    /// Present exactly when `status` is `Success`.
    pub record: Option<EventRecord<Id>>,

    pub metadata: StreamMetadata,

    pub last_event_number: i64,

    /// For metastream reads: whether the original stream exists. `None` for
    /// ordinary streams.
    pub original_stream_exists: Option<bool>,
}

impl<Id: StreamId> IndexReadEventResult<Id> {
    pub fn not_found(
        status: ReadEventStatus,
        metadata: StreamMetadata,
        last_event_number: i64,
        original_stream_exists: Option<bool>,
    ) -> Self {
        debug_assert!(status != ReadEventStatus::Success);
        Self {
            status,
            record: None,
            metadata,
            last_event_number,
            original_stream_exists,
        }
    }

    pub fn success(
        record: EventRecord<Id>,
        metadata: StreamMetadata,
        last_event_number: i64,
        original_stream_exists: Option<bool>,
    ) -> Self {
        Self {
            status: ReadEventStatus::Success,
            record: Some(record),
            metadata,
            last_event_number,
            original_stream_exists,
        }
    }
}

/// Outcome of a range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStreamStatus {
    Success,
    NoStream,
    StreamDeleted,
}

#[derive(Debug, Clone)]
pub struct IndexReadStreamResult<Id: StreamId> {
    pub status: ReadStreamStatus,

    /// The event number the read was asked to start from.
    pub from_event_number: i64,

    pub max_count: usize,

    /// Ascending event numbers for forward reads, descending for backward.
    pub records: Vec<EventRecord<Id>>,

    /// Where to resume: the next `from` for forward reads, `-1` when a
    /// backward read reached the start.
    pub next_event_number: i64,

    pub last_event_number: i64,

    pub is_end_of_stream: bool,

    pub metadata: StreamMetadata,
}

impl<Id: StreamId> IndexReadStreamResult<Id> {
    /// A terminal non-success result (missing or deleted stream).
    pub fn no_records(
        status: ReadStreamStatus,
        from_event_number: i64,
        max_count: usize,
        metadata: StreamMetadata,
        last_event_number: i64,
    ) -> Self {
        debug_assert!(status != ReadStreamStatus::Success);
        Self {
            status,
            from_event_number,
            max_count,
            records: Vec::new(),
            next_event_number: from_event_number,
            last_event_number,
            is_end_of_stream: true,
            metadata,
        }
    }
}
