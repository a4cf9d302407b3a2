//! Log reader interface.
//!
//! A `LogReader` is a positioned cursor over the transaction log. The index
//! read path uses it two ways: random access (`try_read_at`, following an
//! index entry's position) and sequential tailing (`reposition` +
//! `try_read_next`, used by the existence-filter initializer).
//!
//! Failed reads are not errors: a record may legitimately be missing because
//! scavenge removed it, so `RecordReadResult.success` is a value the caller
//! inspects, mirroring the "not found is a result, not an exception" rule
//! used throughout the read path.

use async_trait::async_trait;
use tidehouse_core::record::{CommitRecord, PrepareRecord};
use tidehouse_core::streams::StreamId;

use crate::error::Result;

/// A record read from the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord<Id: StreamId> {
    Prepare(PrepareRecord<Id>),
    Commit(CommitRecord),
}

impl<Id: StreamId> LogRecord<Id> {
    pub fn log_position(&self) -> i64 {
        match self {
            LogRecord::Prepare(p) => p.log_position,
            LogRecord::Commit(c) => c.log_position,
        }
    }
}

/// Outcome of a single read attempt.
#[derive(Debug, Clone)]
pub struct RecordReadResult<Id: StreamId> {
    /// Whether a record was found. A failed read is a normal outcome
    /// (scavenged position, end of log), not an error.
    pub success: bool,

    pub record: Option<LogRecord<Id>>,

    /// Position immediately after the read record; the resume point for
    /// sequential reads.
    pub post_position: i64,
}

impl<Id: StreamId> RecordReadResult<Id> {
    pub fn found(record: LogRecord<Id>, post_position: i64) -> Self {
        Self {
            success: true,
            record: Some(record),
            post_position,
        }
    }

    pub fn missing(post_position: i64) -> Self {
        Self {
            success: false,
            record: None,
            post_position,
        }
    }
}

/// Positioned reader over the transaction log.
///
/// Implementations may block on I/O; they are driven through async so the
/// pool can hand them to concurrent tasks. A reader is single-cursor and is
/// never shared - exclusive access is enforced by the pool lease.
#[async_trait]
pub trait LogReader<Id: StreamId>: Send {
    /// Read the record at `position`.
    async fn try_read_at(&mut self, position: i64) -> Result<RecordReadResult<Id>>;

    /// Read the next record after the current cursor and advance.
    async fn try_read_next(&mut self) -> Result<RecordReadResult<Id>>;

    /// Move the cursor so the next `try_read_next` starts at `position`.
    fn reposition(&mut self, position: i64);
}
