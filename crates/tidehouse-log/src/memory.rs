//! In-Memory Transaction Log
//!
//! An append-only log held entirely in memory, keyed by position. It backs
//! the `in_memory: true` deployment mode and every read-path test: fixtures
//! append prepares through the handle and hand `reader()` cursors to the
//! reader pool factory.
//!
//! Positions are sequential integers assigned at append time. That keeps
//! position arithmetic (checkpoints, post-positions) identical in shape to
//! the on-disk log without simulating byte offsets.
//!
//! ## Thread Safety
//!
//! The record map sits behind an `RwLock` shared by the writer handle and
//! every reader cursor; readers never block each other. Lock scopes are
//! short and never held across awaits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tidehouse_core::streams::StreamId;

use crate::error::Result;
use crate::reader::{LogReader, LogRecord, RecordReadResult};

/// Shared in-memory log. Clones share the same storage.
#[derive(Clone)]
pub struct InMemoryLog<Id: StreamId> {
    records: Arc<RwLock<BTreeMap<i64, LogRecord<Id>>>>,
    next_position: Arc<AtomicI64>,
}

impl<Id: StreamId> Default for InMemoryLog<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: StreamId> InMemoryLog<Id> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            next_position: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Reserve the next position. The write path claims a position first so
    /// it can stamp the record with it before appending.
    pub fn reserve_position(&self) -> i64 {
        self.next_position.fetch_add(1, Ordering::SeqCst)
    }

    /// Append a record at the position it carries.
    pub fn append(&self, record: LogRecord<Id>) {
        let position = record.log_position();
        self.records.write().unwrap().insert(position, record);
    }

    /// Remove the record at `position`, as scavenge would.
    pub fn scavenge(&self, position: i64) -> bool {
        self.records.write().unwrap().remove(&position).is_some()
    }

    /// Position one past the last appended record.
    pub fn write_position(&self) -> i64 {
        self.next_position.load(Ordering::SeqCst)
    }

    /// A fresh read cursor over this log.
    pub fn reader(&self) -> InMemoryLogReader<Id> {
        InMemoryLogReader {
            records: self.records.clone(),
            cursor: 0,
        }
    }
}

/// Read cursor over an `InMemoryLog`.
pub struct InMemoryLogReader<Id: StreamId> {
    records: Arc<RwLock<BTreeMap<i64, LogRecord<Id>>>>,
    cursor: i64,
}

#[async_trait]
impl<Id: StreamId> LogReader<Id> for InMemoryLogReader<Id> {
    async fn try_read_at(&mut self, position: i64) -> Result<RecordReadResult<Id>> {
        let records = self.records.read().unwrap();
        Ok(match records.get(&position) {
            Some(record) => RecordReadResult::found(record.clone(), position + 1),
            None => RecordReadResult::missing(position + 1),
        })
    }

    async fn try_read_next(&mut self) -> Result<RecordReadResult<Id>> {
        let records = self.records.read().unwrap();
        match records.range(self.cursor..).next() {
            Some((&position, record)) => {
                self.cursor = position + 1;
                Ok(RecordReadResult::found(record.clone(), position + 1))
            }
            None => Ok(RecordReadResult::missing(self.cursor)),
        }
    }

    fn reposition(&mut self, position: i64) {
        self.cursor = position;
    }
}
