//! Log Reader Pool
//!
//! Opening a log reader is not free (file handles, buffers), and the read
//! path needs one for every concurrent operation. The pool keeps a stack of
//! idle readers and bounds how many can be out at once:
//!
//! - `initial_count` readers are created eagerly at startup.
//! - `borrow()` waits on a semaphore bounded by `max_count`, then pops an
//!   idle reader or creates one through the factory.
//! - The returned `LogReaderLease` gives exclusive access; dropping it
//!   returns the reader to the stack and releases the permit - on every
//!   exit path, including early returns and panics.
//!
//! ## Usage
//!
//! ```ignore
//! let pool = LogReaderPool::new("index-readers", 5, 100, Box::new(move || {
//!     Box::new(log.reader())
//! }));
//!
//! let mut lease = pool.borrow().await?;
//! let result = lease.try_read_at(position).await?;
//! // lease drops here; the reader goes back to the pool
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tidehouse_core::streams::StreamId;

use crate::error::{Error, Result};
use crate::reader::{LogReader, RecordReadResult};

/// Creates fresh readers for the pool.
pub type ReaderFactory<Id> = Box<dyn Fn() -> Box<dyn LogReader<Id>> + Send + Sync>;

/// Bounded pool of transaction-log readers.
pub struct LogReaderPool<Id: StreamId> {
    name: String,
    factory: ReaderFactory<Id>,
    idle: Mutex<Vec<Box<dyn LogReader<Id>>>>,
    permits: Arc<Semaphore>,
}

impl<Id: StreamId> LogReaderPool<Id> {
    /// Create a pool with `initial_count` readers ready and at most
    /// `max_count` leased concurrently.
    pub fn new(
        name: impl Into<String>,
        initial_count: usize,
        max_count: usize,
        factory: ReaderFactory<Id>,
    ) -> Self {
        let initial_count = initial_count.min(max_count);
        let idle = (0..initial_count).map(|_| factory()).collect();
        Self {
            name: name.into(),
            factory,
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(max_count)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of leases currently available without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Borrow a reader, waiting if `max_count` leases are already out.
    pub async fn borrow(&self) -> Result<LogReaderLease<'_, Id>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        let reader = {
            let mut idle = self.idle.lock().unwrap();
            idle.pop()
        };
        let reader = reader.unwrap_or_else(|| {
            tracing::debug!(pool = %self.name, "creating reader beyond warm set");
            (self.factory)()
        });

        Ok(LogReaderLease {
            reader: Some(reader),
            pool: self,
            _permit: permit,
        })
    }
}

/// Scoped lease over a pooled reader. Exclusive while held; returned to the
/// pool on drop.
pub struct LogReaderLease<'a, Id: StreamId> {
    reader: Option<Box<dyn LogReader<Id>>>,
    pool: &'a LogReaderPool<Id>,
    _permit: OwnedSemaphorePermit,
}

impl<Id: StreamId> LogReaderLease<'_, Id> {
    fn reader_mut(&mut self) -> &mut dyn LogReader<Id> {
        // The Option is only empty during drop.
        self.reader.as_mut().expect("lease used after release").as_mut()
    }

    pub async fn try_read_at(&mut self, position: i64) -> Result<RecordReadResult<Id>> {
        self.reader_mut().try_read_at(position).await
    }

    pub async fn try_read_next(&mut self) -> Result<RecordReadResult<Id>> {
        self.reader_mut().try_read_next().await
    }

    pub fn reposition(&mut self, position: i64) {
        self.reader_mut().reposition(position);
    }
}

impl<Id: StreamId> Drop for LogReaderLease<'_, Id> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.pool.idle.lock().unwrap().push(reader);
        }
    }
}
