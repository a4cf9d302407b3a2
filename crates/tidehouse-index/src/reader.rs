//! Index Reader
//!
//! The heart of the read path. Given a stream id and an event number (or
//! range), the reader:
//!
//! 1. Resolves the stream's **last event number** - cache first, then the
//!    table index, correcting for hash collisions by verifying candidate
//!    prepares against the requested stream.
//! 2. Resolves the stream's **metadata** from its metastream.
//! 3. Applies **retention** (`max_count`, `truncate_before`, `max_age`) and
//!    **deletion** semantics (tombstones and soft-delete).
//! 4. Reads the surviving prepares from the transaction log and assembles
//!    bounded, ordered batches.
//!
//! ## Read Flow
//!
//! ```text
//! read_stream_forward("orders", 0, 100)
//!     ↓
//! last event number  → cache hit? → table index + collision check
//!     ↓
//! metadata           → metastream's latest event, parsed JSON
//!     ↓
//! retention window   → min event number from $maxCount / $tb
//!     ↓
//! table index GetRange → log reads → drop colliding entries → dedup
//!     ↓
//! records + next_event_number + is_end_of_stream
//! ```
//!
//! ## Hash Collisions
//!
//! The index is keyed by a 64-bit stream hash, so entries of different
//! streams can interleave under one key. Every prepare read through the
//! index is verified against the requested stream id; mismatches are
//! dropped and counted. Last-event-number resolution bounds the number of
//! non-matching entries it will inspect (`hash_collision_read_limit`) and
//! concedes `INVALID` beyond it.
//!
//! ## Streams Dominated by Expired Events
//!
//! With `$maxAge` set, a stream can hold millions of expired events before
//! a handful of live ones. Forward reads binary-search the event-number
//! space for the live boundary instead of scanning, keeping the read
//! O(log n) in expired events (see `read_forward_with_max_age`).
//!
//! ## Concurrency
//!
//! The reader owns no mutable state besides three atomic counters. Every
//! operation leases one log reader from the pool for its whole duration and
//! releases it on all exit paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tidehouse_core::event_number::{DELETED_STREAM, INVALID, NO_STREAM};
use tidehouse_core::metadata::{EffectiveAcl, StreamAcl, StreamMetadata};
use tidehouse_core::record::{EventRecord, PrepareRecord};
use tidehouse_core::time::now_ms;
use tidehouse_log::pool::{LogReaderLease, LogReaderPool};
use tidehouse_log::reader::LogRecord;

use crate::backend::IndexBackend;
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::existence::StreamExistenceFilter;
use crate::format::LogFormat;
use crate::result::{
    IndexReadEventResult, IndexReadStreamResult, ReadEventStatus, ReadStreamStatus,
};
use crate::table::TableIndex;

/// Operational counters, exposed for stats collection.
#[derive(Debug, Default)]
pub struct ReaderCounters {
    cached_stream_info: AtomicU64,
    not_cached_stream_info: AtomicU64,
    hash_collisions: AtomicU64,
}

impl ReaderCounters {
    /// Stream-info resolutions answered from cache.
    pub fn cached_stream_info(&self) -> u64 {
        self.cached_stream_info.load(Ordering::Relaxed)
    }

    /// Stream-info resolutions that had to hit the table index.
    pub fn not_cached_stream_info(&self) -> u64 {
        self.not_cached_stream_info.load(Ordering::Relaxed)
    }

    /// Index entries read and discarded because they belonged to a stream
    /// sharing the hash.
    pub fn hash_collisions(&self) -> u64 {
        self.hash_collisions.load(Ordering::Relaxed)
    }
}

type Lease<'a, F> = LogReaderLease<'a, <F as LogFormat>::StreamId>;

/// The stream index reader. Cheap to share (`Arc`); all operations are
/// reentrant.
pub struct IndexReader<F: LogFormat> {
    format: Arc<F>,
    backend: Arc<IndexBackend<F::StreamId>>,
    table_index: Arc<dyn TableIndex>,
    reader_pool: Arc<LogReaderPool<F::StreamId>>,
    existence_filter: Arc<StreamExistenceFilter>,
    metastream_metadata: StreamMetadata,
    hash_collision_read_limit: usize,
    skip_index_scan_on_read: bool,
    counters: ReaderCounters,
}

impl<F: LogFormat> IndexReader<F> {
    pub fn new(
        format: Arc<F>,
        backend: Arc<IndexBackend<F::StreamId>>,
        table_index: Arc<dyn TableIndex>,
        reader_pool: Arc<LogReaderPool<F::StreamId>>,
        existence_filter: Arc<StreamExistenceFilter>,
        config: &IndexConfig,
    ) -> Self {
        Self {
            format,
            backend,
            table_index,
            reader_pool,
            existence_filter,
            metastream_metadata: config.metastream_metadata.clone(),
            hash_collision_read_limit: config.hash_collision_read_limit,
            skip_index_scan_on_read: config.skip_index_scan_on_read,
            counters: ReaderCounters::default(),
        }
    }

    pub fn counters(&self) -> &ReaderCounters {
        &self.counters
    }

    fn ensure_valid_stream(&self, stream: &F::StreamId) -> Result<()> {
        if !self.format.is_valid(stream) {
            return Err(Error::InvalidArgument(format!(
                "invalid stream id: {stream}"
            )));
        }
        Ok(())
    }

    // ===============================================================
    // Single-event reads
    // ===============================================================

    /// Read one event. `event_number == -1` means "the latest event".
    pub async fn read_event(
        &self,
        stream: &F::StreamId,
        event_number: i64,
    ) -> Result<IndexReadEventResult<F::StreamId>> {
        self.ensure_valid_stream(stream)?;
        if event_number < -1 {
            return Err(Error::InvalidArgument(format!(
                "event number {event_number} out of range"
            )));
        }

        let mut lease = self.reader_pool.borrow().await?;
        let last_event_number = self.last_event_number_for(&mut lease, stream).await?;
        let metadata = self.metadata_for(&mut lease, stream).await?;
        let original_stream_exists = if self.format.is_metastream(stream) {
            Some(self.original_stream_exists(&mut lease, stream).await?)
        } else {
            None
        };

        if last_event_number == DELETED_STREAM {
            return Ok(IndexReadEventResult::not_found(
                ReadEventStatus::StreamDeleted,
                metadata,
                last_event_number,
                original_stream_exists,
            ));
        }
        if last_event_number == NO_STREAM {
            return Ok(IndexReadEventResult::not_found(
                ReadEventStatus::NoStream,
                metadata,
                last_event_number,
                original_stream_exists,
            ));
        }
        if last_event_number == INVALID {
            // Temporarily unresolvable; surfaced like a missing event.
            return Ok(IndexReadEventResult::not_found(
                ReadEventStatus::NotFound,
                metadata,
                last_event_number,
                original_stream_exists,
            ));
        }

        let event_number = if event_number == -1 {
            last_event_number
        } else {
            event_number
        };

        let min_event_number = min_event_number(&metadata, last_event_number);
        if event_number < min_event_number || event_number > last_event_number {
            return Ok(IndexReadEventResult::not_found(
                ReadEventStatus::NotFound,
                metadata,
                last_event_number,
                original_stream_exists,
            ));
        }

        match self.read_prepare_inner(&mut lease, stream, event_number).await? {
            Some(prepare) => {
                if let Some(max_age) = metadata.max_age {
                    let age_threshold = now_ms() - max_age.as_millis() as i64;
                    if prepare.timestamp < age_threshold {
                        return Ok(IndexReadEventResult::not_found(
                            ReadEventStatus::NotFound,
                            metadata,
                            last_event_number,
                            original_stream_exists,
                        ));
                    }
                }
                Ok(IndexReadEventResult::success(
                    EventRecord::from_prepare(event_number, prepare),
                    metadata,
                    last_event_number,
                    original_stream_exists,
                ))
            }
            None => Ok(IndexReadEventResult::not_found(
                ReadEventStatus::NotFound,
                metadata,
                last_event_number,
                original_stream_exists,
            )),
        }
    }

    /// Read the prepare backing `(stream, event_number)`, bypassing
    /// retention. Used for metadata assembly and replication.
    pub async fn read_prepare(
        &self,
        stream: &F::StreamId,
        event_number: i64,
    ) -> Result<Option<PrepareRecord<F::StreamId>>> {
        self.ensure_valid_stream(stream)?;
        if event_number < 0 {
            return Err(Error::InvalidArgument(format!(
                "event number {event_number} out of range"
            )));
        }
        let mut lease = self.reader_pool.borrow().await?;
        self.read_prepare_inner(&mut lease, stream, event_number).await
    }

    /// Stream id of the transaction starting at `transaction_position`.
    pub async fn event_stream_id_by_transaction_id(
        &self,
        transaction_position: i64,
    ) -> Result<Option<F::StreamId>> {
        if transaction_position < 0 {
            return Err(Error::InvalidArgument(format!(
                "transaction position {transaction_position} out of range"
            )));
        }
        let mut lease = self.reader_pool.borrow().await?;
        let prepare = self.read_prepare_at(&mut lease, transaction_position).await?;
        Ok(prepare.map(|p| p.event_stream_id))
    }

    // ===============================================================
    // Range reads
    // ===============================================================

    /// Read up to `max_count` events with ascending event numbers starting
    /// at `from`.
    pub async fn read_stream_forward(
        &self,
        stream: &F::StreamId,
        from: i64,
        max_count: usize,
    ) -> Result<IndexReadStreamResult<F::StreamId>> {
        self.ensure_valid_stream(stream)?;
        if from < 0 {
            return Err(Error::InvalidArgument(format!(
                "from event number {from} out of range"
            )));
        }
        if max_count == 0 {
            return Err(Error::InvalidArgument("max count must be positive".to_string()));
        }

        let mut lease = self.reader_pool.borrow().await?;
        let last_event_number = self.last_event_number_for(&mut lease, stream).await?;
        let metadata = self.metadata_for(&mut lease, stream).await?;

        if last_event_number == DELETED_STREAM {
            return Ok(IndexReadStreamResult::no_records(
                ReadStreamStatus::StreamDeleted,
                from,
                max_count,
                metadata,
                last_event_number,
            ));
        }
        if last_event_number == NO_STREAM || last_event_number == INVALID {
            return Ok(IndexReadStreamResult::no_records(
                ReadStreamStatus::NoStream,
                from,
                max_count,
                metadata,
                last_event_number,
            ));
        }

        let count = max_count.min(i64::MAX as usize) as i64;
        let end_event_number = from.saturating_add(count - 1);
        let min_event_number = min_event_number(&metadata, last_event_number);

        // Entire requested window is below retention: the caller should
        // re-read from the first retained event.
        if end_event_number < min_event_number {
            return Ok(IndexReadStreamResult {
                status: ReadStreamStatus::Success,
                from_event_number: from,
                max_count,
                records: Vec::new(),
                next_event_number: min_event_number,
                last_event_number,
                is_end_of_stream: false,
                metadata,
            });
        }
        let start_event_number = from.max(min_event_number);

        if let Some(max_age) = metadata.max_age {
            return self
                .read_forward_with_max_age(
                    &mut lease,
                    stream,
                    from,
                    max_count,
                    start_event_number,
                    end_event_number,
                    last_event_number,
                    max_age,
                    metadata,
                )
                .await;
        }

        let hash = self.format.stream_hash(stream);
        let entries = self
            .table_index
            .get_range(hash, start_event_number, end_event_number, None)
            .await;

        // Entries arrive descending; collect matching prepares, newest
        // duplicate first, then flip to ascending.
        let mut records = Vec::new();
        let mut last_version = None;
        for entry in &entries {
            let Some(prepare) = self.read_prepare_at(&mut lease, entry.position).await? else {
                continue;
            };
            if prepare.event_stream_id != *stream {
                self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if !self.skip_index_scan_on_read && last_version == Some(entry.version) {
                continue;
            }
            last_version = Some(entry.version);
            records.push(EventRecord::from_prepare(entry.version, prepare));
        }
        records.reverse();

        let highest_returned = records.last().map(|r| r.event_number).unwrap_or(i64::MIN);
        let next_event_number = end_event_number
            .max(highest_returned)
            .saturating_add(1)
            .min(last_event_number + 1);
        let is_end_of_stream = end_event_number >= last_event_number;

        Ok(IndexReadStreamResult {
            status: ReadStreamStatus::Success,
            from_event_number: from,
            max_count,
            records,
            next_event_number,
            last_event_number,
            is_end_of_stream,
            metadata,
        })
    }

    /// Read up to `max_count` events with descending event numbers starting
    /// at `from`. `from == -1` means "from the latest event".
    pub async fn read_stream_backward(
        &self,
        stream: &F::StreamId,
        from: i64,
        max_count: usize,
    ) -> Result<IndexReadStreamResult<F::StreamId>> {
        self.ensure_valid_stream(stream)?;
        if from < -1 {
            return Err(Error::InvalidArgument(format!(
                "from event number {from} out of range"
            )));
        }
        if max_count == 0 {
            return Err(Error::InvalidArgument("max count must be positive".to_string()));
        }

        let mut lease = self.reader_pool.borrow().await?;
        let last_event_number = self.last_event_number_for(&mut lease, stream).await?;
        let metadata = self.metadata_for(&mut lease, stream).await?;

        if last_event_number == DELETED_STREAM {
            return Ok(IndexReadStreamResult::no_records(
                ReadStreamStatus::StreamDeleted,
                from,
                max_count,
                metadata,
                last_event_number,
            ));
        }
        if last_event_number == NO_STREAM || last_event_number == INVALID {
            return Ok(IndexReadStreamResult::no_records(
                ReadStreamStatus::NoStream,
                from,
                max_count,
                metadata,
                last_event_number,
            ));
        }

        let count = max_count.min(i64::MAX as usize) as i64;
        let end_event_number = if from < 0 { last_event_number } else { from };
        let min_event_number = min_event_number(&metadata, last_event_number);

        // Entire window below retention: nothing older remains to read.
        if end_event_number < min_event_number {
            return Ok(IndexReadStreamResult {
                status: ReadStreamStatus::Success,
                from_event_number: from,
                max_count,
                records: Vec::new(),
                next_event_number: -1,
                last_event_number,
                is_end_of_stream: true,
                metadata,
            });
        }
        let start_event_number = (end_event_number.saturating_sub(count - 1))
            .max(0)
            .max(min_event_number);

        let hash = self.format.stream_hash(stream);
        let entries = self
            .table_index
            .get_range(hash, start_event_number, end_event_number, None)
            .await;

        let age_threshold = metadata
            .max_age
            .map(|max_age| now_ms() - max_age.as_millis() as i64);

        // Output keeps the descending range order.
        let mut records = Vec::new();
        let mut last_version = None;
        for entry in &entries {
            let Some(prepare) = self.read_prepare_at(&mut lease, entry.position).await? else {
                continue;
            };
            if prepare.event_stream_id != *stream {
                self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if !self.skip_index_scan_on_read && last_version == Some(entry.version) {
                continue;
            }
            last_version = Some(entry.version);
            if let Some(threshold) = age_threshold {
                if prepare.timestamp < threshold {
                    continue;
                }
            }
            records.push(EventRecord::from_prepare(entry.version, prepare));
        }

        // End of stream when the window hit event 0, or when the earliest
        // expected record is absent (a gap at the start: expired or
        // scavenged away).
        let earliest_returned = records.last().map(|r| r.event_number);
        let is_end_of_stream = start_event_number == 0
            || (start_event_number <= last_event_number
                && earliest_returned != Some(start_event_number));
        let next_event_number = if is_end_of_stream {
            -1
        } else {
            (start_event_number - 1).min(last_event_number)
        };

        Ok(IndexReadStreamResult {
            status: ReadStreamStatus::Success,
            from_event_number: from,
            max_count,
            records,
            next_event_number,
            last_event_number,
            is_end_of_stream,
            metadata,
        })
    }

    // ===============================================================
    // Forward reads under $maxAge - bounded binary search
    // ===============================================================

    /// Forward read for a stream with `$maxAge`. The requested window is
    /// scanned directly; if it holds only expired events, the live boundary
    /// is located by a bounded binary search over event numbers rather than
    /// a linear walk, and reported through `next_event_number`.
    #[allow(clippy::too_many_arguments)]
    async fn read_forward_with_max_age(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
        from: i64,
        max_count: usize,
        start_event_number: i64,
        end_event_number: i64,
        last_event_number: i64,
        max_age: std::time::Duration,
        metadata: StreamMetadata,
    ) -> Result<IndexReadStreamResult<F::StreamId>> {
        let age_threshold = now_ms() - max_age.as_millis() as i64;
        let count = max_count.min(i64::MAX as usize) as i64;
        let hash = self.format.stream_hash(stream);

        let empty = |next_event_number: i64, is_end_of_stream: bool, metadata: StreamMetadata| {
            IndexReadStreamResult {
                status: ReadStreamStatus::Success,
                from_event_number: from,
                max_count,
                records: Vec::new(),
                next_event_number,
                last_event_number,
                is_end_of_stream,
                metadata,
            }
        };

        if start_event_number > last_event_number {
            return Ok(empty(last_event_number + 1, true, metadata));
        }

        let mut start = start_event_number;
        let mut end = end_event_number;
        let mut entries = self.table_index.get_range(hash, start, end, None).await;
        if entries.is_empty() {
            // The window's head may have just been scavenged; re-anchor on
            // the oldest surviving entry, once.
            if let Some(oldest) = self.table_index.try_get_oldest_entry(hash).await {
                if oldest.version > start {
                    start = oldest.version;
                    end = start.saturating_add(count - 1);
                    entries = self.table_index.get_range(hash, start, end, None).await;
                }
            }
            if entries.is_empty() {
                let next = end_event_number
                    .saturating_add(1)
                    .min(last_event_number + 1);
                return Ok(empty(next, false, metadata));
            }
        }

        // Fast path: scan the fetched window newest-to-oldest, stopping at
        // the first expired record.
        let window = self.collect_live_window(lease, stream, &entries, age_threshold).await?;
        if !window.is_empty() {
            return Ok(self.finish_max_age_batch(
                window,
                from,
                max_count,
                end,
                last_event_number,
                metadata,
            ));
        }

        // Nothing live in the window. If even the latest event is expired,
        // the whole stream is.
        if last_event_number < from {
            return Ok(empty(last_event_number + 1, true, metadata));
        }
        let latest_live = match self
            .read_prepare_inner(lease, stream, last_event_number)
            .await?
        {
            Some(prepare) => prepare.timestamp >= age_threshold,
            None => false,
        };
        if !latest_live {
            return Ok(empty(last_event_number + 1, true, metadata));
        }

        // Live events exist past the window. Binary search event numbers
        // for the expired/live boundary, probing one window per step.
        let mut low = entries
            .iter()
            .map(|e| e.version)
            .min()
            .unwrap_or(start);
        let mut high = last_event_number;
        let mut best_next = None;

        while low <= high {
            let mid = low + (high - low) / 2;
            let probe_end = mid.saturating_add(count - 1);
            let probe = self.table_index.get_range(hash, mid, probe_end, None).await;
            if probe.is_empty() {
                low = mid + 1;
                continue;
            }

            // Earliest and latest records of this stream within the probe.
            let mut earliest = None;
            let mut latest = None;
            for entry in probe.iter().rev() {
                let Some(prepare) = self.read_prepare_at(lease, entry.position).await? else {
                    continue;
                };
                if prepare.event_stream_id != *stream {
                    self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if earliest.is_none() {
                    earliest = Some((entry.version, prepare.timestamp));
                }
                latest = Some((entry.version, prepare.timestamp));
            }

            let Some((earliest_version, earliest_timestamp)) = earliest else {
                // No events of this stream here; step past the probe. The
                // full probe width (not +1) is what guarantees progress on
                // windows dense with colliding entries.
                low = mid + probe.len() as i64;
                continue;
            };
            let (_, latest_timestamp) = latest.expect("latest set whenever earliest is");

            if earliest_timestamp >= age_threshold {
                // Whole probe live: the boundary is at or left of it.
                best_next = Some(earliest_version);
                high = mid - 1;
            } else if latest_timestamp < age_threshold {
                // Whole probe expired: the boundary is right of it.
                low = mid + probe.len() as i64;
            } else {
                // The probe straddles the boundary: its live suffix is the
                // answer.
                let window = self
                    .collect_live_window(lease, stream, &probe, age_threshold)
                    .await?;
                return Ok(self.finish_max_age_batch(
                    window,
                    from,
                    max_count,
                    end,
                    last_event_number,
                    metadata,
                ));
            }
        }

        // The search can end without a boundary when probes overshoot on
        // windows padded with duplicates. The latest event is known live,
        // so resuming there always makes progress.
        let next = best_next.unwrap_or(last_event_number);
        Ok(empty(next, false, metadata))
    }

    /// Records of `stream` in `entries` (descending) that are younger than
    /// the age threshold, returned ascending. Stops at the first expired
    /// record: per-stream timestamps grow with the version, so everything
    /// older is expired too.
    async fn collect_live_window(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
        entries: &[crate::entry::IndexEntry],
        age_threshold: i64,
    ) -> Result<Vec<EventRecord<F::StreamId>>> {
        let mut records = Vec::new();
        let mut last_version = None;
        for entry in entries {
            let Some(prepare) = self.read_prepare_at(lease, entry.position).await? else {
                continue;
            };
            if prepare.event_stream_id != *stream {
                self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if !self.skip_index_scan_on_read && last_version == Some(entry.version) {
                continue;
            }
            last_version = Some(entry.version);
            if prepare.timestamp < age_threshold {
                break;
            }
            records.push(EventRecord::from_prepare(entry.version, prepare));
        }
        records.reverse();
        Ok(records)
    }

    /// Trim a live batch to the requested window and build the result. A
    /// batch that lies entirely past the requested window collapses to an
    /// empty result whose `next_event_number` is the first live event, so
    /// the caller can re-read from there.
    fn finish_max_age_batch(
        &self,
        mut records: Vec<EventRecord<F::StreamId>>,
        from: i64,
        max_count: usize,
        window_end: i64,
        last_event_number: i64,
        metadata: StreamMetadata,
    ) -> IndexReadStreamResult<F::StreamId> {
        let count = max_count.min(i64::MAX as usize) as i64;
        let requested_end = from.saturating_add(count - 1);
        let first_live = records.first().map(|r| r.event_number);
        records.retain(|r| r.event_number <= requested_end);

        if records.is_empty() {
            let next_event_number = first_live.unwrap_or_else(|| {
                requested_end.saturating_add(1).min(last_event_number + 1)
            });
            return IndexReadStreamResult {
                status: ReadStreamStatus::Success,
                from_event_number: from,
                max_count,
                records: Vec::new(),
                next_event_number,
                last_event_number,
                is_end_of_stream: false,
                metadata,
            };
        }

        let highest_returned = records.last().map(|r| r.event_number).unwrap_or(i64::MIN);
        let next_event_number = window_end
            .max(highest_returned)
            .saturating_add(1)
            .min(last_event_number + 1);
        IndexReadStreamResult {
            status: ReadStreamStatus::Success,
            from_event_number: from,
            max_count,
            records,
            next_event_number,
            last_event_number,
            is_end_of_stream: next_event_number > last_event_number,
            metadata,
        }
    }

    // ===============================================================
    // Last event number
    // ===============================================================

    /// The stream's last event number, with deletion semantics applied:
    /// `DELETED_STREAM` for tombstoned or soft-deleted streams (and for
    /// metastreams whose original stream is deleted).
    pub async fn stream_last_event_number(&self, stream: &F::StreamId) -> Result<i64> {
        self.ensure_valid_stream(stream)?;
        let mut lease = self.reader_pool.borrow().await?;
        self.last_event_number_for(&mut lease, stream).await
    }

    async fn last_event_number_for(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<i64> {
        if self.format.is_metastream(stream) {
            let original = self.format.original_stream_of(stream);
            if self.last_event_number_of_original(lease, &original).await? == DELETED_STREAM {
                return Ok(DELETED_STREAM);
            }
            return self.last_event_number_raw(lease, stream).await;
        }
        self.last_event_number_of_original(lease, stream).await
    }

    /// Last event number of a non-metastream, including the soft-delete
    /// check through its metadata.
    async fn last_event_number_of_original(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<i64> {
        let last = self.last_event_number_raw(lease, stream).await?;
        if last == DELETED_STREAM || last == INVALID {
            return Ok(last);
        }
        let metadata = self.metadata_of_original(lease, stream).await?;
        if metadata.truncate_before == Some(DELETED_STREAM) {
            return Ok(DELETED_STREAM);
        }
        Ok(last)
    }

    /// Cache-or-index resolution, no deletion semantics.
    async fn last_event_number_raw(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<i64> {
        let (generation, cached) = self.backend.try_get_last_event_number(stream);
        if let Some(value) = cached {
            self.counters.cached_stream_info.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.counters
            .not_cached_stream_info
            .fetch_add(1, Ordering::Relaxed);

        let last = self.last_event_number_uncached(lease, stream).await?;
        if last == INVALID {
            // Unresolvable results are never cached.
            return Ok(last);
        }
        // Conditional on the generation observed at the miss: if the commit
        // pipeline wrote meanwhile, its value wins.
        Ok(self
            .backend
            .update_last_event_number_if_matches(generation, stream, last))
    }

    async fn last_event_number_uncached(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<i64> {
        if let Some(key) = self.format.filter_key(stream) {
            if !self.existence_filter.might_contain_key(key) {
                return Ok(NO_STREAM);
            }
        }

        let hash = self.format.stream_hash(stream);
        let Some(latest) = self.table_index.try_get_latest_entry(hash).await else {
            return Ok(NO_STREAM);
        };

        let latest_prepare = self.read_prepare_at(lease, latest.position).await?;
        if matches!(&latest_prepare, Some(p) if p.event_stream_id == *stream) {
            let mut latest_version = latest.version;
            // Index rebuilds can leave this stream a duplicate entry above
            // the verified one; scan the short tail past it.
            if let Some(above) = latest.version.checked_add(1) {
                let entries = self
                    .table_index
                    .get_range(
                        hash,
                        above,
                        i64::MAX,
                        Some(self.hash_collision_read_limit + 1),
                    )
                    .await;
                for entry in entries {
                    let Some(prepare) = self.read_prepare_at(lease, entry.position).await? else {
                        continue;
                    };
                    if prepare.event_stream_id == *stream {
                        latest_version = latest_version.max(entry.version);
                    } else {
                        self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            return Ok(latest_version);
        }

        // The newest entry for this hash belongs to another stream. Scan
        // newest-to-oldest for ours, up to the collision budget.
        let mut latest_version = None;
        let entries = self
            .table_index
            .get_range(hash, 0, i64::MAX, Some(self.hash_collision_read_limit + 1))
            .await;
        for (scanned, entry) in entries.iter().enumerate() {
            if scanned >= self.hash_collision_read_limit {
                match latest_version {
                    Some(version) => return Ok(version),
                    None => {
                        tracing::error!(
                            stream = %stream,
                            limit = self.hash_collision_read_limit,
                            "hash collision read limit exceeded resolving last event number"
                        );
                        return Ok(INVALID);
                    }
                }
            }
            let Some(prepare) = self.read_prepare_at(lease, entry.position).await? else {
                continue;
            };
            if prepare.event_stream_id == *stream {
                latest_version = Some(latest_version.unwrap_or(entry.version).max(entry.version));
            } else {
                self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(latest_version.unwrap_or(NO_STREAM))
    }

    // ===============================================================
    // Metadata
    // ===============================================================

    /// The stream's effective metadata. Metastreams report the fixed
    /// configured metadata and never touch the log.
    pub async fn stream_metadata(&self, stream: &F::StreamId) -> Result<StreamMetadata> {
        self.ensure_valid_stream(stream)?;
        if self.format.is_metastream(stream) {
            return Ok(self.metastream_metadata.clone());
        }
        let mut lease = self.reader_pool.borrow().await?;
        self.metadata_of_original(&mut lease, stream).await
    }

    async fn metadata_for(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<StreamMetadata> {
        if self.format.is_metastream(stream) {
            return Ok(self.metastream_metadata.clone());
        }
        self.metadata_of_original(lease, stream).await
    }

    async fn metadata_of_original(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<StreamMetadata> {
        let (generation, cached) = self.backend.try_get_metadata(stream);
        if let Some(metadata) = cached {
            self.counters.cached_stream_info.fetch_add(1, Ordering::Relaxed);
            return Ok(metadata);
        }
        self.counters
            .not_cached_stream_info
            .fetch_add(1, Ordering::Relaxed);

        let metadata = self.metadata_uncached(lease, stream).await?;
        Ok(self
            .backend
            .update_metadata_if_matches(generation, stream, metadata))
    }

    async fn metadata_uncached(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
    ) -> Result<StreamMetadata> {
        let metastream = self.format.metastream_of(stream);

        // A deleted original stream deletes its metastream with it.
        let meta_last = if self.last_event_number_raw(lease, stream).await? == DELETED_STREAM {
            DELETED_STREAM
        } else {
            self.last_event_number_raw(lease, &metastream).await?
        };
        if meta_last == NO_STREAM || meta_last == DELETED_STREAM || meta_last == INVALID {
            return Ok(StreamMetadata::EMPTY);
        }

        let Some(prepare) = self.read_prepare_inner(lease, &metastream, meta_last).await? else {
            return Err(Error::Corruption(format!(
                "metadata event {meta_last} of metastream {metastream} is missing from the log"
            )));
        };

        if prepare.data.is_empty() || !prepare.is_json() {
            return Ok(StreamMetadata::EMPTY);
        }
        Ok(StreamMetadata::from_json(
            &prepare.data,
            prepare.record_version,
        ))
    }

    // ===============================================================
    // ACLs
    // ===============================================================

    /// The three ACL layers for a stream: its metadata ACL, the system
    /// settings ACL for its class, and the built-in default.
    pub async fn effective_acl(&self, stream: &F::StreamId) -> Result<EffectiveAcl> {
        self.ensure_valid_stream(stream)?;
        let metadata = self.stream_metadata(stream).await?;
        let settings = self.backend.system_settings();

        let (system, default) = if self.format.is_system_stream(stream) {
            (
                settings
                    .system_stream_acl
                    .unwrap_or_else(StreamAcl::system_default),
                StreamAcl::system_default(),
            )
        } else {
            (
                settings
                    .user_stream_acl
                    .unwrap_or_else(StreamAcl::user_default),
                StreamAcl::user_default(),
            )
        };

        Ok(EffectiveAcl {
            stream: metadata.acl,
            system,
            default,
        })
    }

    // ===============================================================
    // Shared plumbing
    // ===============================================================

    /// Whether the original stream behind `metastream` exists (has events
    /// and is not deleted).
    async fn original_stream_exists(
        &self,
        lease: &mut Lease<'_, F>,
        metastream: &F::StreamId,
    ) -> Result<bool> {
        let original = self.format.original_stream_of(metastream);
        let last = self.last_event_number_of_original(lease, &original).await?;
        Ok(last >= 0 && last != DELETED_STREAM)
    }

    /// The prepare for `(stream, event_number)`, resolved through the index
    /// and verified against the stream id (collision correction).
    async fn read_prepare_inner(
        &self,
        lease: &mut Lease<'_, F>,
        stream: &F::StreamId,
        event_number: i64,
    ) -> Result<Option<PrepareRecord<F::StreamId>>> {
        let hash = self.format.stream_hash(stream);

        if self.skip_index_scan_on_read {
            let Some(position) = self.table_index.try_get_one_value(hash, event_number).await
            else {
                return Ok(None);
            };
            let prepare = self.read_prepare_at(lease, position).await?;
            return Ok(prepare.filter(|p| p.event_stream_id == *stream));
        }

        // Several entries can claim this version (collisions, rebuilt
        // tables); the newest one belonging to this stream wins.
        let entries = self
            .table_index
            .get_range(hash, event_number, event_number, None)
            .await;
        for entry in entries {
            let Some(prepare) = self.read_prepare_at(lease, entry.position).await? else {
                continue;
            };
            if prepare.event_stream_id == *stream {
                return Ok(Some(prepare));
            }
            self.counters.hash_collisions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }

    /// The prepare at a log position. A missing record is a normal outcome
    /// (scavenged); a record of the wrong kind means the index points into
    /// garbage and the store is corrupt.
    async fn read_prepare_at(
        &self,
        lease: &mut Lease<'_, F>,
        position: i64,
    ) -> Result<Option<PrepareRecord<F::StreamId>>> {
        let result = lease.try_read_at(position).await?;
        if !result.success {
            return Ok(None);
        }
        match result.record {
            Some(LogRecord::Prepare(prepare)) => Ok(Some(prepare)),
            _ => Err(Error::Corruption(format!(
                "log position {position} does not hold a prepare record"
            ))),
        }
    }
}

/// First event number retention keeps: the greater of zero, the
/// `max_count` horizon and `truncate_before`.
fn min_event_number(metadata: &StreamMetadata, last_event_number: i64) -> i64 {
    let mut min = 0;
    if let Some(max_count) = metadata.max_count {
        min = min.max(last_event_number - max_count + 1);
    }
    if let Some(truncate_before) = metadata.truncate_before {
        min = min.max(truncate_before);
    }
    min
}
