//! Stream-Existence Filter
//!
//! Most reads of a nonexistent stream come from clients probing for streams
//! that were never written ("does `order-12345` exist yet?"). Answering
//! those through the table index costs a range query per probe. The
//! existence filter short-circuits them: a probabilistic membership filter
//! that answers **definitely absent** or **possibly present**.
//!
//! - `false` from `might_contain_*`: the stream was never added - skip the
//!   index entirely and answer "no stream".
//! - `true`: the stream might exist (small false-positive rate); fall
//!   through to the index.
//!
//! The filter is keyed by stream hash in the string log format and by
//! stream name in the numeric one (`FilterKey` carries either).
//!
//! ## Persistence
//!
//! The filter lives in `<index_dir>/stream-existence/`:
//!
//! - `filter.dat` - the serialized bloom filter (versioned header, SIP keys,
//!   bitmap, trailing CRC32).
//! - `filter.chk` - a checkpoint recording the log position up to which the
//!   filter has been populated.
//!
//! A corrupt blob is discarded with a warning and rebuilt from scratch; the
//! checkpoint is reset so the initializer reseeds.
//!
//! ## Initialization
//!
//! `initialize_from_table_index` (string format) seeds one entry per
//! distinct stream hash from the index, then tails the transaction log from
//! `max(prepare_checkpoint, commit_checkpoint)` for committed prepares. If
//! the persisted filter checkpoint is already ahead of the index, seeding is
//! skipped and tailing starts at the filter checkpoint directly.
//!
//! `initialize_from_name_index` (numeric format) seeds from the persisted
//! stream-name index instead. Duplicate adds are harmless in both modes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bloomfilter::Bloom;
use tidehouse_log::checkpoint::{Checkpoint, InMemoryCheckpoint};
use tidehouse_log::pool::LogReaderPool;
use tidehouse_log::reader::LogRecord;

use crate::error::Result;
use crate::format::LogFormat;
use crate::name_index::NameIndex;
use crate::table::TableIndex;

const FILTER_FILE: &str = "filter.dat";
const FILTER_CHECKPOINT_FILE: &str = "filter.chk";
const BLOB_VERSION: u8 = 1;

/// Assumed bits per tracked stream when sizing the bloom filter.
const BITS_PER_STREAM: i64 = 10;

/// Key the filter is probed with; which variant applies is decided by the
/// log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKey<'a> {
    StreamHash(u64),
    StreamName(&'a str),
}

struct FilterInner {
    bloom: Bloom<[u8]>,
    item_count: u64,
}

/// Probabilistic stream-membership filter with a persisted population
/// checkpoint. Append-only; guarded by its own lock.
pub struct StreamExistenceFilter {
    inner: Option<Mutex<FilterInner>>,
    checkpoint: Arc<dyn Checkpoint>,
    blob_path: Option<PathBuf>,
}

impl StreamExistenceFilter {
    /// Open (or create) the filter under `dir`. A `size_bytes <= 0`
    /// disables the filter entirely.
    pub fn open(dir: &Path, size_bytes: i64, checkpoint: Arc<dyn Checkpoint>) -> Result<Self> {
        if size_bytes <= 0 {
            return Ok(Self::disabled());
        }
        std::fs::create_dir_all(dir)?;
        let blob_path = dir.join(FILTER_FILE);

        let inner = match std::fs::read(&blob_path) {
            Ok(bytes) => match decode_blob(&bytes) {
                Some(inner) => inner,
                None => {
                    tracing::warn!(
                        path = %blob_path.display(),
                        "stream-existence filter blob is corrupt, rebuilding"
                    );
                    checkpoint.write(-1);
                    fresh_filter(size_bytes)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => fresh_filter(size_bytes),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Some(Mutex::new(inner)),
            checkpoint,
            blob_path: Some(blob_path),
        })
    }

    /// An enabled filter with no backing files. Used by the in-memory mode
    /// and tests.
    pub fn in_memory(size_bytes: i64) -> Self {
        if size_bytes <= 0 {
            return Self::disabled();
        }
        Self {
            inner: Some(Mutex::new(fresh_filter(size_bytes))),
            checkpoint: Arc::new(InMemoryCheckpoint::new("stream-existence", -1)),
            blob_path: None,
        }
    }

    /// A no-op filter: everything is possibly present.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            checkpoint: Arc::new(InMemoryCheckpoint::new("stream-existence", -1)),
            blob_path: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    // ---------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------

    pub fn add_hash(&self, stream_hash: u64) {
        self.add_bytes(&stream_hash.to_le_bytes());
    }

    pub fn add_name(&self, name: &str) {
        self.add_bytes(name.as_bytes());
    }

    pub fn add_key(&self, key: FilterKey<'_>) {
        match key {
            FilterKey::StreamHash(hash) => self.add_hash(hash),
            FilterKey::StreamName(name) => self.add_name(name),
        }
    }

    fn add_bytes(&self, bytes: &[u8]) {
        if let Some(inner) = &self.inner {
            let mut inner = inner.lock().unwrap();
            inner.bloom.set(bytes);
            inner.item_count += 1;
        }
    }

    /// `false` means the stream definitely does not exist. A disabled filter
    /// always answers `true`.
    pub fn might_contain_hash(&self, stream_hash: u64) -> bool {
        self.might_contain_bytes(&stream_hash.to_le_bytes())
    }

    pub fn might_contain_name(&self, name: &str) -> bool {
        self.might_contain_bytes(name.as_bytes())
    }

    pub fn might_contain_key(&self, key: FilterKey<'_>) -> bool {
        match key {
            FilterKey::StreamHash(hash) => self.might_contain_hash(hash),
            FilterKey::StreamName(name) => self.might_contain_name(name),
        }
    }

    fn might_contain_bytes(&self, bytes: &[u8]) -> bool {
        match &self.inner {
            Some(inner) => inner.lock().unwrap().bloom.check(bytes),
            None => true,
        }
    }

    // ---------------------------------------------------------------
    // Checkpoint & persistence
    // ---------------------------------------------------------------

    /// Log position up to which the filter has been populated.
    pub fn checkpoint(&self) -> i64 {
        self.checkpoint.read()
    }

    pub fn set_checkpoint(&self, position: i64) {
        self.checkpoint.write(position);
    }

    /// Persist the filter blob and its checkpoint.
    pub fn flush(&self) -> Result<()> {
        if let (Some(inner), Some(path)) = (&self.inner, &self.blob_path) {
            let blob = encode_blob(&inner.lock().unwrap());
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, blob)?;
            std::fs::rename(&tmp, path)?;
        }
        self.checkpoint.flush()?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Initialization
    // ---------------------------------------------------------------

    /// Populate from the table index plus a tail of the transaction log.
    /// Used by the string log format, where the filter is hash-keyed.
    pub async fn initialize_from_table_index<F: LogFormat>(
        &self,
        format: &F,
        table_index: &dyn TableIndex,
        pool: &LogReaderPool<F::StreamId>,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let index_checkpoint = table_index
            .prepare_checkpoint()
            .max(table_index.commit_checkpoint());
        let filter_checkpoint = self.checkpoint();

        let tail_from = if filter_checkpoint >= index_checkpoint {
            // Already populated past the index; resume tailing directly.
            filter_checkpoint
        } else {
            let mut seeded = 0u64;
            let mut last_hash = None;
            for entry in table_index.iterate_all().await {
                if last_hash != Some(entry.stream_hash) {
                    self.add_hash(entry.stream_hash);
                    last_hash = Some(entry.stream_hash);
                    seeded += 1;
                }
            }
            tracing::debug!(seeded, "stream-existence filter seeded from table index");
            index_checkpoint
        };

        let mut lease = pool.borrow().await?;
        lease.reposition(tail_from.max(0));
        loop {
            let result = lease.try_read_next().await?;
            if !result.success {
                break;
            }
            if let Some(LogRecord::Prepare(prepare)) = result.record {
                if prepare.is_committed() {
                    self.add_hash(format.stream_hash(&prepare.event_stream_id));
                }
            }
            self.set_checkpoint(result.post_position);
        }
        self.flush()
    }

    /// Populate from the persisted stream-name index. Used by the numeric
    /// log format, where the filter is name-keyed.
    pub async fn initialize_from_name_index<I>(
        &self,
        names: &I,
        index_checkpoint: i64,
    ) -> Result<()>
    where
        I: NameIndex + ?Sized,
    {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.checkpoint() < index_checkpoint {
            let mut seeded = 0u64;
            for name in names.enumerate_names() {
                self.add_name(&name);
                seeded += 1;
            }
            tracing::debug!(seeded, "stream-existence filter seeded from name index");
            self.set_checkpoint(index_checkpoint);
        }
        self.flush()
    }
}

fn fresh_filter(size_bytes: i64) -> FilterInner {
    let expected_items = ((size_bytes * 8) / BITS_PER_STREAM).max(1) as usize;
    FilterInner {
        bloom: Bloom::new(size_bytes as usize, expected_items),
        item_count: 0,
    }
}

// Blob layout:
//   [version u8][item_count u64][num_bits u64][num_hashes u32]
//   [sip_keys 4 x u64][bitmap][crc32 u32 over everything before it]
fn encode_blob(inner: &FilterInner) -> Vec<u8> {
    let bitmap = inner.bloom.bitmap();
    let sip_keys = inner.bloom.sip_keys();

    let mut blob = Vec::with_capacity(1 + 8 + 8 + 4 + 32 + bitmap.len() + 4);
    blob.push(BLOB_VERSION);
    blob.extend_from_slice(&inner.item_count.to_le_bytes());
    blob.extend_from_slice(&inner.bloom.number_of_bits().to_le_bytes());
    blob.extend_from_slice(&inner.bloom.number_of_hash_functions().to_le_bytes());
    for (k0, k1) in sip_keys {
        blob.extend_from_slice(&k0.to_le_bytes());
        blob.extend_from_slice(&k1.to_le_bytes());
    }
    blob.extend_from_slice(&bitmap);
    let crc = crc32fast::hash(&blob);
    blob.extend_from_slice(&crc.to_le_bytes());
    blob
}

fn decode_blob(bytes: &[u8]) -> Option<FilterInner> {
    const HEADER: usize = 1 + 8 + 8 + 4 + 32;
    if bytes.len() < HEADER + 4 {
        return None;
    }

    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().ok()?);
    if crc32fast::hash(payload) != stored_crc {
        return None;
    }

    if payload[0] != BLOB_VERSION {
        return None;
    }
    let item_count = u64::from_le_bytes(payload[1..9].try_into().ok()?);
    let num_bits = u64::from_le_bytes(payload[9..17].try_into().ok()?);
    let num_hashes = u32::from_le_bytes(payload[17..21].try_into().ok()?);
    let mut sip_keys = [(0u64, 0u64); 2];
    for (i, key) in sip_keys.iter_mut().enumerate() {
        let at = 21 + i * 16;
        key.0 = u64::from_le_bytes(payload[at..at + 8].try_into().ok()?);
        key.1 = u64::from_le_bytes(payload[at + 8..at + 16].try_into().ok()?);
    }
    let bitmap = &payload[HEADER..];
    if (bitmap.len() as u64) * 8 < num_bits {
        return None;
    }

    Some(FilterInner {
        bloom: Bloom::from_existing(bitmap, num_bits, num_hashes, sip_keys),
        item_count,
    })
}
