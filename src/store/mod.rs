//! # Crawl-State Store Module
//!
//! Defines the [`CrawlStore`] contract and its two implementations.
//!
//! ## Overview
//!
//! The store is a durable multi-set of [`CrawlRecord`]s partitioned by
//! [`Stage`], with reference-keyed access. It is both the producer and the
//! consumer side of the worker pool: references enter through [`queue`],
//! workers claim them with [`next_queued`], and finished records land in the
//! processed partition through [`processed`]. A fourth, read-only partition
//! holds the previous run's processed records (the cache).
//!
//! ## Contract
//!
//! - `queue` is idempotent: a reference that already has a current-run
//!   record, in any stage, is a no-op. This is what makes re-submission safe
//!   and guarantees a reference is processed at most once per run.
//! - `next_queued` is the sole claim point: it atomically moves one record
//!   from queued to active and hands it to exactly one caller. Concurrent
//!   callers never receive the same record.
//! - `processed` moves the claimed record to the processed partition,
//!   overwriting its fields with the final record.
//! - The cached partition is never mutated during a run. On a fresh open,
//!   the previous run's processed partition becomes the new cache; on a
//!   resumed open, queued and active records carry over and every active
//!   record is reclassified as queued before workers start.
//!
//! [`queue`]: CrawlStore::queue
//! [`next_queued`]: CrawlStore::next_queued
//! [`processed`]: CrawlStore::processed

mod memory;
mod sled_store;

pub use memory::{MemoryCrawlStore, MemoryStoreFactory};
pub use sled_store::{SledCrawlStore, SledStoreFactory};

use sha2::{Digest, Sha256};

use crate::config::CrawlerConfig;
use crate::error::StoreError;
use crate::record::CrawlRecord;

/// Longest key a store may index. Longer references are stored under a
/// hash-suffixed truncation; the record itself always carries the full
/// reference.
pub const MAX_KEY_LENGTH: usize = 1024;

const KEY_HASH_MARKER: u8 = b'!';
const KEY_HASH_LENGTH: usize = 16;

/// Derives the store key for a reference, truncating with a hash suffix when
/// the reference exceeds [`MAX_KEY_LENGTH`]. Lookups by full reference always
/// succeed because the same derivation is applied on both sides.
pub fn reference_key(reference: &str) -> Vec<u8> {
    let bytes = reference.as_bytes();
    if bytes.len() <= MAX_KEY_LENGTH {
        return bytes.to_vec();
    }
    let digest = Sha256::digest(bytes);
    let mut hash = String::with_capacity(KEY_HASH_LENGTH);
    for byte in digest.iter().take(KEY_HASH_LENGTH / 2) {
        hash.push_str(&format!("{byte:02x}"));
    }
    let prefix_len = MAX_KEY_LENGTH - 1 - KEY_HASH_LENGTH;
    let mut key = Vec::with_capacity(MAX_KEY_LENGTH);
    key.extend_from_slice(&bytes[..prefix_len]);
    key.push(KEY_HASH_MARKER);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// A lazy, restartable pass over the cached partition.
pub type CacheIter =
    Box<dyn Iterator<Item = Result<CrawlRecord, StoreError>> + Send>;

/// Durable four-stage store of per-reference records.
///
/// All mutations go through this API; internal locking is the store's
/// concern. Implementations must document the atomicity of the
/// `next_queued` claim.
pub trait CrawlStore: Send + Sync {
    /// Places a record in the queued partition. No-op when the reference
    /// already has a current-run record in any stage.
    fn queue(&self, record: CrawlRecord) -> Result<(), StoreError>;

    /// Atomically claims one queued record, moving it to active.
    fn next_queued(&self) -> Result<Option<CrawlRecord>, StoreError>;

    /// Moves the claimed record to the processed partition.
    fn processed(&self, record: CrawlRecord) -> Result<(), StoreError>;

    /// Returns the previous run's snapshot for a reference, if any. Never
    /// returns current-run records.
    fn get_cached(&self, reference: &str)
        -> Result<Option<CrawlRecord>, StoreError>;

    /// Streams the entire cached partition. Stable under concurrent writes
    /// to the other partitions; restartable by calling again.
    fn cache_iter(&self) -> Result<CacheIter, StoreError>;

    fn active_count(&self) -> usize;

    fn queue_size(&self) -> usize;

    fn is_queue_empty(&self) -> bool {
        self.queue_size() == 0
    }

    /// Records written to the processed partition this run.
    fn processed_count(&self) -> usize;

    /// Flushes and closes; subsequent operations fail with
    /// [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}

/// Opens or creates the crawl-state store for a run.
pub trait CrawlStoreFactory: Send + Sync {
    /// On a fresh run (`resume == false`) the previous run's processed
    /// records roll into the cache and the current side is emptied. On
    /// resume, queued and active records carry over, with every stranded
    /// active record reclassified as queued.
    fn open(
        &self,
        config: &CrawlerConfig,
        resume: bool,
    ) -> Result<std::sync::Arc<dyn CrawlStore>, StoreError>;
}

impl<T: CrawlStoreFactory + ?Sized> CrawlStoreFactory for std::sync::Arc<T> {
    fn open(
        &self,
        config: &CrawlerConfig,
        resume: bool,
    ) -> Result<std::sync::Arc<dyn CrawlStore>, StoreError> {
        (**self).open(config, resume)
    }
}

pub(crate) fn encode_record(record: &CrawlRecord) -> Result<Vec<u8>, StoreError> {
    Ok(rmp_serde::to_vec(record)?)
}

pub(crate) fn decode_record(bytes: &[u8]) -> Result<CrawlRecord, StoreError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
