//! In-memory crawl-state store.
//!
//! Backed by a lock-free queue for claim order and concurrent maps for the
//! partitions. Suited to tests and small crawls; it survives run boundaries
//! only in-process, through its factory, which retains the partitions between
//! opens and applies the same rollover and recovery rules as the durable
//! store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::config::CrawlerConfig;
use crate::error::StoreError;
use crate::record::{CrawlRecord, Stage};
use crate::store::{CacheIter, CrawlStore, CrawlStoreFactory};

#[derive(Default)]
struct Partitions {
    /// Current-run records, keyed by full reference; the stage lives on the
    /// record.
    refs: DashMap<String, CrawlRecord>,
    /// Claim order over queued references.
    order: SegQueue<String>,
    /// Previous run's processed records.
    cached: DashMap<String, CrawlRecord>,
}

pub struct MemoryCrawlStore {
    parts: Arc<Partitions>,
    /// Serializes claims and stage transitions so the counters and the
    /// partitions move together.
    claim: Mutex<()>,
    queued: AtomicUsize,
    active: AtomicUsize,
    processed: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryCrawlStore {
    pub fn new() -> Self {
        Self::with_partitions(Arc::new(Partitions::default()))
    }

    fn with_partitions(parts: Arc<Partitions>) -> Self {
        // Recovery: anything left active by an interrupted run goes back to
        // queued, then the claim order and counters are rebuilt.
        while parts.order.pop().is_some() {}
        let mut queued = 0;
        let mut processed = 0;
        for mut entry in parts.refs.iter_mut() {
            match entry.stage {
                Stage::Active => {
                    entry.stage = Stage::Queued;
                }
                Stage::Queued => {}
                Stage::Processed => {
                    processed += 1;
                    continue;
                }
                Stage::Cached => continue,
            }
            queued += 1;
            parts.order.push(entry.key().clone());
        }
        MemoryCrawlStore {
            parts,
            claim: Mutex::new(()),
            queued: AtomicUsize::new(queued),
            active: AtomicUsize::new(0),
            processed: AtomicUsize::new(processed),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryCrawlStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlStore for MemoryCrawlStore {
    fn queue(&self, mut record: CrawlRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        let _guard = self.claim.lock();
        if self.parts.refs.contains_key(&record.reference) {
            trace!("reference already present this run, not re-queueing: {}", record.reference);
            return Ok(());
        }
        record.stage = Stage::Queued;
        self.parts.order.push(record.reference.clone());
        self.parts.refs.insert(record.reference.clone(), record);
        self.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_queued(&self) -> Result<Option<CrawlRecord>, StoreError> {
        self.ensure_open()?;
        let _guard = self.claim.lock();
        while let Some(reference) = self.parts.order.pop() {
            if let Some(mut entry) = self.parts.refs.get_mut(&reference) {
                if entry.stage == Stage::Queued {
                    entry.stage = Stage::Active;
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    self.active.fetch_add(1, Ordering::SeqCst);
                    return Ok(Some(entry.clone()));
                }
            }
        }
        Ok(None)
    }

    fn processed(&self, mut record: CrawlRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        let _guard = self.claim.lock();
        let prior = self
            .parts
            .refs
            .get(&record.reference)
            .map(|entry| entry.stage);
        record.stage = Stage::Processed;
        self.parts.refs.insert(record.reference.clone(), record);
        match prior {
            Some(Stage::Active) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            Some(Stage::Queued) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {}
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_cached(
        &self,
        reference: &str,
    ) -> Result<Option<CrawlRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.parts.cached.get(reference).map(|entry| entry.clone()))
    }

    fn cache_iter(&self) -> Result<CacheIter, StoreError> {
        self.ensure_open()?;
        // Snapshot at call time; the cached partition does not change during
        // a run, so this is equivalent to a live pass.
        let snapshot: Vec<CrawlRecord> = self
            .parts
            .cached
            .iter()
            .map(|entry| entry.clone())
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn queue_size(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    fn processed_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that keeps the partitions alive across opens, so run-boundary
/// semantics (cache rollover, resume carry-over) hold in-process.
#[derive(Default)]
pub struct MemoryStoreFactory {
    last: Mutex<Option<Arc<Partitions>>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrawlStoreFactory for MemoryStoreFactory {
    fn open(
        &self,
        _config: &CrawlerConfig,
        resume: bool,
    ) -> Result<Arc<dyn CrawlStore>, StoreError> {
        let mut last = self.last.lock();
        let parts = match (last.take(), resume) {
            (None, _) => Arc::new(Partitions::default()),
            (Some(prev), true) => prev,
            (Some(prev), false) => {
                let parts = Partitions::default();
                for entry in prev.refs.iter() {
                    if entry.stage == Stage::Processed {
                        let mut cached = entry.clone();
                        cached.stage = Stage::Cached;
                        parts.cached.insert(entry.key().clone(), cached);
                    }
                }
                Arc::new(parts)
            }
        };
        *last = Some(Arc::clone(&parts));
        Ok(Arc::new(MemoryCrawlStore::with_partitions(parts)))
    }
}
