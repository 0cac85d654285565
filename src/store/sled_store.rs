//! Durable crawl-state store backed by sled.
//!
//! Layout: three trees. `refs` holds the current run's records keyed by the
//! (possibly truncated) reference key; the stage lives on the record. `queue`
//! is a claim-order index mapping a monotonic sequence number to a reference
//! key, giving first-in-first-out fairness. `cached` holds the previous run's
//! processed records.
//!
//! Claim atomicity: `next_queued` pops the head of the claim index and flips
//! the record's stage under a process-wide claim mutex, so concurrent callers
//! never receive the same record. A crash between the two writes at worst
//! leaves a record queued without an index entry; opening the store rebuilds
//! the index from the `refs` tree, so nothing is lost (the same scan also
//! reclassifies stranded active records back to queued).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::CrawlerConfig;
use crate::error::StoreError;
use crate::record::{CrawlRecord, Stage};
use crate::store::{
    decode_record, encode_record, reference_key, CacheIter, CrawlStore,
    CrawlStoreFactory,
};

const CACHE_READ_CAPACITY: u64 = 10_000;

pub struct SledCrawlStore {
    db: sled::Db,
    refs: sled::Tree,
    queue: sled::Tree,
    cached: sled::Tree,
    /// Read-through cache in front of the cached tree; safe because the
    /// cached partition never changes during a run.
    cache_reads: Cache<String, CrawlRecord>,
    claim: Mutex<()>,
    seq: AtomicU64,
    queued: AtomicUsize,
    active: AtomicUsize,
    processed: AtomicUsize,
    closed: AtomicBool,
}

impl SledCrawlStore {
    pub fn open(
        path: impl Into<PathBuf>,
        resume: bool,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        debug!("opening crawl store at {:?} (resume: {resume})", path);
        let db = sled::open(&path)?;
        let refs = db.open_tree("refs")?;
        let queue = db.open_tree("queue")?;
        let cached = db.open_tree("cached")?;

        if !resume {
            Self::roll_over(&refs, &queue, &cached)?;
        }
        let queued = Self::recover(&refs, &queue)?;

        let mut processed = 0;
        for kv in refs.iter() {
            let (_, value) = kv?;
            if decode_record(&value)?.stage == Stage::Processed {
                processed += 1;
            }
        }

        Ok(SledCrawlStore {
            db,
            refs,
            queue,
            cached,
            cache_reads: Cache::builder()
                .max_capacity(CACHE_READ_CAPACITY)
                .build(),
            claim: Mutex::new(()),
            seq: AtomicU64::new(queued as u64),
            queued: AtomicUsize::new(queued),
            active: AtomicUsize::new(0),
            processed: AtomicUsize::new(processed),
            closed: AtomicBool::new(false),
        })
    }

    /// Fresh run: the previous run's processed records become the new cache
    /// wholesale; the current side is emptied.
    fn roll_over(
        refs: &sled::Tree,
        queue: &sled::Tree,
        cached: &sled::Tree,
    ) -> Result<(), StoreError> {
        cached.clear()?;
        let mut rolled = Vec::new();
        for kv in refs.iter() {
            let (key, value) = kv?;
            let mut record = decode_record(&value)?;
            if record.stage == Stage::Processed {
                record.stage = Stage::Cached;
                rolled.push((key, encode_record(&record)?));
            }
        }
        for (key, value) in rolled {
            cached.insert(key, value)?;
        }
        refs.clear()?;
        queue.clear()?;
        Ok(())
    }

    /// Rebuilds the claim index from the refs tree, reclassifying stranded
    /// active records as queued. Returns the queued count.
    fn recover(
        refs: &sled::Tree,
        queue: &sled::Tree,
    ) -> Result<usize, StoreError> {
        queue.clear()?;
        let mut requeued: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
        for kv in refs.iter() {
            let (key, value) = kv?;
            let mut record = decode_record(&value)?;
            match record.stage {
                Stage::Active => {
                    record.stage = Stage::Queued;
                    requeued.push((key.to_vec(), Some(encode_record(&record)?)));
                }
                Stage::Queued => requeued.push((key.to_vec(), None)),
                _ => {}
            }
        }
        let count = requeued.len();
        for (seq, (key, rewrite)) in requeued.into_iter().enumerate() {
            if let Some(value) = rewrite {
                refs.insert(&key, value)?;
            }
            queue.insert((seq as u64).to_be_bytes(), key)?;
        }
        Ok(count)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl CrawlStore for SledCrawlStore {
    fn queue(&self, mut record: CrawlRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = reference_key(&record.reference);
        let _guard = self.claim.lock();
        if self.refs.contains_key(&key)? {
            trace!("reference already present this run, not re-queueing: {}", record.reference);
            return Ok(());
        }
        record.stage = Stage::Queued;
        self.refs.insert(&key, encode_record(&record)?)?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.queue.insert(seq.to_be_bytes(), key.as_slice())?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_queued(&self) -> Result<Option<CrawlRecord>, StoreError> {
        self.ensure_open()?;
        let _guard = self.claim.lock();
        while let Some((_, key)) = self.queue.pop_min()? {
            let Some(value) = self.refs.get(&key)? else {
                continue;
            };
            let mut record = decode_record(&value)?;
            if record.stage != Stage::Queued {
                // stale index entry left behind by an overwrite
                continue;
            }
            record.stage = Stage::Active;
            self.refs.insert(&key, encode_record(&record)?)?;
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.active.fetch_add(1, Ordering::SeqCst);
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn processed(&self, mut record: CrawlRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = reference_key(&record.reference);
        let _guard = self.claim.lock();
        let prior = match self.refs.get(&key)? {
            Some(value) => Some(decode_record(&value)?.stage),
            None => None,
        };
        record.stage = Stage::Processed;
        self.refs.insert(&key, encode_record(&record)?)?;
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
        if let Some(hit) = self.cache_reads.get(reference) {
            return Ok(Some(hit));
        }
        let Some(value) = self.cached.get(reference_key(reference))? else {
            return Ok(None);
        };
        let record = decode_record(&value)?;
        self.cache_reads
            .insert(reference.to_string(), record.clone());
        Ok(Some(record))
    }

    fn cache_iter(&self) -> Result<CacheIter, StoreError> {
        self.ensure_open()?;
        Ok(Box::new(self.cached.iter().map(|kv| {
            let (_, value) = kv?;
            decode_record(&value)
        })))
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
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }
}

/// Opens a [`SledCrawlStore`] under the crawler's work directory (or an
/// explicit path).
#[derive(Debug, Default)]
pub struct SledStoreFactory {
    path: Option<PathBuf>,
}

impl SledStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        SledStoreFactory {
            path: Some(path.into()),
        }
    }
}

impl CrawlStoreFactory for SledStoreFactory {
    fn open(
        &self,
        config: &CrawlerConfig,
        resume: bool,
    ) -> Result<Arc<dyn CrawlStore>, StoreError> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| config.work_dir.join("crawlstore").join(&config.id));
        Ok(Arc::new(SledCrawlStore::open(path, resume)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn claim_then_process_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SledCrawlStore::open(dir.path().join("db"), false).unwrap();

        let mut rec = CrawlRecord::root("a");
        rec.content_type = Some("text/html".to_string());
        store.queue(rec.clone()).unwrap();
        store.queue(rec).unwrap(); // no-op
        assert_eq!(store.queue_size(), 1);

        let claimed = store.next_queued().unwrap().unwrap();
        assert_eq!(claimed.stage, Stage::Active);
        assert_eq!(store.active_count(), 1);
        assert!(store.next_queued().unwrap().is_none());

        store.processed(claimed).unwrap();
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.processed_count(), 1);
    }

    #[test]
    fn long_reference_round_trips_in_full() {
        let dir = TempDir::new().unwrap();
        let long_ref = format!("https://example.com/{}", "p".repeat(2000));
        {
            let store =
                SledCrawlStore::open(dir.path().join("db"), false).unwrap();
            store.queue(CrawlRecord::new(long_ref.clone())).unwrap();
            let rec = store.next_queued().unwrap().unwrap();
            assert_eq!(rec.reference, long_ref);
            store.processed(rec).unwrap();
            store.close().unwrap();
        }
        let store = SledCrawlStore::open(dir.path().join("db"), false).unwrap();
        let cached = store.get_cached(&long_ref).unwrap().unwrap();
        assert_eq!(cached.reference, long_ref);
        assert_eq!(cached.stage, Stage::Cached);
    }

    #[test]
    fn resume_reclassifies_stranded_active_records() {
        let dir = TempDir::new().unwrap();
        {
            let store =
                SledCrawlStore::open(dir.path().join("db"), false).unwrap();
            store.queue(CrawlRecord::new("a")).unwrap();
            store.queue(CrawlRecord::new("b")).unwrap();
            store.queue(CrawlRecord::new("c")).unwrap();
            let claimed = store.next_queued().unwrap().unwrap();
            store.processed(claimed).unwrap();
            let _stranded = store.next_queued().unwrap().unwrap();
            // no close: simulates a hard kill with one record active
        }
        let store = SledCrawlStore::open(dir.path().join("db"), true).unwrap();
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.queue_size(), 2);
        assert_eq!(store.processed_count(), 1);
    }

    #[test]
    fn fresh_open_replaces_cache_wholesale() {
        let dir = TempDir::new().unwrap();
        {
            let store =
                SledCrawlStore::open(dir.path().join("db"), false).unwrap();
            store.queue(CrawlRecord::new("old")).unwrap();
            let rec = store.next_queued().unwrap().unwrap();
            store.processed(rec).unwrap();
            store.close().unwrap();
        }
        {
            let store =
                SledCrawlStore::open(dir.path().join("db"), false).unwrap();
            assert!(store.get_cached("old").unwrap().is_some());
            store.queue(CrawlRecord::new("new")).unwrap();
            let rec = store.next_queued().unwrap().unwrap();
            store.processed(rec).unwrap();
            store.close().unwrap();
        }
        let store = SledCrawlStore::open(dir.path().join("db"), false).unwrap();
        assert!(store.get_cached("old").unwrap().is_none());
        assert!(store.get_cached("new").unwrap().is_some());
        let refs: Vec<String> = store
            .cache_iter()
            .unwrap()
            .map(|r| r.unwrap().reference)
            .collect();
        assert_eq!(refs, ["new"]);
    }

    #[test]
    fn claim_order_is_first_in_first_out() {
        let dir = TempDir::new().unwrap();
        let store = SledCrawlStore::open(dir.path().join("db"), false).unwrap();
        for name in ["a", "b", "c"] {
            store.queue(CrawlRecord::new(name)).unwrap();
        }
        let order: Vec<String> =
            std::iter::from_fn(|| store.next_queued().unwrap())
                .map(|r| r.reference)
                .collect();
        assert_eq!(order, ["a", "b", "c"]);
    }
}
