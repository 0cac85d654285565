//! End-to-end engine scenarios, driven by a scripted plugin over the
//! in-memory store (and the sled store where durability matters).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crawler_core::prelude::*;
use crawler_core::store::{MemoryStoreFactory, SledStoreFactory};
use crawler_core::{
    CachedStreamFactory, CrawlStoreFactory, CrawlerConfig, CrawlerEvent, CrawlerEventKind,
    EventListener, Metadata, OrphansStrategy,
};

/// What the scripted importer pipeline does with one reference.
#[derive(Clone)]
enum RefOutcome {
    /// Successful import; the committer pipeline marks the record NEW.
    Import,
    /// Successful import carrying nested child responses.
    ImportWithChildren(Vec<String>),
    /// The importer rejected the document (unsuccessful response).
    RejectImport,
    /// The pipeline bailed before importing, leaving the given state.
    NoImport(CrawlState),
    /// The pipeline failed outright.
    Fail,
}

struct ScriptedPlugin {
    seeds: Vec<String>,
    outcomes: HashMap<String, RefOutcome>,
    default_outcome: RefOutcome,
    streams: CachedStreamFactory,
}

impl ScriptedPlugin {
    fn new(seeds: &[&str]) -> Self {
        ScriptedPlugin {
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
            outcomes: HashMap::new(),
            default_outcome: RefOutcome::Import,
            streams: CachedStreamFactory::new(),
        }
    }

    fn outcome(mut self, reference: &str, outcome: RefOutcome) -> Self {
        self.outcomes.insert(reference.to_string(), outcome);
        self
    }

    fn default_outcome(mut self, outcome: RefOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    fn response_for(&self, reference: &str) -> ImporterResponse {
        ImporterResponse::success(
            reference,
            CrawlDoc::new(reference, self.streams.new_stream_from(b"body".to_vec())),
        )
    }
}

#[async_trait]
impl CrawlerPlugin for ScriptedPlugin {
    async fn prepare(
        &self,
        store: &dyn CrawlStore,
        resume: bool,
    ) -> Result<(), CrawlError> {
        if !resume {
            for seed in &self.seeds {
                store.queue(CrawlRecord::root(seed))?;
            }
        }
        Ok(())
    }

    async fn execute_importer_pipeline(
        &self,
        ctx: ImporterContext<'_>,
    ) -> Result<Option<ImporterResponse>, CrawlError> {
        let reference = ctx.record.reference.clone();
        let outcome = self
            .outcomes
            .get(&reference)
            .unwrap_or(&self.default_outcome)
            .clone();
        match outcome {
            RefOutcome::Import => Ok(Some(self.response_for(&reference))),
            RefOutcome::ImportWithChildren(children) => {
                let mut response = self.response_for(&reference);
                for child in children {
                    response = response.with_child(self.response_for(&child));
                }
                Ok(Some(response))
            }
            RefOutcome::RejectImport => Ok(Some(ImporterResponse::rejected(
                reference,
                "unsupported content",
            ))),
            RefOutcome::NoImport(state) => {
                ctx.record.state = state;
                Ok(None)
            }
            RefOutcome::Fail => {
                Err(CrawlError::importer(anyhow::anyhow!("fetch blew up")))
            }
        }
    }
}

#[derive(Default)]
struct CommitterLog {
    upserts: Mutex<Vec<String>>,
    removes: Mutex<Vec<String>>,
    commits: AtomicUsize,
}

#[derive(Clone, Default)]
struct RecordingCommitter {
    log: Arc<CommitterLog>,
}

#[async_trait]
impl Committer for RecordingCommitter {
    async fn upsert(
        &self,
        reference: &str,
        _doc: &CrawlDoc,
    ) -> Result<(), CrawlError> {
        self.log.upserts.lock().unwrap().push(reference.to_string());
        Ok(())
    }

    async fn remove(
        &self,
        reference: &str,
        _metadata: &Metadata,
    ) -> Result<(), CrawlError> {
        self.log.removes.lock().unwrap().push(reference.to_string());
        Ok(())
    }

    async fn commit(&self) -> Result<(), CrawlError> {
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingListener {
    events: Arc<Mutex<Vec<CrawlerEvent>>>,
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &CrawlerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl RecordingListener {
    fn kinds(&self) -> Vec<CrawlerEventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    fn count(&self, kind: CrawlerEventKind) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }

    fn records_for(&self, kind: CrawlerEventKind) -> Vec<CrawlRecord> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| e.crawl_data.clone())
            .collect()
    }
}

fn work_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().unwrap()
}

/// Opt into log output with RUST_LOG=crawler_core=debug.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_processes_every_seed() {
    init_tracing();
    let factory = Arc::new(MemoryStoreFactory::new());
    let committer = RecordingCommitter::default();
    let listener = RecordingListener::default();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["a", "b", "c"]))
        .id("happy")
        .work_dir(dir.path())
        .num_threads(2)
        .store_factory(Arc::clone(&factory))
        .committer(committer.clone())
        .add_listener(listener.clone())
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 3);
    let mut upserts = committer.log.upserts.lock().unwrap().clone();
    upserts.sort();
    assert_eq!(upserts, ["a", "b", "c"]);
    assert_eq!(committer.log.commits.load(Ordering::SeqCst), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerFinished), 1);
    assert_eq!(listener.count(CrawlerEventKind::DocumentImported), 3);
    for rec in listener.records_for(CrawlerEventKind::DocumentImported) {
        assert!(rec.is_root_parent);
    }
}

#[tokio::test]
async fn max_documents_caps_processing_and_keeps_the_rest_queued() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let seeds: Vec<String> = (0..10).map(|i| format!("ref-{i}")).collect();
    let seed_refs: Vec<&str> = seeds.iter().map(String::as_str).collect();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&seed_refs))
        .id("capped")
        .work_dir(dir.path())
        .max_documents(3)
        .store_factory(Arc::clone(&factory))
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 3);

    // the remaining references survive for resume
    let store = factory.open(&CrawlerConfig::default(), true).unwrap();
    assert_eq!(store.queue_size(), 7);
}

#[tokio::test]
async fn orphan_delete_removes_everything_not_reseen() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let dir = work_dir();

    // first run commits x and y
    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["x", "y"]))
        .id("orphans")
        .work_dir(dir.path())
        .store_factory(Arc::clone(&factory))
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    // second run sees neither; strategy DELETE
    let committer = RecordingCommitter::default();
    let listener = RecordingListener::default();
    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&[]))
        .id("orphans")
        .work_dir(dir.path())
        .orphans_strategy(OrphansStrategy::Delete)
        .store_factory(Arc::clone(&factory))
        .committer(committer.clone())
        .add_listener(listener.clone())
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    let mut removes = committer.log.removes.lock().unwrap().clone();
    removes.sort();
    assert_eq!(removes, ["x", "y"]);
    let deleted = listener.records_for(CrawlerEventKind::DocumentCommittedRemove);
    assert_eq!(deleted.len(), 2);
    for rec in deleted {
        assert_eq!(rec.state, CrawlState::Deleted);
    }
}

#[tokio::test]
async fn orphan_reprocess_runs_cache_entries_again() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["a", "b"]))
        .id("reprocess")
        .work_dir(dir.path())
        .store_factory(Arc::clone(&factory))
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    let committer = RecordingCommitter::default();
    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&[]))
        .id("reprocess")
        .work_dir(dir.path())
        .orphans_strategy(OrphansStrategy::Process)
        .store_factory(Arc::clone(&factory))
        .committer(committer.clone())
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    let mut upserts = committer.log.upserts.lock().unwrap().clone();
    upserts.sort();
    assert_eq!(upserts, ["a", "b"]);
    assert_eq!(crawler.stats().processed_count(), 2);
}

#[tokio::test]
async fn grace_once_spares_a_reference_for_one_run() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let dir = work_dir();

    // run 1: r ingests cleanly
    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["r"]))
        .id("grace")
        .work_dir(dir.path())
        .store_factory(Arc::clone(&factory))
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    // run 2: r comes back with a bad status; prior state was good, so it is
    // graced and nothing is removed
    let committer = RecordingCommitter::default();
    let crawler = CrawlerBuilder::new(
        ScriptedPlugin::new(&["r"])
            .outcome("r", RefOutcome::NoImport(CrawlState::BadStatus)),
    )
    .id("grace")
    .work_dir(dir.path())
    .store_factory(Arc::clone(&factory))
    .committer(committer.clone())
    .build()
    .unwrap();
    crawler.start().await.unwrap();
    assert!(committer.log.removes.lock().unwrap().is_empty());

    // run 3: still bad; the grace is spent and the delete goes through
    let committer = RecordingCommitter::default();
    let crawler = CrawlerBuilder::new(
        ScriptedPlugin::new(&["r"])
            .outcome("r", RefOutcome::NoImport(CrawlState::BadStatus)),
    )
    .id("grace")
    .work_dir(dir.path())
    .store_factory(Arc::clone(&factory))
    .committer(committer.clone())
    .build()
    .unwrap();
    crawler.start().await.unwrap();
    assert_eq!(*committer.log.removes.lock().unwrap(), ["r"]);
}

#[tokio::test]
async fn embedded_children_get_their_own_records() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let committer = RecordingCommitter::default();
    let listener = RecordingListener::default();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["parent"]).outcome(
        "parent",
        RefOutcome::ImportWithChildren(vec!["c1".to_string(), "c2".to_string()]),
    ))
    .id("embedded")
    .work_dir(dir.path())
    .store_factory(Arc::clone(&factory))
    .committer(committer.clone())
    .add_listener(listener.clone())
    .build()
    .unwrap();
    crawler.start().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 3);
    let mut upserts = committer.log.upserts.lock().unwrap().clone();
    upserts.sort();
    assert_eq!(upserts, ["c1", "c2", "parent"]);

    let imported = listener.records_for(CrawlerEventKind::DocumentImported);
    assert_eq!(imported.len(), 3);
    for rec in imported.iter().filter(|r| r.reference != "parent") {
        assert_eq!(rec.parent_root_reference.as_deref(), Some("parent"));
    }
}

#[tokio::test]
async fn rejected_import_is_not_an_error() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let committer = RecordingCommitter::default();
    let listener = RecordingListener::default();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(
        ScriptedPlugin::new(&["ok", "nope"])
            .outcome("nope", RefOutcome::RejectImport),
    )
    .id("rejects")
    .work_dir(dir.path())
    .store_factory(Arc::clone(&factory))
    .committer(committer.clone())
    .add_listener(listener.clone())
    .build()
    .unwrap();
    crawler.start().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 2);
    assert_eq!(*committer.log.upserts.lock().unwrap(), ["ok"]);
    assert_eq!(listener.count(CrawlerEventKind::RejectedImport), 1);
    assert_eq!(listener.count(CrawlerEventKind::RejectedError), 0);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerFinished), 1);
}

#[tokio::test]
async fn stop_on_listed_error_kind_halts_the_pool() {
    init_tracing();
    let factory = Arc::new(MemoryStoreFactory::new());
    let listener = RecordingListener::default();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(
        ScriptedPlugin::new(&["a", "bad", "c", "d"])
            .outcome("bad", RefOutcome::Fail),
    )
    .id("fatal")
    .work_dir(dir.path())
    .stop_on(ErrorKind::Importer)
    .store_factory(Arc::clone(&factory))
    .add_listener(listener.clone())
    .build()
    .unwrap();
    crawler.start().await.unwrap();

    assert!(crawler.is_stopped());
    // the failing reference is still finalized before the pool stops
    assert_eq!(crawler.stats().processed_count(), 2);
    assert_eq!(listener.count(CrawlerEventKind::RejectedError), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerStopping), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerStopped), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerFinished), 0);

    // the untouched queue survives for resume
    let store = factory.open(&CrawlerConfig::default(), true).unwrap();
    assert_eq!(store.queue_size(), 2);
}

#[tokio::test]
async fn unlisted_error_kind_only_marks_the_reference() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let listener = RecordingListener::default();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(
        ScriptedPlugin::new(&["a", "bad", "c"])
            .outcome("bad", RefOutcome::Fail),
    )
    .id("nonfatal")
    .work_dir(dir.path())
    .store_factory(Arc::clone(&factory))
    .add_listener(listener.clone())
    .build()
    .unwrap();
    crawler.start().await.unwrap();

    assert!(!crawler.is_stopped());
    assert_eq!(crawler.stats().processed_count(), 3);
    assert_eq!(listener.count(CrawlerEventKind::RejectedError), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerFinished), 1);
}

#[tokio::test]
async fn empty_queue_finishes_without_committing_documents() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let committer = RecordingCommitter::default();
    let listener = RecordingListener::default();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&[]))
        .id("empty")
        .work_dir(dir.path())
        .store_factory(Arc::clone(&factory))
        .committer(committer.clone())
        .add_listener(listener.clone())
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 0);
    assert!(committer.log.upserts.lock().unwrap().is_empty());
    assert_eq!(committer.log.commits.load(Ordering::SeqCst), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerFinished), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wide_pool_processes_every_reference_exactly_once() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let committer = RecordingCommitter::default();
    let seeds: Vec<String> = (0..100).map(|i| format!("ref-{i:03}")).collect();
    let seed_refs: Vec<&str> = seeds.iter().map(String::as_str).collect();
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&seed_refs))
        .id("wide")
        .work_dir(dir.path())
        .num_threads(4)
        .store_factory(Arc::clone(&factory))
        .committer(committer.clone())
        .build()
        .unwrap();
    crawler.start().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 100);
    let mut upserts = committer.log.upserts.lock().unwrap().clone();
    upserts.sort();
    upserts.dedup();
    assert_eq!(upserts.len(), 100);
}

#[tokio::test]
async fn long_references_survive_the_durable_store() {
    let dir = work_dir();
    let store_path = dir.path().join("store");
    let long_ref = format!("https://example.com/{}", "q".repeat(2000));

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&[&long_ref]))
        .id("long")
        .work_dir(dir.path())
        .store_factory(SledStoreFactory::at(&store_path))
        .build()
        .unwrap();
    crawler.start().await.unwrap();
    assert_eq!(crawler.stats().processed_count(), 1);

    // a fresh open rolls the processed record into the cache; lookup by the
    // full reference returns the full reference
    let store = SledStoreFactory::at(&store_path)
        .open(&CrawlerConfig::default(), false)
        .unwrap();
    let cached = store.get_cached(&long_ref).unwrap().unwrap();
    assert_eq!(cached.reference, long_ref);
    assert_eq!(cached.state, CrawlState::New);
}

#[tokio::test]
async fn resumed_run_continues_the_processed_count() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let dir = work_dir();

    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["a", "b", "c", "d"]))
        .id("resumable")
        .work_dir(dir.path())
        .max_documents(2)
        .store_factory(Arc::clone(&factory))
        .build()
        .unwrap();
    crawler.start().await.unwrap();
    assert_eq!(crawler.stats().processed_count(), 2);

    // resume without the cap: the leftover queue drains and the count picks
    // up where it stopped
    let listener = RecordingListener::default();
    let crawler = CrawlerBuilder::new(ScriptedPlugin::new(&["a", "b", "c", "d"]))
        .id("resumable")
        .work_dir(dir.path())
        .store_factory(Arc::clone(&factory))
        .add_listener(listener.clone())
        .build()
        .unwrap();
    crawler.resume().await.unwrap();

    assert_eq!(crawler.stats().processed_count(), 4);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerResumed), 1);
    assert_eq!(listener.count(CrawlerEventKind::CrawlerStarted), 0);
}
