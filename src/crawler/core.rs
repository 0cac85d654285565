//! The top-level crawler orchestrator.
//!
//! Owns the run lifecycle: work directory, store open/close, lifecycle
//! events, the main worker-pool pass, orphan reconciliation, the single
//! committer flush, and cleanup. The crawler itself is protocol-agnostic;
//! everything reference-specific happens in the plugin it carries.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::CrawlerConfig;
use crate::crawler::{orphans, worker};
use crate::document::CachedStreamFactory;
use crate::error::CrawlError;
use crate::events::{CrawlerEvent, CrawlerEventKind, EventManager};
use crate::plugin::{Committer, CrawlerPlugin, ProcessContext};
use crate::record::{CrawlRecord, CrawlState};
use crate::spoil::{
    SpoiledReferenceStrategizer, SpoiledStrategy, DEFAULT_FALLBACK_STRATEGY,
};
use crate::stats::{StatCollector, StatusReporter};
use crate::store::{CrawlStore, CrawlStoreFactory};

pub(crate) struct CrawlerInner<P> {
    pub(crate) config: CrawlerConfig,
    pub(crate) plugin: P,
    pub(crate) store_factory: Arc<dyn CrawlStoreFactory>,
    pub(crate) committer: Option<Arc<dyn Committer>>,
    pub(crate) spoil: Arc<dyn SpoiledReferenceStrategizer>,
    pub(crate) events: EventManager,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) status: Arc<dyn StatusReporter>,
    pub(crate) streams: CachedStreamFactory,
    stopped: AtomicBool,
}

impl<P: CrawlerPlugin> CrawlerInner<P> {
    pub(crate) fn id(&self) -> &str {
        &self.config.id
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Requests a cooperative stop. Workers exit at the next reference
    /// boundary; in-flight references finish normally.
    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.fire(CrawlerEventKind::CrawlerStopping, None, None);
            info!("{}: stopping the crawler", self.id());
        }
    }

    pub(crate) fn fire(
        &self,
        kind: CrawlerEventKind,
        crawl_data: Option<CrawlRecord>,
        subject: Option<String>,
    ) {
        match kind {
            CrawlerEventKind::DocumentImported => self.stats.increment_imported(),
            CrawlerEventKind::RejectedImport => self.stats.increment_rejected(),
            CrawlerEventKind::RejectedError => self.stats.increment_errored(),
            CrawlerEventKind::DocumentCommittedRemove => {
                self.stats.increment_deleted()
            }
            _ => {}
        }
        self.events.fire(CrawlerEvent::new(kind, crawl_data, subject));
    }

    pub(crate) fn is_max_documents(&self) -> bool {
        self.config.max_documents > -1
            && self.stats.processed_count() as i64 >= self.config.max_documents
    }

    pub(crate) fn stops_on(&self, err: &CrawlError) -> bool {
        self.config.stop_on_errors.contains(&err.kind())
    }

    pub(crate) fn resolve_spoiled_strategy(
        &self,
        reference: &str,
        state: CrawlState,
    ) -> SpoiledStrategy {
        self.spoil
            .resolve(reference, state)
            .unwrap_or(DEFAULT_FALLBACK_STRATEGY)
    }
}

/// Orchestrates one crawler instance over its plugin, store and committer.
///
/// Constructed through [`crate::builder::CrawlerBuilder`]. A crawler can be
/// started fresh with [`Crawler::start`] or continued after an interruption
/// with [`Crawler::resume`]; either way the store keeps the outcome for the
/// next run's cache.
pub struct Crawler<P: CrawlerPlugin> {
    inner: Arc<CrawlerInner<P>>,
}

impl<P: CrawlerPlugin> std::fmt::Debug for Crawler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler").field("id", &self.id()).finish()
    }
}

impl<P: CrawlerPlugin> Crawler<P> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: CrawlerConfig,
        plugin: P,
        store_factory: Arc<dyn CrawlStoreFactory>,
        committer: Option<Arc<dyn Committer>>,
        spoil: Arc<dyn SpoiledReferenceStrategizer>,
        events: EventManager,
        status: Arc<dyn StatusReporter>,
    ) -> Self {
        Crawler {
            inner: Arc::new(CrawlerInner {
                config,
                plugin,
                store_factory,
                committer,
                spoil,
                events,
                stats: Arc::new(StatCollector::new()),
                status,
                streams: CachedStreamFactory::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.inner.stats)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Requests a cooperative stop; effective at the next reference boundary.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Runs a fresh crawl: the previous run's processed records become this
    /// run's cache.
    pub async fn start(&self) -> Result<(), CrawlError> {
        self.do_execute(false).await
    }

    /// Continues an interrupted crawl: queued and stranded-active references
    /// carry over.
    pub async fn resume(&self) -> Result<(), CrawlError> {
        self.do_execute(true).await
    }

    async fn do_execute(&self, resume: bool) -> Result<(), CrawlError> {
        let inner = &self.inner;
        if inner.config.id.trim().is_empty() {
            return Err(CrawlError::Config(
                "crawler must be given a unique identifier (id)".to_string(),
            ));
        }
        std::fs::create_dir_all(&inner.config.work_dir).map_err(|e| {
            CrawlError::Config(format!(
                "cannot create working directory {:?}: {e}",
                inner.config.work_dir
            ))
        })?;

        let started = Instant::now();
        let store: Arc<dyn CrawlStore> =
            inner.store_factory.open(&inner.config, resume)?;
        inner.stats.prime_processed(store.processed_count());

        #[cfg(feature = "monitoring")]
        if crate::monitor::monitoring_enabled() {
            crate::monitor::register(Arc::new(crate::monitor::CrawlerMonitor::new(
                inner.id(),
                Arc::clone(&store),
                Arc::clone(&inner.stats),
            )));
        }

        let result = self.run_crawl(&store, resume).await;

        info!(
            "{}: crawler executed in {:?}",
            inner.id(),
            started.elapsed()
        );
        let cleanup = inner.plugin.cleanup(store.as_ref()).await;
        #[cfg(feature = "monitoring")]
        crate::monitor::deregister(inner.id());
        let close = store.close();

        result.and(cleanup).and(close.map_err(CrawlError::from))
    }

    async fn run_crawl(
        &self,
        store: &Arc<dyn CrawlStore>,
        resume: bool,
    ) -> Result<(), CrawlError> {
        let inner = &self.inner;
        inner.plugin.prepare(store.as_ref(), resume).await?;
        if resume {
            inner.fire(CrawlerEventKind::CrawlerResumed, None, None);
        } else {
            inner.fire(CrawlerEventKind::CrawlerStarted, None, None);
        }
        inner.stats.touch_status_clock();
        self.execute(store).await
    }

    async fn execute(
        &self,
        store: &Arc<dyn CrawlStore>,
    ) -> Result<(), CrawlError> {
        let inner = &self.inner;

        info!("{}: crawling references...", inner.id());
        worker::run_pool(&self.inner, store, ProcessContext::NORMAL).await;

        if !inner.is_stopped() {
            orphans::handle_orphans(&self.inner, store).await?;
        }

        if let Some(committer) = &inner.committer {
            info!(
                "{}: crawler {}: committing documents",
                inner.id(),
                if inner.is_stopped() { "stopping" } else { "finishing" }
            );
            committer.commit().await?;
        }

        info!(
            "{}: {} reference(s) processed",
            inner.id(),
            inner.stats.processed_count()
        );

        debug!("{}: removing empty directories", inner.id());
        if let Err(err) = remove_empty_dirs(&inner.config.download_dir()) {
            error!(
                "{}: could not remove empty download directories: {err}",
                inner.id()
            );
        }

        if !inner.is_stopped() {
            inner.fire(CrawlerEventKind::CrawlerFinished, None, None);
            info!("{}: crawler completed", inner.id());
        } else {
            inner.fire(CrawlerEventKind::CrawlerStopped, None, None);
            info!("{}: crawler stopped", inner.id());
        }
        Ok(())
    }
}

/// Recursively removes directories that hold no files, the download area's
/// own root included.
fn remove_empty_dirs(dir: &Path) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            remove_empty_dirs(&path)?;
        }
    }
    if std::fs::read_dir(dir)?.next().is_none() {
        std::fs::remove_dir(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dir_trees_are_removed() {
        let root = tempfile::TempDir::new().unwrap();
        let downloads = root.path().join("downloads");
        std::fs::create_dir_all(downloads.join("a/b/c")).unwrap();
        std::fs::create_dir_all(downloads.join("kept")).unwrap();
        std::fs::write(downloads.join("kept/file.bin"), b"x").unwrap();

        remove_empty_dirs(&downloads).unwrap();

        assert!(!downloads.join("a").exists());
        assert!(downloads.join("kept/file.bin").exists());
        assert!(downloads.exists());
    }

    #[test]
    fn missing_dir_is_fine() {
        remove_empty_dirs(Path::new("/definitely/not/here")).unwrap();
    }
}
