//! Orphan reconciliation.
//!
//! An orphan is a reference present in the previous run's cache but not
//! re-seen in the current run. After the main pass drains (and only when the
//! crawl was not stopped), the configured strategy decides their fate. All
//! cache entries are offered back to the store; references already handled
//! this run are absorbed by the queue's idempotence, so only true orphans
//! actually re-enter processing.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::OrphansStrategy;
use crate::crawler::{worker, CrawlerInner};
use crate::error::CrawlError;
use crate::plugin::{CrawlerPlugin, ProcessContext};
use crate::record::CrawlRecord;
use crate::store::CrawlStore;

pub(crate) async fn handle_orphans<P: CrawlerPlugin>(
    inner: &Arc<CrawlerInner<P>>,
    store: &Arc<dyn CrawlStore>,
) -> Result<(), CrawlError> {
    match inner.config.orphans_strategy {
        OrphansStrategy::Process => reprocess_cache_orphans(inner, store).await,
        OrphansStrategy::Delete => delete_cache_orphans(inner, store).await,
        OrphansStrategy::Ignore => Ok(()),
    }
}

/// Re-enqueues every cache entry through the queue pipeline (reference
/// filters apply) and runs a second pool pass in orphan mode. The
/// max-documents cap still applies to this pass.
async fn reprocess_cache_orphans<P: CrawlerPlugin>(
    inner: &Arc<CrawlerInner<P>>,
    store: &Arc<dyn CrawlStore>,
) -> Result<(), CrawlError> {
    if inner.is_max_documents() {
        info!(
            "{}: max documents reached, not reprocessing orphans (if any)",
            inner.id()
        );
        return Ok(());
    }
    info!("{}: reprocessing any cached/orphan references...", inner.id());

    let mut count = 0u64;
    for entry in store.cache_iter()? {
        let cached = entry?;
        let record = CrawlRecord::requeued(&cached);
        inner
            .plugin
            .execute_queue_pipeline(record, store.as_ref())
            .await?;
        count += 1;
    }
    worker::run_pool(inner, store, ProcessContext::ORPHAN_REPROCESS).await;
    debug!(
        "{}: reprocessed {count} cached/orphan references",
        inner.id()
    );
    Ok(())
}

/// Enqueues every cache entry raw (no filters) and runs a second pool pass
/// that routes each reference through the delete path. The max-documents cap
/// does not apply to deletions.
async fn delete_cache_orphans<P: CrawlerPlugin>(
    inner: &Arc<CrawlerInner<P>>,
    store: &Arc<dyn CrawlStore>,
) -> Result<(), CrawlError> {
    info!("{}: deleting orphan references (if any)...", inner.id());
    let mut count = 0u64;
    for entry in store.cache_iter()? {
        let cached = entry?;
        store.queue(CrawlRecord::requeued(&cached))?;
        count += 1;
    }
    if count > 0 {
        worker::run_pool(inner, store, ProcessContext::ORPHAN_DELETE).await;
    }
    info!("{}: deleted {count} orphan references", inner.id());
    Ok(())
}
