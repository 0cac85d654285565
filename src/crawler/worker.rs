//! The worker pool.
//!
//! A fixed pool of long-lived tasks multiplexes over the store's queue. The
//! store's `next_queued` is the sole claim point, so no per-reference locking
//! exists anywhere in the pool.
//!
//! Termination: a worker exits when it observes `active_count == 0` together
//! with an empty queue. The predicate is stable: once every worker sees it,
//! no record is claimed anywhere, so no new work can appear. A worker that
//! finds the queue empty while others are still active sleeps briefly and
//! re-checks, since an active worker may enqueue children at any moment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{debug, error, info, trace};

use crate::crawler::processor;
use crate::crawler::CrawlerInner;
use crate::error::CrawlError;
use crate::plugin::{CrawlerPlugin, ProcessContext};
use crate::store::CrawlStore;

/// Idle back-off between queue polls.
const MINIMUM_DELAY: Duration = Duration::from_millis(1);

/// Runs one full pool pass: spawns the configured number of workers and
/// waits for all of them to reach the termination consensus (or the stop
/// flag).
pub(crate) async fn run_pool<P: CrawlerPlugin>(
    inner: &Arc<CrawlerInner<P>>,
    store: &Arc<dyn CrawlStore>,
    ctx: ProcessContext,
) {
    let num_threads = inner.config.num_threads.max(1);
    let mut handles = Vec::with_capacity(num_threads);
    for index in 1..=num_threads {
        debug!("{}: crawler worker #{index} started", inner.id());
        let inner = Arc::clone(inner);
        let store = Arc::clone(store);
        handles.push(tokio::spawn(worker_loop(inner, store, ctx, index)));
    }
    for result in join_all(handles).await {
        if let Err(err) = result {
            error!("worker task failed: {err}");
        }
    }
}

async fn worker_loop<P: CrawlerPlugin>(
    inner: Arc<CrawlerInner<P>>,
    store: Arc<dyn CrawlStore>,
    ctx: ProcessContext,
    index: usize,
) {
    while !inner.is_stopped() {
        match process_next_reference(&inner, store.as_ref(), ctx).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                error!(
                    "{}: an error occurred that could compromise the \
                     stability of the crawler; stopping execution to avoid \
                     further issues: {err}",
                    inner.id()
                );
                inner.stop();
            }
        }
    }
    debug!("{}: crawler worker #{index} finished", inner.id());
}

/// Returns whether there may be more references to process.
async fn process_next_reference<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    store: &dyn CrawlStore,
    ctx: ProcessContext,
) -> Result<bool, CrawlError> {
    if !ctx.delete && inner.is_max_documents() {
        info!(
            "{}: maximum documents reached: {}",
            inner.id(),
            inner.config.max_documents
        );
        return Ok(false);
    }

    match store.next_queued()? {
        Some(record) => {
            let reference = record.reference.clone();
            trace!(
                "{}: processing next reference from queue: {reference}",
                inner.id()
            );
            let started = Instant::now();
            processor::process_queued(inner, store, ctx, record).await?;
            report_progress(inner, store);
            debug!(
                "{}: {:?} to process: {reference}",
                inner.id(),
                started.elapsed()
            );
            Ok(true)
        }
        None => {
            let active_count = store.active_count();
            let queue_empty = store.is_queue_empty();
            trace!(
                "{}: references currently being processed: {active_count}",
                inner.id()
            );
            trace!("{}: is reference queue empty? {queue_empty}", inner.id());
            if active_count == 0 && queue_empty {
                return Ok(false);
            }
            tokio::time::sleep(MINIMUM_DELAY).await;
            Ok(true)
        }
    }
}

fn report_progress<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    store: &dyn CrawlStore,
) {
    let queued = store.queue_size();
    let processed = inner.stats.processed_count();
    let total = processed + queued;
    let progress = if total == 0 {
        0.0
    } else {
        processed as f64 / total as f64
    };
    inner.status.set_progress(progress);
    inner
        .status
        .set_note(&format!("{processed} references processed out of {total}"));
    if inner.stats.should_log_status() {
        info!(
            "{}: {}% completed ({processed} processed/{total} total)",
            inner.id(),
            (progress * 100.0).floor() as u32
        );
    }
}
