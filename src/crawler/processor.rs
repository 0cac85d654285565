//! The per-reference state machine.
//!
//! Runs one claimed reference through its whole lifecycle: document
//! construction, cached-snapshot resolution, the importer pipeline, the
//! committer pipeline for successful imports (recursing into embedded child
//! responses), and finalization.
//!
//! Finalization runs exactly once per record on every path, including
//! failure: it assigns a state when none was set, merges missing fields from
//! the cached snapshot, applies the spoiled-reference policy, writes the
//! record to the processed partition, and releases the document's content
//! stream. A failure inside finalization is logged and swallowed; the store
//! write is still attempted.
//!
//! Per-reference failures become the record's terminal state and the crawl
//! continues; only error kinds on the configured stop list are re-raised
//! (after finalize) so the worker takes the pool down.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::crawler::CrawlerInner;
use crate::document::{CrawlDoc, Metadata, IS_CRAWL_NEW};
use crate::error::CrawlError;
use crate::events::CrawlerEventKind;
use crate::plugin::{
    CommitterContext, CrawlerPlugin, ImporterContext, ImporterResponse,
    ProcessContext,
};
use crate::record::{CrawlRecord, CrawlState};
use crate::spoil::SpoiledStrategy;
use crate::store::CrawlStore;

pub(crate) async fn process_queued<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    store: &dyn CrawlStore,
    ctx: ProcessContext,
    mut current: CrawlRecord,
) -> Result<(), CrawlError> {
    let reference = current.reference.clone();
    let doc = CrawlDoc::new(&reference, inner.streams.new_stream());
    let mut doc = inner.plugin.wrap_document(&current, doc);

    let cached = store.get_cached(&reference)?;
    doc.metadata.set_bool(IS_CRAWL_NEW, cached.is_none());
    inner.plugin.init_crawl_data(&mut current, cached.as_ref(), &mut doc);

    if ctx.delete {
        return match delete_reference(inner, &mut current, Some(&doc)).await {
            Ok(()) => {
                finalize(inner, store, current, Some(doc), cached).await;
                Ok(())
            }
            Err(err) => {
                fail_processing(inner, store, current, doc, cached, err).await
            }
        };
    }

    debug!("{}: processing reference: {reference}", inner.id());
    let outcome = {
        let ictx = ImporterContext {
            store,
            record: &mut current,
            cached: cached.as_ref(),
            doc: &mut doc,
            mode: ctx,
        };
        inner.plugin.execute_importer_pipeline(ictx).await
    };

    match outcome {
        Ok(Some(response)) => {
            process_import_response(inner, store, response, current, cached)
                .await
        }
        Ok(None) => {
            // The pipeline rejected before importing. A state it set itself
            // (bad status, not found, unmodified, ...) is kept as-is.
            if current.state.is_new_or_modified()
                || current.state == CrawlState::Unknown
            {
                current.state = CrawlState::Rejected;
            }
            finalize(inner, store, current, Some(doc), cached).await;
            Ok(())
        }
        Err(err) => fail_processing(inner, store, current, doc, cached, err).await,
    }
}

/// Handles one importer response for one record, then recurses into its
/// nested child responses, each with its own embedded record and cached
/// snapshot. Depth-first; child order carries no guarantee.
fn process_import_response<'a, P: CrawlerPlugin>(
    inner: &'a CrawlerInner<P>,
    store: &'a dyn CrawlStore,
    response: ImporterResponse,
    mut current: CrawlRecord,
    cached: Option<CrawlRecord>,
) -> BoxFuture<'a, Result<(), CrawlError>> {
    async move {
        let ImporterResponse {
            success,
            description,
            doc,
            children,
            ..
        } = response;

        let mut doc = doc;
        let mut failure: Option<CrawlError> = None;
        if success {
            inner.fire(
                CrawlerEventKind::DocumentImported,
                Some(current.clone()),
                description.clone(),
            );
            if let Some(imported) = doc.take() {
                let wrapped = inner.plugin.wrap_document(&current, imported);
                let cctx = CommitterContext {
                    store,
                    committer: inner.committer.as_deref(),
                    doc: &wrapped,
                    record: &mut current,
                    cached: cached.as_ref(),
                };
                if let Err(err) =
                    inner.plugin.execute_committer_pipeline(cctx).await
                {
                    current.state = CrawlState::Error;
                    inner.fire(
                        CrawlerEventKind::RejectedError,
                        Some(current.clone()),
                        Some(err.to_string()),
                    );
                    info!(
                        "{}: could not process document: {} ({err})",
                        inner.id(),
                        current.reference
                    );
                    failure = Some(err);
                }
                doc = Some(wrapped);
            }
        } else {
            current.state = CrawlState::Rejected;
            inner.fire(
                CrawlerEventKind::RejectedImport,
                Some(current.clone()),
                description.clone(),
            );
            debug!(
                "{}: importing unsuccessful for {:?}: {}",
                inner.id(),
                current.reference,
                description.as_deref().unwrap_or("(no status)")
            );
        }

        let parent = current.clone();
        finalize(inner, store, current, doc, cached).await;

        if let Some(err) = failure {
            // children are skipped once their parent failed to commit
            if inner.stops_on(&err) {
                return Err(err);
            }
            return Ok(());
        }

        for child in children {
            let embedded = inner
                .plugin
                .create_embedded_crawl_data(&child.reference, &parent);
            let embedded_cached = store.get_cached(&child.reference)?;
            process_import_response(inner, store, child, embedded, embedded_cached)
                .await?;
        }
        Ok(())
    }
    .boxed()
}

/// Per-reference failure path: record the error as the terminal state,
/// finalize, and re-raise only stop-listed kinds.
async fn fail_processing<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    store: &dyn CrawlStore,
    mut current: CrawlRecord,
    doc: CrawlDoc,
    cached: Option<CrawlRecord>,
    err: CrawlError,
) -> Result<(), CrawlError> {
    current.state = CrawlState::Error;
    inner.fire(
        CrawlerEventKind::RejectedError,
        Some(current.clone()),
        Some(err.to_string()),
    );
    info!(
        "{}: could not process document: {} ({err})",
        inner.id(),
        current.reference
    );
    finalize(inner, store, current, Some(doc), cached).await;
    if inner.stops_on(&err) {
        Err(err)
    } else {
        Ok(())
    }
}

/// Cycle end-of-life for a crawled reference. Runs exactly once per record.
pub(crate) async fn finalize<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    store: &dyn CrawlStore,
    mut current: CrawlRecord,
    mut doc: Option<CrawlDoc>,
    cached: Option<CrawlRecord>,
) {
    if current.state == CrawlState::Unknown {
        warn!(
            "{}: reference state is unknown for {:?}; this should not \
             happen, assuming bad status",
            inner.id(),
            current.reference
        );
        current.state = CrawlState::BadStatus;
    }

    if let Err(err) =
        apply_end_of_life(inner, store, &mut current, doc.as_ref(), cached.as_ref())
            .await
    {
        error!(
            "{}: could not finalize processing of {} ({err})",
            inner.id(),
            current.reference
        );
    }

    inner.stats.increment_processed();
    if let Err(err) = store.processed(current.clone()) {
        error!(
            "{}: could not mark reference as processed: {} ({err})",
            inner.id(),
            current.reference
        );
    } else if let Err(err) = inner
        .plugin
        .mark_reference_variations_as_processed(&current, store)
    {
        error!(
            "{}: could not mark reference variations as processed: {} ({err})",
            inner.id(),
            current.reference
        );
    }

    if let Some(doc) = doc.as_mut() {
        doc.content.dispose();
    }
}

/// The before-finalize hook, cache-fill rule, and spoiled-reference policy.
async fn apply_end_of_life<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    store: &dyn CrawlStore,
    current: &mut CrawlRecord,
    doc: Option<&CrawlDoc>,
    cached: Option<&CrawlRecord>,
) -> Result<(), CrawlError> {
    // must run before fields are merged from cache
    inner.plugin.before_finalize(current, store, doc, cached)?;

    // A reference that is not new or modified did not go through the whole
    // document lifecycle this run; keep what the previous run knew wherever
    // the current record has nothing.
    if !current.state.is_new_or_modified() {
        if let Some(cached) = cached {
            current.fill_missing_from(cached);
        }
    }

    if !current.state.is_good_state() && current.state != CrawlState::Deleted {
        match inner.resolve_spoiled_strategy(&current.reference, current.state) {
            SpoiledStrategy::Ignore => {
                debug!(
                    "{}: ignoring spoiled reference: {}",
                    inner.id(),
                    current.reference
                );
            }
            SpoiledStrategy::Delete => {
                if cached.is_some_and(|c| c.state != CrawlState::Deleted) {
                    delete_reference(inner, current, doc).await?;
                }
            }
            SpoiledStrategy::GraceOnce => {
                if let Some(cached) =
                    cached.filter(|c| c.state != CrawlState::Deleted)
                {
                    if cached.state.is_good_state() {
                        debug!(
                            "{}: spoiled reference graced once (deleted next \
                             run if still spoiled): {}",
                            inner.id(),
                            current.reference
                        );
                    } else {
                        delete_reference(inner, current, doc).await?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Marks the record deleted and removes the committed version downstream.
pub(crate) async fn delete_reference<P: CrawlerPlugin>(
    inner: &CrawlerInner<P>,
    current: &mut CrawlRecord,
    doc: Option<&CrawlDoc>,
) -> Result<(), CrawlError> {
    debug!("{}: deleting reference: {}", inner.id(), current.reference);
    current.state = CrawlState::Deleted;
    if let Some(committer) = &inner.committer {
        match doc {
            Some(doc) => {
                committer.remove(&current.reference, &doc.metadata).await?
            }
            None => {
                committer.remove(&current.reference, &Metadata::new()).await?
            }
        }
    }
    inner.fire(
        CrawlerEventKind::DocumentCommittedRemove,
        Some(current.clone()),
        None,
    );
    Ok(())
}
