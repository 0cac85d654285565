//! # Plugin Module
//!
//! Defines the [`CrawlerPlugin`] trait and related components through which a
//! concrete crawler specializes the engine.
//!
//! ## Overview
//!
//! The engine is protocol-agnostic: it schedules references, runs the
//! per-reference state machine, and resolves end-of-life decisions, but it
//! never fetches or parses anything itself. Everything protocol-specific is
//! supplied by a `CrawlerPlugin` implementation: how references enter the
//! queue, how a reference becomes an imported document, and how results reach
//! the downstream sink.
//!
//! ## Key Components
//!
//! - **CrawlerPlugin**: the capability aggregating every specialization hook
//! - **ImporterResponse**: outcome of the import pipeline, possibly carrying
//!   nested responses for embedded sub-documents
//! - **Committer**: the downstream sink contract (upsert/remove/commit)
//! - **ImporterContext / CommitterContext**: borrowed views handed to the
//!   pipeline hooks
//!
//! All hooks must be thread-safe; they are invoked concurrently from worker
//! tasks.

use async_trait::async_trait;

use crate::document::{CrawlDoc, Metadata};
use crate::error::CrawlError;
use crate::record::{CrawlRecord, CrawlState};
use crate::store::CrawlStore;

/// Mode flags for one processing pass, shared by all workers of that pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessContext {
    /// The pass is reprocessing orphans from the previous run's cache.
    pub orphan: bool,
    /// Every reference of this pass goes through the delete path.
    pub delete: bool,
}

impl ProcessContext {
    pub const NORMAL: ProcessContext = ProcessContext {
        orphan: false,
        delete: false,
    };
    pub const ORPHAN_REPROCESS: ProcessContext = ProcessContext {
        orphan: true,
        delete: false,
    };
    pub const ORPHAN_DELETE: ProcessContext = ProcessContext {
        orphan: false,
        delete: true,
    };
}

/// Outcome of running one reference through the import pipeline.
///
/// A response may nest responses for embedded sub-documents discovered while
/// importing; each nested response produces its own crawl record.
#[derive(Debug)]
pub struct ImporterResponse {
    pub reference: String,
    pub success: bool,
    /// Importer status description, carried into events.
    pub description: Option<String>,
    /// The imported document, when one was produced.
    pub doc: Option<CrawlDoc>,
    pub children: Vec<ImporterResponse>,
}

impl ImporterResponse {
    pub fn success(reference: impl Into<String>, doc: CrawlDoc) -> Self {
        ImporterResponse {
            reference: reference.into(),
            success: true,
            description: None,
            doc: Some(doc),
            children: Vec::new(),
        }
    }

    pub fn rejected(
        reference: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        ImporterResponse {
            reference: reference.into(),
            success: false,
            description: Some(description.into()),
            doc: None,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ImporterResponse) -> Self {
        self.children.push(child);
        self
    }
}

/// Downstream sink for crawl results. Invoked concurrently; implementations
/// must be thread-safe.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn upsert(
        &self,
        reference: &str,
        doc: &CrawlDoc,
    ) -> Result<(), CrawlError>;

    async fn remove(
        &self,
        reference: &str,
        metadata: &Metadata,
    ) -> Result<(), CrawlError>;

    /// Flushes whatever the committer buffered. Called once per run.
    async fn commit(&self) -> Result<(), CrawlError>;
}

/// View handed to the importer pipeline for one reference.
pub struct ImporterContext<'a> {
    pub store: &'a dyn CrawlStore,
    pub record: &'a mut CrawlRecord,
    pub cached: Option<&'a CrawlRecord>,
    pub doc: &'a mut CrawlDoc,
    pub mode: ProcessContext,
}

/// View handed to the committer pipeline after a successful import.
pub struct CommitterContext<'a> {
    pub store: &'a dyn CrawlStore,
    pub committer: Option<&'a dyn Committer>,
    pub doc: &'a CrawlDoc,
    pub record: &'a mut CrawlRecord,
    pub cached: Option<&'a CrawlRecord>,
}

/// Specialization surface of the engine.
///
/// A concrete crawler implements this once; the engine carries it through
/// every stage of a reference's lifecycle. Only
/// [`execute_importer_pipeline`](CrawlerPlugin::execute_importer_pipeline)
/// has no default.
#[async_trait]
pub trait CrawlerPlugin: Send + Sync + 'static {
    /// Called once before workers start. Seed the queue here. `resume` is
    /// true when the run continues an interrupted one, in which case the
    /// queue already carries the leftover references.
    async fn prepare(
        &self,
        _store: &dyn CrawlStore,
        _resume: bool,
    ) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Called once after the run, before the store closes.
    async fn cleanup(&self, _store: &dyn CrawlStore) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Filters and enqueues one reference. The default enqueues unfiltered;
    /// specializations typically run the record through their reference
    /// filters (see [`crate::filter`]) first.
    async fn execute_queue_pipeline(
        &self,
        record: CrawlRecord,
        store: &dyn CrawlStore,
    ) -> Result<(), CrawlError> {
        store.queue(record)?;
        Ok(())
    }

    /// Turns a claimed reference into an imported document.
    ///
    /// Returning `Ok(None)` means the pipeline rejected the reference before
    /// importing; the engine records it as rejected. Returning a response
    /// hands control to the committer pipeline and, recursively, to every
    /// nested child response.
    async fn execute_importer_pipeline(
        &self,
        ctx: ImporterContext<'_>,
    ) -> Result<Option<ImporterResponse>, CrawlError>;

    /// Ships one imported document downstream. The default treats every
    /// import as new content and upserts through the configured committer;
    /// specializations add document filters and checksum gating, and decide
    /// between new, modified and unmodified.
    async fn execute_committer_pipeline(
        &self,
        ctx: CommitterContext<'_>,
    ) -> Result<(), CrawlError> {
        if ctx.record.state == CrawlState::Unknown {
            ctx.record.state = CrawlState::New;
        }
        if let Some(committer) = ctx.committer {
            committer.upsert(&ctx.record.reference, ctx.doc).await?;
        }
        Ok(())
    }

    /// Wraps a freshly constructed document, letting specializations swap in
    /// their own document subtype or attach metadata.
    fn wrap_document(&self, _record: &CrawlRecord, doc: CrawlDoc) -> CrawlDoc {
        doc
    }

    /// Called after the cached snapshot is resolved, before any pipeline
    /// runs.
    fn init_crawl_data(
        &self,
        _current: &mut CrawlRecord,
        _cached: Option<&CrawlRecord>,
        _doc: &mut CrawlDoc,
    ) {
    }

    /// Last chance to act on a record before its processing is finalized.
    /// The record's state is guaranteed to be set.
    fn before_finalize(
        &self,
        _current: &mut CrawlRecord,
        _store: &dyn CrawlStore,
        _doc: Option<&CrawlDoc>,
        _cached: Option<&CrawlRecord>,
    ) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Lets specializations that track reference aliases (redirects, ...)
    /// close them out when the main reference is done.
    fn mark_reference_variations_as_processed(
        &self,
        _current: &CrawlRecord,
        _store: &dyn CrawlStore,
    ) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Builds the record for an embedded sub-document.
    fn create_embedded_crawl_data(
        &self,
        embedded_reference: &str,
        parent: &CrawlRecord,
    ) -> CrawlRecord {
        CrawlRecord::embedded(embedded_reference, parent)
    }
}
