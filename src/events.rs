//! Crawler lifecycle and per-reference events.
//!
//! The [`EventManager`] is a thread-safe fan-out of [`CrawlerEvent`]s to the
//! configured listeners. It holds no global state; each crawler instance owns
//! its own manager. Events for a given reference are fired in causal order by
//! the worker that owns it; no ordering is guaranteed across references.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::CrawlRecord;

/// The closed set of events fired by the engine itself. Specializations may
/// fire additional events from their pipelines through the same manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CrawlerEventKind {
    CrawlerStarted,
    CrawlerResumed,
    CrawlerStopping,
    CrawlerStopped,
    CrawlerFinished,
    DocumentImported,
    RejectedImport,
    RejectedError,
    DocumentCommittedRemove,
}

impl CrawlerEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CrawlerEventKind::CrawlerStarted => "CRAWLER_STARTED",
            CrawlerEventKind::CrawlerResumed => "CRAWLER_RESUMED",
            CrawlerEventKind::CrawlerStopping => "CRAWLER_STOPPING",
            CrawlerEventKind::CrawlerStopped => "CRAWLER_STOPPED",
            CrawlerEventKind::CrawlerFinished => "CRAWLER_FINISHED",
            CrawlerEventKind::DocumentImported => "DOCUMENT_IMPORTED",
            CrawlerEventKind::RejectedImport => "REJECTED_IMPORT",
            CrawlerEventKind::RejectedError => "REJECTED_ERROR",
            CrawlerEventKind::DocumentCommittedRemove => {
                "DOCUMENT_COMMITTED_REMOVE"
            }
        }
    }
}

impl std::fmt::Display for CrawlerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event, with the crawl record and subject it relates to, when any.
#[derive(Debug, Clone)]
pub struct CrawlerEvent {
    pub kind: CrawlerEventKind,
    pub crawl_data: Option<CrawlRecord>,
    /// Free-form description of what triggered the event (an error message,
    /// an importer status, ...).
    pub subject: Option<String>,
}

impl CrawlerEvent {
    pub fn new(
        kind: CrawlerEventKind,
        crawl_data: Option<CrawlRecord>,
        subject: Option<String>,
    ) -> Self {
        CrawlerEvent {
            kind,
            crawl_data,
            subject,
        }
    }
}

/// Receives every event fired by one crawler. Must be thread-safe; listeners
/// are invoked from worker tasks.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &CrawlerEvent);
}

/// Per-crawler broadcast of events to registered listeners.
pub struct EventManager {
    crawler_id: String,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventManager {
    pub fn new(
        crawler_id: impl Into<String>,
        listeners: Vec<Arc<dyn EventListener>>,
    ) -> Self {
        EventManager {
            crawler_id: crawler_id.into(),
            listeners,
        }
    }

    pub fn fire(&self, event: CrawlerEvent) {
        debug!(
            "{}: event {} ({})",
            self.crawler_id,
            event.kind,
            event
                .crawl_data
                .as_ref()
                .map(|d| d.reference.as_str())
                .unwrap_or("-")
        );
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}
