//! Error types for the crawler engine.
//!
//! Two layers exist: [`StoreError`] for failures inside a crawl-state store
//! implementation, and [`CrawlError`] for everything the engine and its
//! plugins can surface. Every `CrawlError` carries a structural [`ErrorKind`]
//! tag; the engine compares kinds (never messages) against the configured
//! `stop_on_errors` list to decide whether a per-reference failure must take
//! the whole crawl down.

use thiserror::Error;

/// Failure inside a [`crate::store::CrawlStore`] implementation.
///
/// Store failures are always fatal to the worker pool: a store that cannot
/// claim or persist records can no longer uphold the scheduling invariants.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("record encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("record decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("store is closed")]
    Closed,
}

/// Top-level error type of the crawler engine.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The crawl-state store failed.
    #[error("crawl store failure: {0}")]
    Store(#[from] StoreError),

    /// The importer pipeline failed while processing a reference.
    #[error("importer pipeline failure: {0}")]
    Importer(#[source] anyhow::Error),

    /// The committer (or committer pipeline) failed.
    #[error("committer failure: {0}")]
    Committer(#[source] anyhow::Error),

    /// Invalid or missing configuration, detected before workers start.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The crawl was canceled from the outside.
    #[error("crawl canceled: {0}")]
    Canceled(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything a plugin raises that fits no other kind.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Wraps a plugin failure as an importer-pipeline error.
    pub fn importer(err: impl Into<anyhow::Error>) -> Self {
        CrawlError::Importer(err.into())
    }

    /// Wraps a plugin failure as a committer error.
    pub fn committer(err: impl Into<anyhow::Error>) -> Self {
        CrawlError::Committer(err.into())
    }

    /// The structural kind of this error, used for `stop_on_errors`
    /// membership tests.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Store(_) => ErrorKind::Store,
            CrawlError::Importer(_) => ErrorKind::Importer,
            CrawlError::Committer(_) => ErrorKind::Committer,
            CrawlError::Config(_) => ErrorKind::Config,
            CrawlError::Canceled(_) => ErrorKind::Canceled,
            CrawlError::Io(_) => ErrorKind::Io,
            CrawlError::Other(_) => ErrorKind::Other,
        }
    }
}

/// Structural tag identifying a family of [`CrawlError`]s.
///
/// Configured in `stop_on_errors`; matching is by tag identity, never by
/// message or string form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ErrorKind {
    Store,
    Importer,
    Committer,
    Config,
    Canceled,
    Io,
    Other,
}
