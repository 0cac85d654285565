//! Crawler configuration.
//!
//! Plain-data options recognized by the engine. Runtime collaborators (the
//! store factory, committer, listeners, spoiled-reference strategizer) are
//! attached through [`crate::builder::CrawlerBuilder`] instead, so this
//! struct stays serializable.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// What to do, at the end of a run, with references that were present in the
/// previous run but not re-seen in the current one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum OrphansStrategy {
    /// Leave orphans alone.
    #[default]
    Ignore,
    /// Re-enqueue every cache entry through the queue pipeline (reference
    /// filters apply) and run a second processing pass.
    Process,
    /// Enqueue every cache entry raw and run a second pass that routes each
    /// reference through the delete path.
    Delete,
}

/// Plain configuration of a crawler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Unique, non-blank crawler identity. Required.
    pub id: String,
    /// Per-crawler workspace root. The download area lives at
    /// `work_dir/downloads/<id>`.
    pub work_dir: PathBuf,
    /// Width of the worker pool. Must be at least 1.
    pub num_threads: usize,
    /// Stop claiming new references once this many have been processed.
    /// `-1` disables the cap. The orphan-delete pass ignores it.
    pub max_documents: i64,
    pub orphans_strategy: OrphansStrategy,
    /// Error kinds that abort the whole crawl when a reference fails with
    /// one of them. Everything else is recorded in the reference's terminal
    /// state and the crawl continues.
    pub stop_on_errors: Vec<ErrorKind>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            id: String::new(),
            work_dir: PathBuf::from("./work"),
            num_threads: 1,
            max_documents: -1,
            orphans_strategy: OrphansStrategy::default(),
            stop_on_errors: Vec::new(),
        }
    }
}

impl CrawlerConfig {
    /// The download area shared by all crawlers under this work directory.
    pub fn base_download_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    /// This crawler's own download area.
    pub fn download_dir(&self) -> PathBuf {
        self.base_download_dir().join(&self.id)
    }
}
