//! # Record Module
//!
//! Defines the per-reference crawl record and its two coordinate axes.
//!
//! ## Overview
//!
//! A [`CrawlRecord`] is the unit of bookkeeping for one reference. It carries
//! two orthogonal pieces of scheduling information:
//!
//! - [`Stage`]: where the record sits in the scheduler (queued, claimed by a
//!   worker, done, or frozen from the previous run).
//! - [`CrawlState`]: the terminal outcome of processing the reference
//!   (new, modified, rejected, errored, deleted, ...).
//!
//! Records are serialized with `serde` so stores can persist them in their
//! native encoding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of processing a single reference.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CrawlState {
    /// No outcome recorded yet. Records are claimed in this state; a record
    /// finalized while still `Unknown` signals an implementation bug and is
    /// coerced to [`CrawlState::BadStatus`].
    #[default]
    Unknown,
    New,
    Modified,
    Unmodified,
    Rejected,
    Error,
    BadStatus,
    NotFound,
    Deleted,
}

impl CrawlState {
    /// Whether the reference produced fresh content this run.
    pub fn is_new_or_modified(self) -> bool {
        matches!(self, CrawlState::New | CrawlState::Modified)
    }

    /// Whether the state counts as a successful ingest.
    pub fn is_good_state(self) -> bool {
        matches!(
            self,
            CrawlState::New | CrawlState::Modified | CrawlState::Unmodified
        )
    }
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrawlState::Unknown => "UNKNOWN",
            CrawlState::New => "NEW",
            CrawlState::Modified => "MODIFIED",
            CrawlState::Unmodified => "UNMODIFIED",
            CrawlState::Rejected => "REJECTED",
            CrawlState::Error => "ERROR",
            CrawlState::BadStatus => "BAD_STATUS",
            CrawlState::NotFound => "NOT_FOUND",
            CrawlState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Scheduler coordinate of a record.
///
/// Every record belongs to exactly one stage at any instant. `Cached` records
/// are read-only snapshots from the previous run and are replaced wholesale
/// at run boundaries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Stage {
    #[default]
    Queued,
    Active,
    Processed,
    Cached,
}

/// Bookkeeping record for a single reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRecord {
    /// Opaque, non-empty identifier of the unit of work. Always the full
    /// reference, even when a store truncates its key.
    pub reference: String,
    /// The originating seed, when this record descends from one.
    pub parent_root_reference: Option<String>,
    /// Whether this record is itself a seed.
    pub is_root_parent: bool,
    pub state: CrawlState,
    pub meta_checksum: Option<String>,
    pub content_checksum: Option<String>,
    pub content_type: Option<String>,
    pub crawl_date: DateTime<Utc>,
    pub stage: Stage,
    /// Application-defined extension fields.
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl CrawlRecord {
    /// Creates a fresh record for a discovered reference.
    pub fn new(reference: impl Into<String>) -> Self {
        CrawlRecord {
            reference: reference.into(),
            parent_root_reference: None,
            is_root_parent: false,
            state: CrawlState::Unknown,
            meta_checksum: None,
            content_checksum: None,
            content_type: None,
            crawl_date: Utc::now(),
            stage: Stage::Queued,
            extras: BTreeMap::new(),
        }
    }

    /// Creates a record for a seed reference.
    pub fn root(reference: impl Into<String>) -> Self {
        CrawlRecord {
            is_root_parent: true,
            ..CrawlRecord::new(reference)
        }
    }

    /// Creates a record for an embedded sub-document discovered while
    /// importing `parent`.
    pub fn embedded(reference: &str, parent: &CrawlRecord) -> Self {
        CrawlRecord {
            parent_root_reference: Some(parent.reference.clone()),
            ..CrawlRecord::new(reference)
        }
    }

    /// Builds a current-run record out of a prior-run cache snapshot, for
    /// orphan reconciliation. Identity and prior-run knowledge carry over;
    /// the outcome is reset so the new pass decides it.
    pub(crate) fn requeued(cached: &CrawlRecord) -> Self {
        CrawlRecord {
            reference: cached.reference.clone(),
            parent_root_reference: cached.parent_root_reference.clone(),
            is_root_parent: cached.is_root_parent,
            state: CrawlState::Unknown,
            meta_checksum: cached.meta_checksum.clone(),
            content_checksum: cached.content_checksum.clone(),
            content_type: cached.content_type.clone(),
            crawl_date: Utc::now(),
            stage: Stage::Queued,
            extras: cached.extras.clone(),
        }
    }

    /// Null-preserving merge: copies each field from `cached` only where this
    /// record has no value yet. Present values are never overwritten, and
    /// fields that always carry a value (`reference`, `state`, `stage`,
    /// `crawl_date`, booleans) are never touched.
    ///
    /// Used when a reference did not go through the full pipeline this run
    /// (an unmodified document, for instance) so knowledge gathered by the
    /// previous run is not lost.
    pub fn fill_missing_from(&mut self, cached: &CrawlRecord) {
        if self.parent_root_reference.is_none() {
            self.parent_root_reference = cached.parent_root_reference.clone();
        }
        if self.meta_checksum.is_none() {
            self.meta_checksum = cached.meta_checksum.clone();
        }
        if self.content_checksum.is_none() {
            self.content_checksum = cached.content_checksum.clone();
        }
        if self.content_type.is_none() {
            self.content_type = cached.content_type.clone();
        }
        for (key, value) in &cached.extras {
            self.extras
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}
