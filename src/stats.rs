//! # Statistics Module
//!
//! Collects metrics about a crawl and reports progress.
//!
//! ## Overview
//!
//! The [`StatCollector`] tracks how many references reached each terminal
//! outcome, using atomic counters so workers update it concurrently without
//! coordination. The processed counter is the engine's own count (it feeds
//! the max-documents gate and progress reporting); it is primed from the
//! store on resume so a continued run keeps counting where it left off.
//!
//! Progress is pushed through a [`StatusReporter`]; the default reporter
//! simply logs. Status lines are rate-limited to one every five seconds.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::CrawlError;

const STATUS_LOGGING_INTERVAL_MS: u64 = 5_000;

/// Crawl-wide counters, updated from any worker.
#[derive(Debug, Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    start_time: Instant,
    /// References finalized this run (and, on resume, prior invocations of
    /// the same run).
    pub processed: AtomicUsize,
    pub imported: AtomicUsize,
    pub rejected: AtomicUsize,
    pub errored: AtomicUsize,
    pub deleted: AtomicUsize,
    #[serde(skip)]
    last_status_log_ms: AtomicU64,
}

impl StatCollector {
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            processed: AtomicUsize::new(0),
            imported: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            errored: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            last_status_log_ms: AtomicU64::new(0),
        }
    }

    /// Seeds the processed counter from the store when resuming.
    pub fn prime_processed(&self, count: usize) {
        self.processed.store(count, Ordering::SeqCst);
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_imported(&self) {
        self.imported.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_errored(&self) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Resets the status-logging clock, so the first status line appears a
    /// full interval after the crawl starts.
    pub fn touch_status_clock(&self) {
        self.last_status_log_ms.store(
            self.start_time.elapsed().as_millis() as u64,
            Ordering::Relaxed,
        );
    }

    /// Whether a status line is due. At most one caller wins per interval;
    /// visibility is relaxed, an occasional extra or missing line is fine.
    pub fn should_log_status(&self) -> bool {
        let now = self.start_time.elapsed().as_millis() as u64;
        let last = self.last_status_log_ms.load(Ordering::Relaxed);
        now.saturating_sub(last) >= STATUS_LOGGING_INTERVAL_MS
            && self
                .last_status_log_ms
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        serde_json::to_string(self).map_err(|e| CrawlError::Other(e.into()))
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration  : {:?}", self.elapsed())?;
        writeln!(
            f,
            "  references: processed: {}, imported: {}, rejected: {}, errors: {}, deleted: {}",
            self.processed.load(Ordering::SeqCst),
            self.imported.load(Ordering::SeqCst),
            self.rejected.load(Ordering::SeqCst),
            self.errored.load(Ordering::SeqCst),
            self.deleted.load(Ordering::SeqCst),
        )
    }
}

/// Receives advisory progress updates from the worker pool.
pub trait StatusReporter: Send + Sync {
    /// Fraction of known work done, in `[0, 1]`.
    fn set_progress(&self, progress: f64);

    fn set_note(&self, note: &str);
}

/// Default reporter: progress goes to the debug log.
#[derive(Debug, Default)]
pub struct LogStatusReporter;

impl StatusReporter for LogStatusReporter {
    fn set_progress(&self, progress: f64) {
        debug!("progress: {:.2}%", progress * 100.0);
    }

    fn set_note(&self, note: &str) {
        debug!("status: {note}");
    }
}
