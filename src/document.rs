//! Documents flowing through the import pipeline.
//!
//! A [`CrawlDoc`] binds a reference to its metadata and to a content stream
//! allocated from the shared [`CachedStreamFactory`]. Each stream is owned by
//! exactly one reference's processing and is released when that reference is
//! finalized.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Metadata key flagging whether the reference was seen for the first time
/// this run (no cached snapshot from the previous run).
pub const IS_CRAWL_NEW: &str = "crawler.is-new";

/// Multi-valued document metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, Vec<String>>);

impl Metadata {
    pub fn new() -> Self {
        Metadata::default()
    }

    /// Replaces all values under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    /// Appends a value under `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, value.to_string());
    }

    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_first(key).and_then(|v| v.parse().ok())
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

#[derive(Debug, Default)]
struct StreamAccounting {
    live_streams: AtomicUsize,
    live_bytes: AtomicUsize,
}

/// Thread-safe allocator of content streams.
///
/// The factory only does accounting: it tracks how many streams (and bytes)
/// are live so leaks are observable. Allocation itself is plain memory.
#[derive(Debug, Clone, Default)]
pub struct CachedStreamFactory {
    accounting: Arc<StreamAccounting>,
}

impl CachedStreamFactory {
    pub fn new() -> Self {
        CachedStreamFactory::default()
    }

    /// Allocates an empty stream.
    pub fn new_stream(&self) -> CachedStream {
        self.new_stream_from(Vec::new())
    }

    /// Allocates a stream over `bytes`.
    pub fn new_stream_from(&self, bytes: Vec<u8>) -> CachedStream {
        self.accounting.live_streams.fetch_add(1, Ordering::SeqCst);
        self.accounting
            .live_bytes
            .fetch_add(bytes.len(), Ordering::SeqCst);
        CachedStream {
            bytes,
            accounting: Arc::clone(&self.accounting),
            disposed: false,
        }
    }

    /// Number of streams allocated and not yet released.
    pub fn live_streams(&self) -> usize {
        self.accounting.live_streams.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> usize {
        self.accounting.live_bytes.load(Ordering::SeqCst)
    }
}

/// Content stream owned by a single reference's processing.
///
/// Released explicitly in finalize via [`CachedStream::dispose`], or
/// implicitly on drop.
#[derive(Debug)]
pub struct CachedStream {
    bytes: Vec<u8>,
    accounting: Arc<StreamAccounting>,
    disposed: bool,
}

impl CachedStream {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Replaces the stream content, keeping accounting accurate.
    pub fn replace(&mut self, bytes: Vec<u8>) {
        if !self.disposed {
            self.accounting
                .live_bytes
                .fetch_sub(self.bytes.len(), Ordering::SeqCst);
            self.accounting
                .live_bytes
                .fetch_add(bytes.len(), Ordering::SeqCst);
        }
        self.bytes = bytes;
    }

    /// Releases the stream. Idempotent.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.accounting.live_streams.fetch_sub(1, Ordering::SeqCst);
            self.accounting
                .live_bytes
                .fetch_sub(self.bytes.len(), Ordering::SeqCst);
            self.bytes = Vec::new();
        }
    }
}

impl Drop for CachedStream {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A document bound to a reference, carried through the import pipeline.
#[derive(Debug)]
pub struct CrawlDoc {
    pub reference: String,
    pub metadata: Metadata,
    pub content: CachedStream,
}

impl CrawlDoc {
    pub fn new(reference: impl Into<String>, content: CachedStream) -> Self {
        CrawlDoc {
            reference: reference.into(),
            metadata: Metadata::new(),
            content,
        }
    }
}
