//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and
//! configuring [`Crawler`] instances.
//!
//! ## Overview
//!
//! The builder assembles the plain configuration with the runtime
//! collaborators a crawler needs: the crawl-state store factory, an optional
//! committer, the spoiled-reference strategizer, event listeners and a status
//! reporter. Sensible defaults cover everything except the plugin and the
//! crawler id.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::CrawlerBuilder;
//!
//! async fn run() -> Result<(), crawler_core::CrawlError> {
//!     let crawler = CrawlerBuilder::new(MyPlugin)
//!         .id("my-crawler")
//!         .work_dir("./work")
//!         .num_threads(4)
//!         .max_documents(10_000)
//!         .committer(MyCommitter::new())
//!         .build()?;
//!     crawler.start().await
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::config::{CrawlerConfig, OrphansStrategy};
use crate::crawler::Crawler;
use crate::error::{CrawlError, ErrorKind};
use crate::events::{EventListener, EventManager};
use crate::plugin::{Committer, CrawlerPlugin};
use crate::spoil::{
    GenericSpoiledReferenceStrategizer, SpoiledReferenceStrategizer,
};
use crate::stats::{LogStatusReporter, StatusReporter};
use crate::store::{CrawlStoreFactory, SledStoreFactory};

pub struct CrawlerBuilder<P: CrawlerPlugin> {
    config: CrawlerConfig,
    plugin: P,
    store_factory: Option<Arc<dyn CrawlStoreFactory>>,
    committer: Option<Arc<dyn Committer>>,
    spoiled_strategizer: Option<Arc<dyn SpoiledReferenceStrategizer>>,
    listeners: Vec<Arc<dyn EventListener>>,
    status_reporter: Option<Arc<dyn StatusReporter>>,
}

impl<P: CrawlerPlugin> CrawlerBuilder<P> {
    /// Creates a builder for a given plugin with default configuration.
    pub fn new(plugin: P) -> Self {
        CrawlerBuilder {
            config: CrawlerConfig::default(),
            plugin,
            store_factory: None,
            committer: None,
            spoiled_strategizer: None,
            listeners: Vec::new(),
            status_reporter: None,
        }
    }

    /// Replaces the whole configuration at once.
    pub fn config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the crawler's unique identifier. Required.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.work_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the worker pool width.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    /// Sizes the worker pool to the machine's logical CPU count.
    pub fn auto_threads(mut self) -> Self {
        self.config.num_threads = num_cpus::get().max(1);
        self
    }

    /// Caps how many references may be processed; `-1` disables the cap.
    pub fn max_documents(mut self, max_documents: i64) -> Self {
        self.config.max_documents = max_documents;
        self
    }

    pub fn orphans_strategy(mut self, strategy: OrphansStrategy) -> Self {
        self.config.orphans_strategy = strategy;
        self
    }

    /// Adds an error kind that aborts the whole crawl when a reference fails
    /// with it.
    pub fn stop_on(mut self, kind: ErrorKind) -> Self {
        self.config.stop_on_errors.push(kind);
        self
    }

    pub fn store_factory<F>(mut self, factory: F) -> Self
    where
        F: CrawlStoreFactory + 'static,
    {
        self.store_factory = Some(Arc::new(factory));
        self
    }

    pub fn committer<C>(mut self, committer: C) -> Self
    where
        C: Committer + 'static,
    {
        self.committer = Some(Arc::new(committer));
        self
    }

    pub fn spoiled_reference_strategizer<S>(mut self, strategizer: S) -> Self
    where
        S: SpoiledReferenceStrategizer + 'static,
    {
        self.spoiled_strategizer = Some(Arc::new(strategizer));
        self
    }

    pub fn add_listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn status_reporter<R>(mut self, reporter: R) -> Self
    where
        R: StatusReporter + 'static,
    {
        self.status_reporter = Some(Arc::new(reporter));
        self
    }

    /// Builds the crawler, validating the configuration.
    pub fn build(self) -> Result<Crawler<P>, CrawlError> {
        if self.config.id.trim().is_empty() {
            return Err(CrawlError::Config(
                "crawler must be given a unique identifier (id)".to_string(),
            ));
        }
        if self.config.num_threads == 0 {
            return Err(CrawlError::Config(
                "num_threads must be greater than 0".to_string(),
            ));
        }

        let store_factory = self
            .store_factory
            .unwrap_or_else(|| Arc::new(SledStoreFactory::new()));
        let spoil = self
            .spoiled_strategizer
            .unwrap_or_else(|| Arc::new(GenericSpoiledReferenceStrategizer::new()));
        let status = self
            .status_reporter
            .unwrap_or_else(|| Arc::new(LogStatusReporter));
        let events = EventManager::new(self.config.id.clone(), self.listeners);

        Ok(Crawler::new(
            self.config,
            self.plugin,
            store_factory,
            self.committer,
            spoil,
            events,
            status,
        ))
    }
}
