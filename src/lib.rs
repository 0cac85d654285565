//! # crawler-core
//!
//! Core engine of a reference-driven crawler: the work scheduler that drives
//! references through an import pipeline, coordinates concurrent workers over
//! a shared crawl-state store, and resolves end-of-life decisions (commit,
//! delete, retry, ignore) for every reference it touches.
//!
//! The engine is protocol-agnostic: it never fetches from the web, a
//! filesystem or anything else. Specializations plug fetch and parse logic in
//! through the [`CrawlerPlugin`] trait.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::{
//!     async_trait, CrawlError, CrawlerBuilder, CrawlerPlugin, CrawlRecord,
//!     ImporterContext, ImporterResponse,
//! };
//! use crawler_core::store::CrawlStore;
//!
//! struct MyCrawler;
//!
//! #[async_trait]
//! impl CrawlerPlugin for MyCrawler {
//!     async fn prepare(
//!         &self,
//!         store: &dyn CrawlStore,
//!         resume: bool,
//!     ) -> Result<(), CrawlError> {
//!         if !resume {
//!             store.queue(CrawlRecord::root("https://example.com"))?;
//!         }
//!         Ok(())
//!     }
//!
//!     async fn execute_importer_pipeline(
//!         &self,
//!         ctx: ImporterContext<'_>,
//!     ) -> Result<Option<ImporterResponse>, CrawlError> {
//!         // fetch, parse, set ctx.record.state, build a response...
//!         todo!()
//!     }
//! }
//!
//! async fn run() -> Result<(), CrawlError> {
//!     let crawler = CrawlerBuilder::new(MyCrawler)
//!         .id("example")
//!         .num_threads(2)
//!         .build()?;
//!     crawler.start().await
//! }
//! ```

pub mod builder;
pub mod config;
pub mod crawler;
pub mod document;
pub mod error;
pub mod events;
pub mod filter;
#[cfg(feature = "monitoring")]
pub mod monitor;
pub mod plugin;
pub mod prelude;
pub mod record;
pub mod spoil;
pub mod stats;
pub mod store;

pub use builder::CrawlerBuilder;
pub use config::{CrawlerConfig, OrphansStrategy};
pub use crawler::Crawler;
pub use document::{CachedStream, CachedStreamFactory, CrawlDoc, Metadata};
pub use error::{CrawlError, ErrorKind, StoreError};
pub use events::{CrawlerEvent, CrawlerEventKind, EventListener};
pub use plugin::{
    Committer, CommitterContext, CrawlerPlugin, ImporterContext,
    ImporterResponse, ProcessContext,
};
pub use record::{CrawlRecord, CrawlState, Stage};
pub use spoil::{SpoiledReferenceStrategizer, SpoiledStrategy};
pub use stats::{StatCollector, StatusReporter};
pub use store::{CrawlStore, CrawlStoreFactory};

pub use async_trait::async_trait;
pub use tokio;
