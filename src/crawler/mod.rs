//! # Crawler Module
//!
//! Implements the engine that drives references through the import pipeline.
//!
//! ## Overview
//!
//! The crawler module owns the whole lifecycle of a run: it opens the
//! crawl-state store, runs a fixed pool of workers over the queue, hands each
//! claimed reference to the per-reference processor, reconciles orphans from
//! the previous run, flushes the committer, and fires lifecycle events along
//! the way.
//!
//! ## Key Components
//!
//! - **Crawler**: the top-level orchestrator, built through
//!   [`crate::builder::CrawlerBuilder`]
//! - **Worker pool**: N long-lived tasks multiplexing over the store's queue
//!   with a joint idle predicate as termination consensus
//! - **Reference processor**: the per-reference state machine (import,
//!   finalize, spoil handling, delete path, embedded children)
//! - **Orphan handling**: the end-of-run reconciliation pass
//!
//! ## Internal Components
//!
//! These are implementation details and are not used directly:
//! - `worker::run_pool`: spawns and joins one pool pass
//! - `processor::process_queued`: runs one claimed reference to completion
//! - `orphans::handle_orphans`: applies the configured orphans strategy

mod core;
mod orphans;
mod processor;
mod worker;

pub use self::core::Crawler;

pub(crate) use self::core::CrawlerInner;
