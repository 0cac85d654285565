//! A "prelude" for users of the `crawler-core` crate.
//!
//! Re-exports the traits and types a plugin implementation touches most, so
//! they can be imported in one line.
//!
//! # Example
//!
//! ```
//! use crawler_core::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    CrawlDoc,
    CrawlRecord,
    CrawlState,
    ImporterResponse,
    // Core traits
    Committer,
    CrawlerPlugin,
    CrawlStore,
    // Contexts
    CommitterContext,
    ImporterContext,
    ProcessContext,
    // Errors
    CrawlError,
    ErrorKind,
    // Essential re-export for trait implementation
    async_trait,
};

pub use crate::filter::{ReferenceFilter, RegexReferenceFilter};
pub use crate::spoil::{SpoiledReferenceStrategizer, SpoiledStrategy};
