//! Spoiled-reference policy.
//!
//! A reference is "spoiled" when its run ends in a state that is not a good
//! state. The strategizer decides what happens to the previously committed
//! version of such a reference: keep it, delete it, or grant one grace cycle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::record::CrawlState;

/// Disposition of a spoiled reference's previously committed version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum SpoiledStrategy {
    /// Keep the committed version as-is.
    Ignore,
    /// Remove the committed version (when a non-deleted cached snapshot
    /// exists).
    Delete,
    /// Keep the committed version this run if the previous run was good;
    /// delete it if the reference was already spoiled last run.
    GraceOnce,
}

/// Resolves the disposition of a spoiled reference.
///
/// Implementations may inspect the reference pattern and the final state.
/// Returning `None` means "no opinion"; the engine then falls back to
/// [`SpoiledStrategy::Delete`].
pub trait SpoiledReferenceStrategizer: Send + Sync {
    fn resolve(
        &self,
        reference: &str,
        state: CrawlState,
    ) -> Option<SpoiledStrategy>;
}

/// The fallback applied when no strategizer is configured or the configured
/// one returns no opinion.
pub const DEFAULT_FALLBACK_STRATEGY: SpoiledStrategy = SpoiledStrategy::Delete;

/// State-mapping strategizer.
///
/// Resolves by looking the final state up in an explicit mapping, falling
/// back to a configurable default. The stock mappings give transient-looking
/// failures one grace cycle and remove documents that are authoritatively
/// gone.
pub struct GenericSpoiledReferenceStrategizer {
    mappings: HashMap<CrawlState, SpoiledStrategy>,
    fallback: SpoiledStrategy,
}

impl Default for GenericSpoiledReferenceStrategizer {
    fn default() -> Self {
        let mut mappings = HashMap::new();
        mappings.insert(CrawlState::NotFound, SpoiledStrategy::Delete);
        mappings.insert(CrawlState::BadStatus, SpoiledStrategy::GraceOnce);
        mappings.insert(CrawlState::Error, SpoiledStrategy::GraceOnce);
        GenericSpoiledReferenceStrategizer {
            mappings,
            fallback: DEFAULT_FALLBACK_STRATEGY,
        }
    }
}

impl GenericSpoiledReferenceStrategizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the mapping for one state.
    pub fn map_state(
        mut self,
        state: CrawlState,
        strategy: SpoiledStrategy,
    ) -> Self {
        self.mappings.insert(state, strategy);
        self
    }

    pub fn fallback(mut self, strategy: SpoiledStrategy) -> Self {
        self.fallback = strategy;
        self
    }
}

impl SpoiledReferenceStrategizer for GenericSpoiledReferenceStrategizer {
    fn resolve(
        &self,
        _reference: &str,
        state: CrawlState,
    ) -> Option<SpoiledStrategy> {
        Some(*self.mappings.get(&state).unwrap_or(&self.fallback))
    }
}
