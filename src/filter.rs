//! Reference filters.
//!
//! Building blocks for queue pipelines: a filter decides whether a reference
//! may enter the queue. The engine never applies filters itself; plugin
//! queue-pipelines compose them with [`is_accepted`].

use regex::{Regex, RegexBuilder};

use crate::error::CrawlError;

/// How a matching filter is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnMatch {
    /// The reference must match at least one include filter to pass.
    #[default]
    Include,
    /// A match rejects the reference.
    Exclude,
}

/// Accepts or rejects a reference before it is queued.
pub trait ReferenceFilter: Send + Sync {
    /// Whether this filter does not reject the reference.
    fn accept(&self, reference: &str) -> bool;

    fn on_match(&self) -> OnMatch {
        OnMatch::Include
    }
}

/// Regular-expression reference filter.
///
/// The pattern must match the entire reference, not a substring of it.
/// Matching is case-insensitive unless built with
/// [`RegexReferenceFilter::case_sensitive`], and `.` matches newlines.
pub struct RegexReferenceFilter {
    regex: Regex,
    on_match: OnMatch,
}

impl RegexReferenceFilter {
    pub fn new(pattern: &str) -> Result<Self, CrawlError> {
        Self::build(pattern, OnMatch::Include, false)
    }

    pub fn excluding(pattern: &str) -> Result<Self, CrawlError> {
        Self::build(pattern, OnMatch::Exclude, false)
    }

    pub fn case_sensitive(
        pattern: &str,
        on_match: OnMatch,
    ) -> Result<Self, CrawlError> {
        Self::build(pattern, on_match, true)
    }

    fn build(
        pattern: &str,
        on_match: OnMatch,
        case_sensitive: bool,
    ) -> Result<Self, CrawlError> {
        // anchored so the pattern must cover the whole reference
        let regex = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| {
                CrawlError::Config(format!(
                    "invalid reference filter pattern {pattern:?}: {e}"
                ))
            })?;
        Ok(RegexReferenceFilter { regex, on_match })
    }
}

impl ReferenceFilter for RegexReferenceFilter {
    fn accept(&self, reference: &str) -> bool {
        let matches = self.regex.is_match(reference);
        match self.on_match {
            OnMatch::Include => matches,
            OnMatch::Exclude => !matches,
        }
    }

    fn on_match(&self) -> OnMatch {
        self.on_match
    }
}

/// Applies a filter chain to a reference.
///
/// Any rejecting exclude filter rejects. When include filters are present,
/// at least one of them must accept.
pub fn is_accepted(
    reference: &str,
    filters: &[Box<dyn ReferenceFilter>],
) -> bool {
    let mut has_includes = false;
    let mut include_matched = false;
    for filter in filters {
        let accepted = filter.accept(reference);
        match filter.on_match() {
            OnMatch::Include => {
                has_includes = true;
                if accepted {
                    include_matched = true;
                }
            }
            OnMatch::Exclude => {
                if !accepted {
                    return false;
                }
            }
        }
    }
    !has_includes || include_matched
}
