//! Cache decision codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validity decision for a single artifact
///
/// Variants are ordered by severity so that a stage-level decision is the
/// maximum over the stage's declared outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDecision {
    /// Exists, equivalent metadata, within retention: reuse as-is
    Fresh,
    /// Does not exist: must be created
    Missing,
    /// Exists but must be deleted and recreated
    Stale,
}

impl CacheDecision {
    /// Reduce several decisions to the most severe one
    ///
    /// An empty set is `Fresh`.
    pub fn combine(decisions: impl IntoIterator<Item = CacheDecision>) -> CacheDecision {
        decisions.into_iter().max().unwrap_or(CacheDecision::Fresh)
    }

    pub fn is_fresh(self) -> bool {
        self == CacheDecision::Fresh
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Missing => "missing",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for CacheDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order() {
        assert!(CacheDecision::Stale > CacheDecision::Missing);
        assert!(CacheDecision::Missing > CacheDecision::Fresh);
    }

    #[test]
    fn combine_takes_most_severe() {
        use CacheDecision::*;
        assert_eq!(CacheDecision::combine([Fresh, Missing, Fresh]), Missing);
        assert_eq!(CacheDecision::combine([Missing, Stale, Fresh]), Stale);
        assert_eq!(CacheDecision::combine([Fresh, Fresh]), Fresh);
        assert_eq!(CacheDecision::combine([]), Fresh);
    }
}
