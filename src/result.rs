#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::SearchStats;
use bevy_math::IVec2;

/// The outcome of a point-to-point search.
///
/// A failed search is still a well-formed value: `success` is false, `path`
/// is empty, `total_cost` is zero and `error` holds a stable, testable
/// message. Search errors are never surfaced as panics or `Err` values.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PathResult {
    /// Whether a path was found.
    pub success: bool,
    /// Ordered cells from start to goal inclusive. For any-angle planners,
    /// consecutive points may be non-adjacent.
    pub path: Vec<IVec2>,
    /// Total movement cost of `path`.
    pub total_cost: f32,
    /// Cells expanded during the search, retained only when
    /// `collect_explored` is configured.
    pub explored: Option<Vec<IVec2>>,
    /// Failure description, when `success` is false.
    pub error: Option<String>,
    /// Counters for this run.
    pub stats: SearchStats,
}

impl PathResult {
    /// Number of points in the path.
    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.path.len()
    }

    pub(crate) fn failure(error: impl Into<String>, mut stats: SearchStats) -> Self {
        let error = error.into();
        stats.record_failure(&error);
        Self {
            success: false,
            path: Vec::new(),
            total_cost: 0.0,
            explored: None,
            error: Some(error),
            stats,
        }
    }
}
