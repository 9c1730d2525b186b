#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Per-run search counters.
///
/// Counters are plain integer fields updated in place on the hot path; they
/// are zeroed at the start of every run and snapshotted into the returned
/// result. Within one run every counter is monotonic.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SearchStats {
    /// Main-loop iterations (open-set pops, or Dijkstra expansions).
    pub iterations: u32,
    /// Nodes expanded (moved to the closed set / finalized).
    pub nodes_explored: u32,
    /// Line-of-sight queries issued, including memoized hits.
    pub line_of_sight_checks: u32,
    /// Theta* grandparent relaxations accepted.
    pub parent_updates: u32,
    /// Cardinal steps in the returned path.
    pub cardinal_steps: u32,
    /// Diagonal steps in the returned path.
    pub diagonal_steps: u32,
    /// Wall-clock duration of the run. Zero for cache hits.
    pub execution_time: Duration,
    /// Whether the run produced a usable result.
    pub success: bool,
    /// The error recorded by the last failed run, if any.
    pub last_error: Option<String>,
}

impl SearchStats {
    /// Zero all counters and clear the error state.
    pub fn reset(&mut self) {
        *self = SearchStats::default();
    }

    pub(crate) fn record_failure(&mut self, error: &str) {
        self.success = false;
        self.last_error = Some(error.to_owned());
    }

    /// Count the cardinal and diagonal steps of a path of adjacent cells;
    /// longer (any-angle) segments count as neither.
    pub(crate) fn count_steps(&mut self, path: &[bevy_math::IVec2]) {
        for pair in path.windows(2) {
            let delta = pair[1] - pair[0];
            if delta.x.abs() > 1 || delta.y.abs() > 1 {
                continue;
            }
            if delta.x != 0 && delta.y != 0 {
                self.diagonal_steps += 1;
            } else {
                self.cardinal_steps += 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bevy_math::ivec2;

    #[test]
    fn test_reset() {
        let mut stats = SearchStats {
            iterations: 12,
            nodes_explored: 9,
            success: true,
            last_error: Some("max iterations exceeded".into()),
            ..SearchStats::default()
        };
        stats.reset();
        assert_eq!(stats, SearchStats::default());
    }

    #[test]
    fn test_count_steps() {
        let mut stats = SearchStats::default();
        let path = [
            ivec2(0, 0),
            ivec2(1, 0),
            ivec2(2, 1),
            ivec2(2, 2),
            ivec2(7, 2), // any-angle segment, not a step
        ];
        stats.count_steps(&path);
        assert_eq!(stats.cardinal_steps, 2);
        assert_eq!(stats.diagonal_steps, 1);
    }
}
