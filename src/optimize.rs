#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{has_line_of_sight, Grid, LosOptions, SearchConfig};
use bevy_math::IVec2;

/// Options for [optimize_path].
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOptions {
    /// Keep the first and last point untouched.
    pub preserve_endpoints: bool,
    /// Smoothing may only move a point where it keeps line of sight to both
    /// neighbours.
    pub require_line_of_sight: bool,
    /// Laplacian relaxation factor in (0, 1).
    pub smoothing_factor: f32,
    /// Smoothing pass cap.
    pub max_smoothing_iterations: u32,
    /// Line-of-sight options for redundancy and smoothing checks.
    pub los: LosOptions,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            preserve_endpoints: true,
            require_line_of_sight: true,
            smoothing_factor: 0.5,
            max_smoothing_iterations: 10,
            los: LosOptions::default(),
        }
    }
}

impl OptimizeOptions {
    /// Derive optimizer options from a search configuration.
    #[must_use]
    pub fn from_search_config(config: &SearchConfig) -> Self {
        Self {
            smoothing_factor: config.smoothing_factor,
            max_smoothing_iterations: config.max_smoothing_iterations,
            los: config.los,
            ..Self::default()
        }
    }
}

/// Counters of one optimizer run.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeStats {
    pub original_length: usize,
    pub optimized_length: usize,
    /// `original_length - optimized_length`.
    pub reduction: usize,
    /// Smoothing passes executed.
    pub iterations: u32,
}

/// An optimized path with its statistics.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedPath {
    pub path: Vec<IVec2>,
    pub points_removed: usize,
    pub stats: OptimizeStats,
}

/// Post-process a path: drop redundant points under line of sight, then
/// relax the survivors toward their neighbours' midpoints.
///
/// Redundancy removal runs to a fixpoint and is therefore idempotent:
/// optimizing an already optimized path removes nothing further.
#[must_use]
pub fn optimize_path(path: &[IVec2], grid: &Grid, options: &OptimizeOptions) -> OptimizedPath {
    let reduced = remove_redundant_points(path, grid, options);
    let points_removed = path.len() - reduced.len();
    let (smoothed, iterations) = smooth_path(&reduced, grid, options);
    OptimizedPath {
        stats: OptimizeStats {
            original_length: path.len(),
            optimized_length: smoothed.len(),
            reduction: path.len() - smoothed.len(),
            iterations,
        },
        path: smoothed,
        points_removed,
    }
}

/// Drop every point whose predecessor can see its successor.
///
/// Passes repeat until no point is removed, so the result is a fixpoint of
/// the reduction.
#[must_use]
pub fn remove_redundant_points(
    path: &[IVec2],
    grid: &Grid,
    options: &OptimizeOptions,
) -> Vec<IVec2> {
    let mut current: Vec<IVec2> = path.to_vec();
    current.dedup();
    if current.len() <= 2 {
        return current;
    }

    loop {
        let mut reduced = Vec::with_capacity(current.len());
        reduced.push(current[0]);
        for i in 1..current.len() - 1 {
            let anchor = *reduced.last().unwrap();
            if !has_line_of_sight(grid, anchor, current[i + 1], &options.los) {
                reduced.push(current[i]);
            }
        }
        reduced.push(*current.last().unwrap());
        let done = reduced.len() == current.len();
        current = reduced;
        if done {
            return current;
        }
    }
}

/// Iterative Laplacian relaxation.
///
/// Each interior point moves a fraction of the way toward the midpoint of
/// its neighbours, rounded back to the grid; a candidate is only accepted
/// when walkable and, under `require_line_of_sight`, when it keeps both
/// adjoining segments clear. With `preserve_endpoints` off, the endpoints
/// relax toward their single neighbour under the same rules.
#[must_use]
pub fn smooth_path(path: &[IVec2], grid: &Grid, options: &OptimizeOptions) -> (Vec<IVec2>, u32) {
    if path.len() < 3 {
        return (path.to_vec(), 0);
    }
    let factor = options.smoothing_factor;
    let mut points = path.to_vec();
    let mut iterations = 0;

    while iterations < options.max_smoothing_iterations {
        iterations += 1;
        let mut moved = false;

        let range = if options.preserve_endpoints {
            1..points.len() - 1
        } else {
            0..points.len()
        };
        for i in range {
            let current = points[i];
            let target = match (i.checked_sub(1), points.get(i + 1).copied()) {
                (Some(previous), Some(next)) => (points[previous] + next).as_vec2() * 0.5,
                (None, Some(next)) => next.as_vec2(),
                (Some(previous), None) => points[previous].as_vec2(),
                (None, None) => unreachable!(),
            };
            let relaxed = current.as_vec2() + (target - current.as_vec2()) * factor;
            let candidate = relaxed.round().as_ivec2();
            if candidate == current || !grid.is_walkable(candidate) {
                continue;
            }
            if options.require_line_of_sight {
                let sees_previous = i == 0
                    || has_line_of_sight(grid, points[i - 1], candidate, &options.los);
                let sees_next = i + 1 == points.len()
                    || has_line_of_sight(grid, candidate, points[i + 1], &options.los);
                if !(sees_previous && sees_next) {
                    continue;
                }
            }
            points[i] = candidate;
            moved = true;
        }
        if !moved {
            break;
        }
    }
    (points, iterations)
}
