#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{euclidean, Grid};
use bevy_math::IVec2;

/// Number of clear cells after which an early-terminating query gives up and
/// declares the segment clear.
const EARLY_TERMINATION_STEPS: u32 = 10;

/// Sub-cell sampling step for [LosAlgorithm::RayCast].
const RAY_CAST_STEP: f32 = 0.5;

/// Strategy used to decide whether the segment between two cells is clear.
///
/// All three algorithms share one contract: a clear segment reports
/// `has_los` with the euclidean endpoint distance, a blocked segment reports
/// the first non-walkable cell encountered.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LosAlgorithm {
    /// Integer-only Bresenham traversal. The default.
    #[default]
    Bresenham,
    /// Floating-point stepping along the dominant axis.
    Dda,
    /// Fixed-step sampling along the segment.
    RayCast,
}

/// Options for a line-of-sight query.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LosOptions {
    pub algorithm: LosAlgorithm,
    /// Test the endpoints themselves for walkability.
    pub check_endpoints: bool,
    /// Segments longer than this are rejected without inspection.
    pub max_distance: Option<f32>,
    /// Declare the segment clear after ten unobstructed cells, as a cheap
    /// approximation for long segments.
    pub use_early_termination: bool,
}

impl Default for LosOptions {
    fn default() -> Self {
        Self {
            algorithm: LosAlgorithm::Bresenham,
            check_endpoints: true,
            max_distance: None,
            use_early_termination: false,
        }
    }
}

/// Result of a line-of-sight query.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LosResult {
    /// Whether the segment crosses only walkable cells.
    pub has_los: bool,
    /// Euclidean distance to the endpoint when clear, or to the blocking
    /// cell when not.
    pub distance: f32,
    /// The first non-walkable cell encountered, when blocked.
    pub blocked_at: Option<IVec2>,
    /// Number of cells inspected.
    pub traversed: u32,
}

impl LosResult {
    #[inline]
    fn clear(from: IVec2, to: IVec2, traversed: u32) -> Self {
        Self {
            has_los: true,
            distance: euclidean(from, to),
            blocked_at: None,
            traversed,
        }
    }

    #[inline]
    fn blocked(from: IVec2, at: IVec2, traversed: u32) -> Self {
        Self {
            has_los: false,
            distance: euclidean(from, at),
            blocked_at: Some(at),
            traversed,
        }
    }
}

/// Decide whether the straight segment from `from` to `to` crosses only
/// walkable cells of `grid`.
///
/// Equal endpoints are always clear with distance zero. Cells outside the
/// grid are treated as non-walkable. When `max_distance` is configured,
/// longer segments are rejected without inspecting any cell.
#[must_use]
pub fn line_of_sight(grid: &Grid, from: IVec2, to: IVec2, options: &LosOptions) -> LosResult {
    if from == to {
        // The degenerate segment is always clear; endpoint checking only
        // applies when there is a real segment to trace.
        return LosResult {
            has_los: true,
            distance: 0.0,
            blocked_at: None,
            traversed: 1,
        };
    }

    let length = euclidean(from, to);
    if let Some(max_distance) = options.max_distance {
        if length > max_distance {
            return LosResult {
                has_los: false,
                distance: length,
                blocked_at: None,
                traversed: 0,
            };
        }
    }

    match options.algorithm {
        LosAlgorithm::Bresenham => bresenham_walk(grid, from, to, options),
        LosAlgorithm::Dda => dda_walk(grid, from, to, options),
        LosAlgorithm::RayCast => ray_cast_walk(grid, from, to, options),
    }
}

/// Convenience predicate over [line_of_sight].
#[inline]
#[must_use]
pub fn has_line_of_sight(grid: &Grid, from: IVec2, to: IVec2, options: &LosOptions) -> bool {
    line_of_sight(grid, from, to, options).has_los
}

struct SegmentWalk<'g, 'o> {
    grid: &'g Grid<'g>,
    from: IVec2,
    to: IVec2,
    options: &'o LosOptions,
    traversed: u32,
}

impl<'g, 'o> SegmentWalk<'g, 'o> {
    fn new(grid: &'g Grid, from: IVec2, to: IVec2, options: &'o LosOptions) -> Self {
        Self {
            grid,
            from,
            to,
            options,
            traversed: 0,
        }
    }

    /// Inspect one visited cell. Returns the final result when the walk can
    /// stop here.
    fn visit(&mut self, cell: IVec2) -> Option<LosResult> {
        let endpoint = cell == self.from || cell == self.to;
        if endpoint && !self.options.check_endpoints {
            return None;
        }
        self.traversed += 1;
        if !self.grid.is_walkable(cell) {
            return Some(LosResult::blocked(self.from, cell, self.traversed));
        }
        if self.options.use_early_termination && self.traversed > EARLY_TERMINATION_STEPS {
            return Some(LosResult::clear(self.from, self.to, self.traversed));
        }
        None
    }

    fn finish(self) -> LosResult {
        LosResult::clear(self.from, self.to, self.traversed)
    }
}

/// Integer error-accumulator traversal visiting every cell the segment
/// enters.
fn bresenham_walk(grid: &Grid, from: IVec2, to: IVec2, options: &LosOptions) -> LosResult {
    let mut walk = SegmentWalk::new(grid, from, to, options);

    let d = (to - from).abs();
    let xi = if to.x < from.x { -1 } else { 1 };
    let yi = if to.y < from.y { -1 } else { 1 };
    let mut err = d.x - d.y;
    let mut p = from;

    loop {
        if let Some(result) = walk.visit(p) {
            return result;
        }
        if p == to {
            break;
        }
        let e2 = err * 2;
        if e2 > -d.y {
            err -= d.y;
            p.x += xi;
        }
        if e2 < d.x {
            err += d.x;
            p.y += yi;
        }
    }
    walk.finish()
}

/// Floating-point stepped traversal: one sample per unit of the dominant
/// axis.
fn dda_walk(grid: &Grid, from: IVec2, to: IVec2, options: &LosOptions) -> LosResult {
    let mut walk = SegmentWalk::new(grid, from, to, options);

    let delta = to - from;
    let steps = delta.x.abs().max(delta.y.abs());
    let increment = delta.as_vec2() / steps as f32;

    let mut position = from.as_vec2();
    let mut previous = None;
    for _ in 0..=steps {
        let cell = position.round().as_ivec2();
        if previous != Some(cell) {
            if let Some(result) = walk.visit(cell) {
                return result;
            }
            previous = Some(cell);
        }
        position += increment;
    }
    walk.finish()
}

/// Fixed-step sampling traversal. Sub-cell steps may visit a cell more than
/// once; duplicates are collapsed.
fn ray_cast_walk(grid: &Grid, from: IVec2, to: IVec2, options: &LosOptions) -> LosResult {
    let mut walk = SegmentWalk::new(grid, from, to, options);

    let origin = from.as_vec2();
    let delta = to.as_vec2() - origin;
    let length = delta.length();
    let direction = delta / length;

    let mut travelled = 0.0;
    let mut previous = None;
    while travelled < length {
        let cell = (origin + direction * travelled).round().as_ivec2();
        if previous != Some(cell) {
            if let Some(result) = walk.visit(cell) {
                return result;
            }
            previous = Some(cell);
        }
        travelled += RAY_CAST_STEP;
    }
    if previous != Some(to) {
        if let Some(result) = walk.visit(to) {
            return result;
        }
    }
    walk.finish()
}
