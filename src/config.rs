#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{diagonal_distance, euclidean, manhattan, octile, LosOptions};
use bevy_math::IVec2;
use std::f32::consts::SQRT_2;
use thiserror::Error;

/// Errors raised by configuration validation.
///
/// Configuration errors are fail-fast: they are returned from constructors and
/// `update_configuration`, never carried inside search results.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("movement costs must be positive, got cardinal {cardinal} / diagonal {diagonal}")]
    NonPositiveCost { cardinal: f32, diagonal: f32 },

    #[error("max iterations must be positive")]
    ZeroMaxIterations,

    #[error("tolerance must be non-negative, got {0}")]
    NegativeTolerance(f32),

    #[error("smoothing factor must be in (0, 1), got {0}")]
    SmoothingFactorOutOfRange(f32),

    #[error("cluster size must be at least 2, got {0}")]
    ClusterSizeTooSmall(u32),

    #[error("entrance width bounds are inverted: min {min} > max {max}")]
    EntranceWidthBounds { min: u32, max: u32 },

    #[error("zero entrance width is not usable")]
    ZeroEntranceWidth,

    #[error("euclidean and manhattan distance flags are mutually exclusive")]
    ConflictingDistanceMetrics,

    #[error("max cost must be positive, got {0}")]
    NonPositiveMaxCost(f32),

    #[error("collision avoidance radius must be non-negative, got {0}")]
    NegativeAvoidanceRadius(f32),
}

/// Distance estimate used to order the open set.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Heuristic {
    Euclidean,
    Manhattan,
    Chebyshev,
    Octile,
    /// The cardinal/diagonal cost model; exact on open 8-connected grids.
    Diagonal,
}

impl Heuristic {
    /// Estimate the remaining cost from `a` to `b`.
    #[inline]
    #[must_use]
    pub fn estimate(self, a: IVec2, b: IVec2, cardinal_cost: f32, diagonal_cost: f32) -> f32 {
        match self {
            Heuristic::Euclidean => euclidean(a, b),
            Heuristic::Manhattan => manhattan(a, b),
            Heuristic::Chebyshev => crate::chebyshev(a, b) as f32,
            Heuristic::Octile => octile(a, b),
            Heuristic::Diagonal => diagonal_distance(a, b, cardinal_cost, diagonal_cost),
        }
    }
}

/// Configuration shared by the grid searchers (A*, Theta*, and the low-level
/// legs of HPA*).
///
/// Callers construct a value (usually from `Default`) and hand it to the
/// planner; `update_configuration` replaces it after validation. Defaults:
/// 8-connected movement, unit cardinal cost, `sqrt(2)` diagonal cost,
/// corner-cutting allowed, tie-breaking on, validation and caching on.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Enable the 8-neighbourhood. When false only cardinal moves are legal.
    pub allow_diagonal: bool,
    /// Forbid corner-cutting: a diagonal step requires both orthogonal side
    /// cells to be walkable.
    pub diagonal_only_when_clear: bool,
    /// Cost of a cardinal step.
    pub cardinal_cost: f32,
    /// Cost of a diagonal step.
    pub diagonal_cost: f32,
    /// Hard cap on search iterations.
    pub max_iterations: u32,
    /// On f ties, prefer deeper nodes (larger g).
    pub use_tie_breaking: bool,
    /// Equality threshold for real-valued comparisons.
    pub tolerance: f32,
    /// Run input validation before searching.
    pub validate_input: bool,
    /// Include a start-to-goal connectivity flood in validation.
    pub check_connectivity: bool,
    /// Consult and populate the result cache.
    pub enable_caching: bool,
    /// Retain the explored cell set in results.
    pub collect_explored: bool,
    /// Open-set ordering heuristic. `None` selects Euclidean for 8-connected
    /// movement and Manhattan for 4-connected, both admissible.
    pub heuristic: Option<Heuristic>,
    /// Line-of-sight options used by Theta*, refinement checks and smoothing.
    pub los: LosOptions,
    /// Post-process returned paths with the optimizer.
    pub use_path_smoothing: bool,
    /// Laplacian relaxation factor in (0, 1).
    pub smoothing_factor: f32,
    /// Smoothing iteration cap.
    pub max_smoothing_iterations: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            diagonal_only_when_clear: false,
            cardinal_cost: 1.0,
            diagonal_cost: SQRT_2,
            max_iterations: 100_000,
            use_tie_breaking: true,
            tolerance: 1e-6,
            validate_input: true,
            check_connectivity: false,
            enable_caching: true,
            collect_explored: false,
            heuristic: None,
            los: LosOptions::default(),
            use_path_smoothing: false,
            smoothing_factor: 0.5,
            max_smoothing_iterations: 10,
        }
    }
}

impl SearchConfig {
    /// Check invariants, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cardinal_cost <= 0.0 || self.diagonal_cost <= 0.0 {
            return Err(ConfigError::NonPositiveCost {
                cardinal: self.cardinal_cost,
                diagonal: self.diagonal_cost,
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroMaxIterations);
        }
        if self.tolerance < 0.0 {
            return Err(ConfigError::NegativeTolerance(self.tolerance));
        }
        if self.use_path_smoothing
            && (self.smoothing_factor <= 0.0 || self.smoothing_factor >= 1.0)
        {
            return Err(ConfigError::SmoothingFactorOutOfRange(self.smoothing_factor));
        }
        Ok(())
    }

    /// The effective open-set heuristic for this configuration.
    #[inline]
    #[must_use]
    pub fn effective_heuristic(&self) -> Heuristic {
        self.heuristic.unwrap_or(if self.allow_diagonal {
            Heuristic::Euclidean
        } else {
            Heuristic::Manhattan
        })
    }
}

/// Rule for composing several integration fields into one.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositionRule {
    Minimum,
    Maximum,
    WeightedAverage,
}

/// Configuration for [crate::FlowFieldGenerator].
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FlowFieldConfig {
    /// Enable the 8-neighbourhood for integration and steering.
    pub allow_diagonal: bool,
    /// Forbid corner-cutting diagonals.
    pub diagonal_only_when_clear: bool,
    /// Cost of a cardinal step.
    pub cardinal_cost: f32,
    /// Cost of a diagonal step.
    pub diagonal_cost: f32,
    /// Integration expansion cap. Zero selects `width * height`.
    pub max_iterations: u32,
    /// Integration cost assigned to unreachable cells; upper bound for all
    /// reachable costs.
    pub max_cost: f32,
    /// Use the cardinal/diagonal (euclidean-like) step cost model.
    pub use_euclidean_distance: bool,
    /// Use the manhattan step cost model (diagonals priced as two cardinal
    /// steps). Mutually exclusive with `use_euclidean_distance`.
    pub use_manhattan_distance: bool,
    /// Rescale flow vectors to unit length.
    pub normalize_flow_vectors: bool,
    /// Stop integrating once the expansion frontier exceeds `max_cost`.
    pub use_early_termination: bool,
    /// Accepted for forward compatibility; no bounding-box pruning pass is
    /// currently performed.
    pub use_goal_bounding: bool,
    /// Permit multiple goal cells per generation call.
    pub use_multi_goal: bool,
    /// Fall back to A* when an agent cannot make flow progress.
    pub use_astar_fallback: bool,
    /// Bias crowd steering away from nearby agents.
    pub use_collision_avoidance: bool,
    /// Separation radius, in cells, for crowd steering.
    pub collision_avoidance_radius: f32,
    /// Run input validation before generating.
    pub validate_input: bool,
    /// Consult and populate the result cache.
    pub enable_caching: bool,
    /// Equality threshold for real-valued comparisons.
    pub tolerance: f32,
}

impl Default for FlowFieldConfig {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            diagonal_only_when_clear: false,
            cardinal_cost: 1.0,
            diagonal_cost: SQRT_2,
            max_iterations: 0,
            max_cost: f32::MAX,
            use_euclidean_distance: true,
            use_manhattan_distance: false,
            normalize_flow_vectors: true,
            use_early_termination: false,
            use_goal_bounding: false,
            use_multi_goal: true,
            use_astar_fallback: false,
            use_collision_avoidance: false,
            collision_avoidance_radius: 1.5,
            validate_input: true,
            enable_caching: true,
            tolerance: 1e-6,
        }
    }
}

impl FlowFieldConfig {
    /// Check invariants, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cardinal_cost <= 0.0 || self.diagonal_cost <= 0.0 {
            return Err(ConfigError::NonPositiveCost {
                cardinal: self.cardinal_cost,
                diagonal: self.diagonal_cost,
            });
        }
        if self.use_euclidean_distance && self.use_manhattan_distance {
            return Err(ConfigError::ConflictingDistanceMetrics);
        }
        if self.max_cost <= 0.0 {
            return Err(ConfigError::NonPositiveMaxCost(self.max_cost));
        }
        if self.collision_avoidance_radius < 0.0 {
            return Err(ConfigError::NegativeAvoidanceRadius(
                self.collision_avoidance_radius,
            ));
        }
        if self.tolerance < 0.0 {
            return Err(ConfigError::NegativeTolerance(self.tolerance));
        }
        Ok(())
    }

    /// Movement cost for a single-cell step under the selected metric.
    #[inline]
    #[must_use]
    pub(crate) fn metric_step_cost(&self, delta: IVec2) -> f32 {
        if self.use_manhattan_distance {
            self.cardinal_cost * (delta.x.abs() + delta.y.abs()) as f32
        } else {
            crate::step_cost(delta, self.cardinal_cost, self.diagonal_cost)
        }
    }
}

/// Configuration for [crate::HpaPathfinder].
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct HpaConfig {
    /// Cluster side length; trailing clusters may be smaller.
    pub cluster_size: u32,
    /// Shortest walkable border run that produces an entrance.
    pub min_entrance_width: u32,
    /// Runs wider than this get entrances at both endpoints instead of the
    /// midpoint.
    pub max_entrance_width: u32,
    /// Merge undersized trailing clusters into their neighbours.
    pub merge_small_clusters: bool,
    /// Flag a representative cell in internally disconnected cluster regions
    /// that have no border entrance.
    pub use_interior_entrances: bool,
    /// Build the cluster hierarchy lazily on the first query.
    pub build_on_demand: bool,
    /// Accept `notify_cells_changed` partial invalidation.
    pub track_dynamic_obstacles: bool,
    /// Smooth refined paths with the optimizer.
    pub use_path_smoothing: bool,
    /// Low-level search configuration for intra-cluster and refinement legs,
    /// validation, caching and the abstract iteration cap.
    pub search: SearchConfig,
}

impl Default for HpaConfig {
    fn default() -> Self {
        Self {
            cluster_size: 8,
            min_entrance_width: 1,
            max_entrance_width: 6,
            merge_small_clusters: true,
            use_interior_entrances: false,
            build_on_demand: true,
            track_dynamic_obstacles: false,
            use_path_smoothing: false,
            search: SearchConfig::default(),
        }
    }
}

impl HpaConfig {
    /// Check invariants, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_size < 2 {
            return Err(ConfigError::ClusterSizeTooSmall(self.cluster_size));
        }
        if self.min_entrance_width == 0 {
            return Err(ConfigError::ZeroEntranceWidth);
        }
        if self.min_entrance_width > self.max_entrance_width {
            return Err(ConfigError::EntranceWidthBounds {
                min: self.min_entrance_width,
                max: self.max_entrance_width,
            });
        }
        self.search.validate()
    }
}
