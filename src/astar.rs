use crate::{
    optimize_path, path_cost, step_cost, validate_endpoints, Fingerprint, Grid, OptimizeOptions,
    PathResult, ResultCache, SearchConfig, SearchStats, ValidationOptions, ValidationReport,
    ERROR_MAX_ITERATIONS, ERROR_NO_PATH,
};
use bevy_math::IVec2;
use fxhash::FxHasher;
use indexmap::map::Entry::{Occupied, Vacant};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::BuildHasherDefault;
use std::time::{Duration, Instant};

// Adapted from: https://github.com/evenfurther/pathfinding/blob/main/src/directed/astar.rs
// Released under a dual Apache 2.0 / MIT free software license.

pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Sentinel parent index for the start node.
pub(crate) const NO_PARENT: u32 = u32::MAX;

/// Per-node search state, stored in an insertion-ordered arena keyed by
/// coordinate. The arena index doubles as the node identity, so parent
/// references are plain integers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeRecord {
    pub g: f32,
    pub parent: u32,
}

/// Open-set entry. The heap orders by `f` ascending with an optional
/// secondary preference for deeper nodes; stale entries are skipped on pop
/// by comparing `g` against the arena.
pub(crate) struct CostHolder {
    pub f: f32,
    pub g: f32,
    pub tie: f32,
    pub index: u32,
}

impl PartialEq for CostHolder {
    fn eq(&self, other: &Self) -> bool {
        self.f.eq(&other.f) && self.tie.eq(&other.tie)
    }
}

impl Eq for CostHolder {}

impl PartialOrd for CostHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CostHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on f for a min-heap; ties prefer the larger tie key.
        match other.f.partial_cmp(&self.f).unwrap_or(Ordering::Equal) {
            Ordering::Equal => self
                .tie
                .partial_cmp(&other.tie)
                .unwrap_or(Ordering::Equal),
            ordering => ordering,
        }
    }
}

/// Raw outcome of one search run, before result packaging.
pub(crate) enum SearchOutcome {
    Found { path: Vec<IVec2>, cost: f32 },
    Exhausted,
    IterationCap,
}

/// Walk parent links from `index` back to the start and reverse.
pub(crate) fn reverse_path(parents: &FxIndexMap<IVec2, NodeRecord>, index: u32) -> Vec<IVec2> {
    let mut i = index;
    let mut path: Vec<IVec2> = std::iter::from_fn(|| {
        // The NO_PARENT sentinel stops iteration: it indexes past the arena.
        parents.get_index(i as usize).map(|(position, record)| {
            i = record.parent;
            *position
        })
    })
    .collect();
    path.reverse();
    path
}

/// Grid A* over the arena/heap skeleton.
///
/// `allowed` restricts the searchable region (used by HPA* to confine legs
/// to clusters); pass `|_| true` for whole-grid searches. The caller owns
/// validation, caching and timing.
pub(crate) fn grid_astar<F>(
    grid: &Grid,
    start: IVec2,
    goal: IVec2,
    config: &SearchConfig,
    allowed: F,
    stats: &mut SearchStats,
    mut explored: Option<&mut Vec<IVec2>>,
) -> SearchOutcome
where
    F: Fn(IVec2) -> bool,
{
    if !grid.is_walkable(start) || !grid.is_walkable(goal) || !allowed(start) || !allowed(goal) {
        return SearchOutcome::Exhausted;
    }

    let heuristic = config.effective_heuristic();
    let estimate = |p: IVec2| -> f32 {
        heuristic.estimate(p, goal, config.cardinal_cost, config.diagonal_cost)
    };

    let mut to_see = BinaryHeap::with_capacity(512);
    let mut parents: FxIndexMap<IVec2, NodeRecord> = FxIndexMap::default();
    parents.insert(
        start,
        NodeRecord {
            g: 0.0,
            parent: NO_PARENT,
        },
    );
    to_see.push(CostHolder {
        f: estimate(start),
        g: 0.0,
        tie: 0.0,
        index: 0,
    });

    while let Some(CostHolder { g, index, .. }) = to_see.pop() {
        stats.iterations += 1;
        if stats.iterations > config.max_iterations {
            stats.iterations = config.max_iterations;
            return SearchOutcome::IterationCap;
        }

        let (position, current_g) = {
            let (position, record) = parents.get_index(index as usize).unwrap(); // Cannot fail
            (*position, record.g)
        };
        if g > current_g {
            continue; // Stale heap entry
        }
        if position == goal {
            let path = reverse_path(&parents, index);
            return SearchOutcome::Found {
                path,
                cost: current_g,
            };
        }

        stats.nodes_explored += 1;
        if let Some(list) = explored.as_mut() {
            list.push(position);
        }

        grid.for_each_walkable_neighbor(
            position,
            config.allow_diagonal,
            config.diagonal_only_when_clear,
            |neighbor, direction| {
                if !allowed(neighbor) {
                    return;
                }
                let tentative = current_g
                    + step_cost(direction.unit(), config.cardinal_cost, config.diagonal_cost);
                let h;
                let neighbor_index;
                match parents.entry(neighbor) {
                    Vacant(entry) => {
                        h = estimate(neighbor);
                        neighbor_index = entry.index() as u32;
                        entry.insert(NodeRecord {
                            g: tentative,
                            parent: index,
                        });
                    }
                    Occupied(mut entry) => {
                        if tentative < entry.get().g {
                            h = estimate(neighbor);
                            neighbor_index = entry.index() as u32;
                            entry.insert(NodeRecord {
                                g: tentative,
                                parent: index,
                            });
                        } else {
                            return;
                        }
                    }
                }
                to_see.push(CostHolder {
                    f: tentative + h,
                    g: tentative,
                    tie: if config.use_tie_breaking { tentative } else { 0.0 },
                    index: neighbor_index,
                });
            },
        );
    }
    SearchOutcome::Exhausted
}

/// Optimal grid-step shortest path search with heuristic `f = g + h`.
///
/// The instance owns its configuration, per-run statistics and result
/// cache; the grid is borrowed read-only per call. Instances are not
/// thread-safe.
#[derive(Debug)]
pub struct AStarPathfinder {
    config: SearchConfig,
    stats: SearchStats,
    cache: ResultCache<PathResult>,
}

impl AStarPathfinder {
    /// Create a pathfinder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SearchConfig::default()).unwrap()
    }

    /// Create a pathfinder with the given configuration.
    pub fn with_config(config: SearchConfig) -> Result<Self, crate::ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            stats: SearchStats::default(),
            cache: ResultCache::default(),
        })
    }

    /// The active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Replace the configuration after validating it. Clears the result
    /// cache, since cached fingerprints embed configuration fields.
    pub fn update_configuration(&mut self, config: SearchConfig) -> Result<(), crate::ConfigError> {
        config.validate()?;
        self.config = config;
        self.cache.clear();
        Ok(())
    }

    /// Counters of the most recent run.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Zero the per-run counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Cache hit/miss counters and occupancy.
    #[must_use]
    pub fn cache_stats(&self) -> crate::CacheStats {
        self.cache.stats()
    }

    /// Drop all cached results and reset the cache counters.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Validate a query against the grid without running it.
    #[must_use]
    pub fn validate_grid(&self, grid: &Grid, start: IVec2, goal: IVec2) -> ValidationReport {
        validate_endpoints(grid, start, goal, &self.validation_options())
    }

    fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            allow_diagonal: self.config.allow_diagonal,
            diagonal_only_when_clear: self.config.diagonal_only_when_clear,
            check_connectivity: self.config.check_connectivity,
        }
    }

    fn fingerprint(&self, grid: &Grid, start: IVec2, goal: IVec2) -> u64 {
        Fingerprint::of_grid(grid)
            .point(start)
            .point(goal)
            .flag(self.config.allow_diagonal)
            .flag(self.config.diagonal_only_when_clear)
            .flag(self.config.use_tie_breaking)
            .flag(self.config.use_path_smoothing)
            .value(self.config.cardinal_cost)
            .value(self.config.diagonal_cost)
            .value(self.config.smoothing_factor)
            .int(self.config.max_smoothing_iterations)
            .int(self.config.max_iterations)
            .int(self.config.effective_heuristic() as u32)
            .finish()
    }

    /// Find the shortest path from `start` to `goal`.
    ///
    /// Failures are reported in the result, never as panics: a blocked or
    /// out-of-bounds endpoint, an exhausted open set, or the iteration cap
    /// all produce `success == false` with a stable `error` string.
    pub fn find_path(&mut self, grid: &Grid, start: IVec2, goal: IVec2) -> PathResult {
        let started = Instant::now();
        self.stats.reset();

        if self.config.validate_input {
            let report = self.validate_grid(grid, start, goal);
            if !report.is_valid {
                return self.fail(report.message(), started);
            }
        }

        let key = self.fingerprint(grid, start, goal);
        if self.config.enable_caching {
            if let Some(mut result) = self.cache.get(key) {
                result.stats.iterations = 0;
                result.stats.execution_time = Duration::ZERO;
                return result;
            }
        }

        let mut explored = self.config.collect_explored.then(Vec::new);
        let outcome = grid_astar(
            grid,
            start,
            goal,
            &self.config,
            |_| true,
            &mut self.stats,
            explored.as_mut(),
        );

        let result = match outcome {
            SearchOutcome::Found { mut path, mut cost } => {
                if self.config.use_path_smoothing {
                    let optimized = optimize_path(
                        &path,
                        grid,
                        &OptimizeOptions::from_search_config(&self.config),
                    );
                    path = optimized.path;
                    cost = path_cost(&path, self.config.cardinal_cost, self.config.diagonal_cost);
                }
                self.stats.count_steps(&path);
                self.stats.success = true;
                self.stats.execution_time = started.elapsed();
                PathResult {
                    success: true,
                    path,
                    total_cost: cost,
                    explored,
                    error: None,
                    stats: self.stats.clone(),
                }
            }
            SearchOutcome::IterationCap => self.fail(ERROR_MAX_ITERATIONS, started),
            SearchOutcome::Exhausted => self.fail(ERROR_NO_PATH, started),
        };

        if self.config.enable_caching {
            self.cache.insert(key, result.clone());
        }
        result
    }

    fn fail(&mut self, error: impl Into<String>, started: Instant) -> PathResult {
        let error = error.into();
        self.stats.record_failure(&error);
        self.stats.execution_time = started.elapsed();
        PathResult::failure(error, self.stats.clone())
    }
}

impl Default for AStarPathfinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{chebyshev, CellState, GridBuffer, ERROR_START_BLOCKED};
    use bevy_math::ivec2;
    use std::f32::consts::SQRT_2;

    fn open_grid(width: u32, height: u32) -> GridBuffer {
        GridBuffer::filled(width, height, CellState::Walkable).unwrap()
    }

    fn assert_contiguous(path: &[IVec2], grid: &Grid) {
        for pair in path.windows(2) {
            assert_eq!(chebyshev(pair[0], pair[1]), 1, "{:?}", pair);
            assert!(grid.is_walkable(pair[0]));
            assert!(grid.is_walkable(pair[1]));
        }
    }

    #[test]
    fn test_diagonal_shortcut_on_open_grid() {
        let buffer = open_grid(3, 3);
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(2, 2));
        assert!(result.success);
        assert_eq!(result.path.len(), 3);
        assert_eq!(result.path[0], ivec2(0, 0));
        assert_eq!(result.path[2], ivec2(2, 2));
        assert!((result.total_cost - 2.0 * SQRT_2).abs() < 1e-5);
        assert_contiguous(&result.path, &buffer.view());
    }

    #[test]
    fn test_same_start_and_goal() {
        let buffer = open_grid(8, 8);
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(5, 5), ivec2(5, 5));
        assert!(result.success);
        assert_eq!(result.path, vec![ivec2(5, 5)]);
        assert_eq!(result.total_cost, 0.0);
    }

    #[test]
    fn test_wall_row_with_gap() {
        // Row y = 5 is all obstacles except x = 9.
        let mut buffer = open_grid(10, 10);
        for x in 0..9 {
            buffer.set(ivec2(x, 5), CellState::Obstacle);
        }
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 9));
        assert!(result.success);
        assert!(result.path.contains(&ivec2(9, 5)), "{:?}", result.path);
        assert_contiguous(&result.path, &buffer.view());
    }

    #[test]
    fn test_fully_walled_row_fails() {
        let mut buffer = open_grid(10, 10);
        for x in 0..10 {
            buffer.set(ivec2(x, 5), CellState::Obstacle);
        }
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 9));
        assert!(!result.success);
        assert!(result.path.is_empty());
        assert_eq!(result.total_cost, 0.0);
        assert_eq!(result.error.as_deref(), Some(ERROR_NO_PATH));
    }

    #[test]
    fn test_optimal_cost_four_connected() {
        // Manhattan heuristic on a 4-connected grid returns the exact cost.
        let buffer = open_grid(6, 6);
        let config = SearchConfig {
            allow_diagonal: false,
            ..SearchConfig::default()
        };
        let mut pathfinder = AStarPathfinder::with_config(config).unwrap();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(5, 3));
        assert!(result.success);
        assert!((result.total_cost - 8.0).abs() < 1e-6);
        for pair in result.path.windows(2) {
            let delta = pair[1] - pair[0];
            assert_eq!(delta.x.abs() + delta.y.abs(), 1, "cardinal steps only");
        }
    }

    #[test]
    fn test_optimal_cost_eight_connected() {
        let buffer = open_grid(8, 8);
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(7, 3));
        assert!(result.success);
        // diagonal model: sqrt(2) * 3 + 4
        assert!((result.total_cost - (SQRT_2 * 3.0 + 4.0)).abs() < 1e-5);
    }

    #[test]
    fn test_corner_cut_forbidden() {
        // 0 1
        // 1 0
        let mut buffer = open_grid(2, 2);
        buffer.set(ivec2(1, 0), CellState::Obstacle);
        buffer.set(ivec2(0, 1), CellState::Obstacle);
        let config = SearchConfig {
            diagonal_only_when_clear: true,
            ..SearchConfig::default()
        };
        let mut pathfinder = AStarPathfinder::with_config(config).unwrap();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(1, 1));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(ERROR_NO_PATH));
    }

    #[test]
    fn test_blocked_start_reports_stable_error() {
        let mut buffer = open_grid(4, 4);
        buffer.set(ivec2(0, 0), CellState::Obstacle);
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(3, 3));
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains(ERROR_START_BLOCKED));
    }

    #[test]
    fn test_iteration_cap() {
        let buffer = open_grid(32, 32);
        let config = SearchConfig {
            max_iterations: 3,
            ..SearchConfig::default()
        };
        let mut pathfinder = AStarPathfinder::with_config(config).unwrap();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(31, 31));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(ERROR_MAX_ITERATIONS));
        assert_eq!(result.stats.iterations, 3);
    }

    #[test]
    fn test_cache_equivalence() {
        let buffer = open_grid(12, 12);
        let mut pathfinder = AStarPathfinder::new();
        let first = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(11, 4));
        assert!(first.success);
        assert!(first.stats.iterations > 0);

        let second = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(11, 4));
        assert!(second.success);
        assert_eq!(second.path, first.path);
        assert_eq!(second.total_cost, first.total_cost);
        assert_eq!(second.stats.iterations, 0);
        assert_eq!(pathfinder.cache_stats().hits, 1);
    }

    #[test]
    fn test_cache_distinguishes_grid_edits() {
        let mut buffer = open_grid(12, 12);
        let mut pathfinder = AStarPathfinder::new();
        let first = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(11, 11));
        buffer.set(ivec2(5, 5), CellState::Obstacle);
        let second = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(11, 11));
        assert!(first.success && second.success);
        assert!(!second.path.contains(&ivec2(5, 5)));
    }

    #[test]
    fn test_explored_collection_is_opt_in() {
        let buffer = open_grid(6, 6);
        let mut pathfinder = AStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(5, 5));
        assert!(result.explored.is_none());

        let config = SearchConfig {
            collect_explored: true,
            enable_caching: false,
            ..SearchConfig::default()
        };
        let mut pathfinder = AStarPathfinder::with_config(config).unwrap();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(5, 5));
        let explored = result.explored.unwrap();
        assert!(!explored.is_empty());
        assert_eq!(explored[0], ivec2(0, 0));
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let mut buffer = open_grid(4, 4);
        buffer.set(ivec2(3, 3), CellState::Obstacle);
        let config = SearchConfig {
            validate_input: false,
            ..SearchConfig::default()
        };
        let mut pathfinder = AStarPathfinder::with_config(config).unwrap();
        // Surfaces as a runtime search failure instead of a validation error.
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(3, 3));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(ERROR_NO_PATH));
    }
}
