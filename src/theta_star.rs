use crate::astar::{reverse_path, CostHolder, FxIndexMap, NodeRecord, NO_PARENT};
use crate::{
    euclidean, has_line_of_sight, optimize_path, path_cost, step_cost, validate_endpoints,
    Fingerprint, Grid, OptimizeOptions, PathResult, ResultCache, SearchConfig, SearchStats,
    ValidationOptions, ValidationReport, ERROR_MAX_ITERATIONS, ERROR_NO_PATH,
};
use bevy_math::IVec2;
use fxhash::FxHashMap;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Upper bound on memoized line-of-sight pairs per search call.
const LOS_MEMO_CAPACITY: usize = 1 << 16;

/// Per-call line-of-sight memo. Theta* re-tests the same (grandparent,
/// neighbour) pairs constantly; memoization keeps that from dominating the
/// run. Bounded so large searches cannot grow it without limit.
struct LosMemo {
    cached: FxHashMap<(IVec2, IVec2), bool>,
}

impl LosMemo {
    fn new() -> Self {
        Self {
            cached: FxHashMap::default(),
        }
    }

    fn check(&mut self, grid: &Grid, from: IVec2, to: IVec2, config: &SearchConfig) -> bool {
        if let Some(&clear) = self.cached.get(&(from, to)) {
            return clear;
        }
        let clear = has_line_of_sight(grid, from, to, &config.los);
        if self.cached.len() < LOS_MEMO_CAPACITY {
            self.cached.insert((from, to), clear);
        }
        clear
    }
}

/// Any-angle shortest path search via line-of-sight parent relaxation.
///
/// The search mirrors A* except at the relaxation step: before accepting the
/// current node as a neighbour's parent, the current node's own parent is
/// tested for line of sight to the neighbour, and adopted instead when the
/// straight segment is cheaper. Consecutive points of the returned path are
/// therefore guaranteed mutually visible but not necessarily adjacent.
#[derive(Debug)]
pub struct ThetaStarPathfinder {
    config: SearchConfig,
    stats: SearchStats,
    cache: ResultCache<PathResult>,
}

impl ThetaStarPathfinder {
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

    /// Replace the configuration after validating it. Clears the result cache.
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
        validate_endpoints(
            grid,
            start,
            goal,
            &ValidationOptions {
                allow_diagonal: self.config.allow_diagonal,
                diagonal_only_when_clear: self.config.diagonal_only_when_clear,
                check_connectivity: self.config.check_connectivity,
            },
        )
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
            .int(self.config.los.algorithm as u32)
            .flag(self.config.los.check_endpoints)
            .flag(self.config.los.use_early_termination)
            .value(self.config.los.max_distance.unwrap_or(f32::NAN))
            .finish()
    }

    /// Find an any-angle shortest path from `start` to `goal`.
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
        let outcome = self.search(grid, start, goal, explored.as_mut());

        let result = match outcome {
            ThetaOutcome::Found { mut path, mut cost } => {
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
            ThetaOutcome::IterationCap => self.fail(ERROR_MAX_ITERATIONS, started),
            ThetaOutcome::Exhausted => self.fail(ERROR_NO_PATH, started),
        };

        if self.config.enable_caching {
            self.cache.insert(key, result.clone());
        }
        result
    }

    fn search(
        &mut self,
        grid: &Grid,
        start: IVec2,
        goal: IVec2,
        mut explored: Option<&mut Vec<IVec2>>,
    ) -> ThetaOutcome {
        let config = &self.config;
        let stats = &mut self.stats;
        if !grid.is_walkable(start) || !grid.is_walkable(goal) {
            return ThetaOutcome::Exhausted;
        }
        let heuristic = config.effective_heuristic();
        let estimate = |p: IVec2| -> f32 {
            heuristic.estimate(p, goal, config.cardinal_cost, config.diagonal_cost)
        };

        let mut memo = LosMemo::new();
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
                return ThetaOutcome::IterationCap;
            }

            let (position, current_g, grandparent) = {
                let (position, record) = parents.get_index(index as usize).unwrap(); // Cannot fail
                (*position, record.g, record.parent)
            };
            if g > current_g {
                continue; // Stale heap entry
            }
            if position == goal {
                let path = reverse_path(&parents, index);
                return ThetaOutcome::Found {
                    path,
                    cost: current_g,
                };
            }

            stats.nodes_explored += 1;
            if let Some(list) = explored.as_mut() {
                list.push(position);
            }

            // The grandparent candidate for parent updates: position's own
            // parent, if it has one.
            let shortcut = (grandparent != NO_PARENT).then(|| {
                let (gp_position, gp_record) = parents.get_index(grandparent as usize).unwrap();
                (*gp_position, gp_record.g)
            });

            grid.for_each_walkable_neighbor(
                position,
                config.allow_diagonal,
                config.diagonal_only_when_clear,
                |neighbor, direction| {
                    let mut parent_index = index;
                    let mut tentative = current_g
                        + step_cost(direction.unit(), config.cardinal_cost, config.diagonal_cost);

                    if let Some((gp_position, gp_g)) = shortcut {
                        stats.line_of_sight_checks += 1;
                        if memo.check(grid, gp_position, neighbor, config) {
                            // Prefer the straight segment on cost ties, so
                            // collinear chains collapse to their endpoints.
                            let through =
                                gp_g + euclidean(gp_position, neighbor) * config.cardinal_cost;
                            if through <= tentative {
                                parent_index = grandparent;
                                tentative = through;
                                stats.parent_updates += 1;
                            }
                        }
                    }

                    let h;
                    let neighbor_index;
                    match parents.entry(neighbor) {
                        indexmap::map::Entry::Vacant(entry) => {
                            h = estimate(neighbor);
                            neighbor_index = entry.index() as u32;
                            entry.insert(NodeRecord {
                                g: tentative,
                                parent: parent_index,
                            });
                        }
                        indexmap::map::Entry::Occupied(mut entry) => {
                            if tentative < entry.get().g {
                                h = estimate(neighbor);
                                neighbor_index = entry.index() as u32;
                                entry.insert(NodeRecord {
                                    g: tentative,
                                    parent: parent_index,
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
        ThetaOutcome::Exhausted
    }

    fn fail(&mut self, error: impl Into<String>, started: Instant) -> PathResult {
        let error = error.into();
        self.stats.record_failure(&error);
        self.stats.execution_time = started.elapsed();
        PathResult::failure(error, self.stats.clone())
    }
}

impl Default for ThetaStarPathfinder {
    fn default() -> Self {
        Self::new()
    }
}

enum ThetaOutcome {
    Found { path: Vec<IVec2>, cost: f32 },
    Exhausted,
    IterationCap,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CellState, GridBuffer, LosOptions, ERROR_GOAL_BLOCKED};
    use bevy_math::ivec2;
    use std::f32::consts::SQRT_2;

    fn open_grid(width: u32, height: u32) -> GridBuffer {
        GridBuffer::filled(width, height, CellState::Walkable).unwrap()
    }

    fn assert_los_connected(path: &[IVec2], grid: &Grid) {
        for pair in path.windows(2) {
            assert!(
                has_line_of_sight(grid, pair[0], pair[1], &LosOptions::default()),
                "segment {:?} not visible",
                pair
            );
        }
    }

    #[test]
    fn test_open_grid_collapses_to_two_points() {
        let buffer = open_grid(3, 3);
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(2, 2));
        assert!(result.success);
        assert_eq!(result.path.first(), Some(&ivec2(0, 0)));
        assert_eq!(result.path.last(), Some(&ivec2(2, 2)));
        // Start and goal are mutually visible, so the path needs one segment.
        assert_eq!(result.path.len(), 2, "{:?}", result.path);
        assert!((result.total_cost - 2.0 * SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn test_wall_gap_becomes_bend_point() {
        let mut buffer = open_grid(10, 10);
        for x in 0..9 {
            buffer.set(ivec2(x, 5), CellState::Obstacle);
        }
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 9));
        assert!(result.success);
        assert!(result.path.contains(&ivec2(9, 5)), "{:?}", result.path);
        assert_los_connected(&result.path, &buffer.view());
        assert!(result.stats.line_of_sight_checks > 0);
    }

    #[test]
    fn test_any_angle_no_shorter_than_optimal() {
        // Theta* cost on an open grid must match the straight-line distance.
        let buffer = open_grid(12, 12);
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(11, 5));
        assert!(result.success);
        let straight = euclidean(ivec2(0, 0), ivec2(11, 5));
        assert!(
            result.total_cost >= straight - 1e-4,
            "cost {} below straight-line {}",
            result.total_cost,
            straight
        );
        assert!(result.total_cost <= straight + 1e-3);
    }

    #[test]
    fn test_parent_updates_reported() {
        let mut buffer = open_grid(16, 16);
        buffer.set(ivec2(8, 8), CellState::Obstacle);
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(15, 13));
        assert!(result.success);
        assert!(result.stats.parent_updates > 0);
    }

    #[test]
    fn test_same_start_and_goal() {
        let buffer = open_grid(8, 8);
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(5, 5), ivec2(5, 5));
        assert!(result.success);
        assert_eq!(result.path, vec![ivec2(5, 5)]);
        assert_eq!(result.total_cost, 0.0);
    }

    #[test]
    fn test_blocked_goal_error_matches_astar_vocabulary() {
        let mut buffer = open_grid(6, 6);
        buffer.set(ivec2(5, 5), CellState::Obstacle);
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(5, 5));
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains(ERROR_GOAL_BLOCKED));
    }

    #[test]
    fn test_segments_never_cross_obstacles() {
        let mut buffer = open_grid(20, 20);
        for y in 2..18 {
            buffer.set(ivec2(10, y), CellState::Obstacle);
        }
        let mut pathfinder = ThetaStarPathfinder::new();
        let result = pathfinder.find_path(&buffer.view(), ivec2(2, 10), ivec2(18, 10));
        assert!(result.success);
        assert_los_connected(&result.path, &buffer.view());
    }

    #[test]
    fn test_cache_equivalence() {
        let buffer = open_grid(10, 10);
        let mut pathfinder = ThetaStarPathfinder::new();
        let first = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 3));
        let second = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 3));
        assert_eq!(first.path, second.path);
        assert_eq!(first.total_cost, second.total_cost);
        assert_eq!(second.stats.iterations, 0);
    }
}
