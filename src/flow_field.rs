#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::astar::{grid_astar, SearchOutcome};
use crate::{
    euclidean, CompositionRule, Fingerprint, FlowFieldConfig, Grid, PathResult, ResultCache,
    SearchConfig, SearchStats, ValidationReport, ERROR_GOAL_BLOCKED,
    ERROR_GOAL_OUT_OF_BOUNDS, ERROR_MAX_ITERATIONS, ERROR_NO_GOALS, ERROR_NO_PATH,
    ERROR_START_BLOCKED, ERROR_START_OUT_OF_BOUNDS,
};
use bevy_math::{IVec2, Vec2};
use fxhash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// One cell of a derived flow field.
///
/// `valid` holds exactly when the cell is walkable and has a neighbour with
/// strictly lower integration cost; goal cells and unreachable cells carry a
/// zero vector.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowCell {
    /// Local best direction toward the goal set.
    pub direction: Vec2,
    /// Length of the un-normalized step vector.
    pub magnitude: f32,
    /// Whether this cell participates in the flow.
    pub valid: bool,
}

impl FlowCell {
    const INVALID: Self = Self {
        direction: Vec2::ZERO,
        magnitude: 0.0,
        valid: false,
    };
}

/// Output of [FlowFieldGenerator::generate]: the integration cost field, the
/// derived direction field, and run statistics.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FlowFieldResult {
    pub success: bool,
    pub width: u32,
    pub height: u32,
    /// Cost-to-nearest-goal per cell, row-major. Unreachable cells hold the
    /// configured `max_cost`.
    pub integration_field: Vec<f32>,
    /// Direction field, row-major.
    pub flow_field: Vec<FlowCell>,
    /// The goal cells that seeded the field (walkable ones only).
    pub goals: Vec<IVec2>,
    pub error: Option<String>,
    pub stats: SearchStats,
}

impl FlowFieldResult {
    fn failure(error: impl Into<String>, mut stats: SearchStats) -> Self {
        let error = error.into();
        stats.record_failure(&error);
        Self {
            success: false,
            width: 0,
            height: 0,
            integration_field: Vec::new(),
            flow_field: Vec::new(),
            goals: Vec::new(),
            error: Some(error),
            stats,
        }
    }

    #[inline]
    fn index(&self, p: IVec2) -> Option<usize> {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < self.width && (p.y as u32) < self.height {
            Some(p.y as usize * self.width as usize + p.x as usize)
        } else {
            None
        }
    }

    /// Integration cost at `p`, or `None` out of bounds.
    #[inline]
    #[must_use]
    pub fn integration_cost(&self, p: IVec2) -> Option<f32> {
        self.index(p).map(|i| self.integration_field[i])
    }

    /// Flow cell at `p`, or `None` out of bounds.
    #[inline]
    #[must_use]
    pub fn flow(&self, p: IVec2) -> Option<&FlowCell> {
        self.index(p).map(|i| &self.flow_field[i])
    }
}

/// Dijkstra frontier entry, ordered by cost ascending. Stale entries are
/// skipped on pop.
struct FrontierEntry {
    cost: f32,
    index: usize,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost.eq(&other.cost)
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}

/// Single-source multi-target field generator for many-agent goal seeking.
///
/// Generates a Dijkstra integration field from the goal set, derives a
/// per-cell steering direction from it, and replays individual or crowd
/// agents across the field.
#[derive(Debug)]
pub struct FlowFieldGenerator {
    config: FlowFieldConfig,
    stats: SearchStats,
    cache: ResultCache<FlowFieldResult>,
}

impl FlowFieldGenerator {
    /// Create a generator with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FlowFieldConfig::default()).unwrap()
    }

    /// Create a generator with the given configuration.
    pub fn with_config(config: FlowFieldConfig) -> Result<Self, crate::ConfigError> {
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
    pub fn config(&self) -> &FlowFieldConfig {
        &self.config
    }

    /// Replace the configuration after validating it. Clears the result cache.
    pub fn update_configuration(
        &mut self,
        config: FlowFieldConfig,
    ) -> Result<(), crate::ConfigError> {
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

    /// Validate a steering query against the grid without running it.
    #[must_use]
    pub fn validate_grid(&self, grid: &Grid, start: IVec2, goals: &[IVec2]) -> ValidationReport {
        crate::validate_goal_set(
            grid,
            start,
            goals,
            &crate::ValidationOptions {
                allow_diagonal: self.config.allow_diagonal,
                diagonal_only_when_clear: self.config.diagonal_only_when_clear,
                check_connectivity: false,
            },
        )
    }

    fn fingerprint(&self, grid: &Grid, goals: &[IVec2]) -> u64 {
        Fingerprint::of_grid(grid)
            .points(goals)
            .flag(self.config.allow_diagonal)
            .flag(self.config.diagonal_only_when_clear)
            .flag(self.config.use_manhattan_distance)
            .flag(self.config.normalize_flow_vectors)
            .flag(self.config.use_early_termination)
            .flag(self.config.use_multi_goal)
            .value(self.config.cardinal_cost)
            .value(self.config.diagonal_cost)
            .value(self.config.max_cost)
            .int(self.config.max_iterations)
            .finish()
    }

    /// Generate the integration and flow fields for a goal set.
    ///
    /// The set of cells at integration cost zero is the walkable subset of
    /// `goals`; non-walkable goals are ignored. When every goal is unusable,
    /// the call fails and both fields are empty.
    pub fn generate(&mut self, grid: &Grid, goals: &[IVec2]) -> FlowFieldResult {
        let started = Instant::now();
        self.stats.reset();

        if goals.is_empty() {
            return self.fail(ERROR_NO_GOALS, started);
        }
        let considered: &[IVec2] = if self.config.use_multi_goal {
            goals
        } else {
            &goals[..1]
        };
        let usable: Vec<IVec2> = considered
            .iter()
            .copied()
            .filter(|&g| grid.is_walkable(g))
            .collect();
        if usable.is_empty() {
            let all_out_of_bounds = considered.iter().all(|g| !grid.in_bounds(*g));
            let error = if all_out_of_bounds {
                ERROR_GOAL_OUT_OF_BOUNDS
            } else {
                ERROR_GOAL_BLOCKED
            };
            return self.fail(error, started);
        }

        let key = self.fingerprint(grid, considered);
        if self.config.enable_caching {
            if let Some(mut result) = self.cache.get(key) {
                result.stats.iterations = 0;
                result.stats.execution_time = Duration::ZERO;
                return result;
            }
        }

        let integration = match self.integrate(grid, &usable) {
            Ok(field) => field,
            Err(error) => return self.fail(error, started),
        };
        let flow = self.derive_flow(grid, &integration);

        self.stats.success = true;
        self.stats.execution_time = started.elapsed();
        let result = FlowFieldResult {
            success: true,
            width: grid.width(),
            height: grid.height(),
            integration_field: integration,
            flow_field: flow,
            goals: usable,
            error: None,
            stats: self.stats.clone(),
        };
        if self.config.enable_caching {
            self.cache.insert(key, result.clone());
        }
        result
    }

    /// Best-first expansion from the goal set, cost ascending.
    fn integrate(&mut self, grid: &Grid, goals: &[IVec2]) -> Result<Vec<f32>, &'static str> {
        let config = &self.config;
        let stats = &mut self.stats;
        let mut costs = vec![config.max_cost; grid.len()];
        let mut frontier = BinaryHeap::with_capacity(goals.len().max(64));

        for &goal in goals {
            let index = grid.index(goal);
            costs[index] = 0.0;
            frontier.push(FrontierEntry { cost: 0.0, index });
        }

        let cap = if config.max_iterations == 0 {
            grid.len() as u32
        } else {
            config.max_iterations
        };

        while let Some(FrontierEntry { cost, index }) = frontier.pop() {
            if cost > costs[index] {
                continue; // Stale frontier entry
            }
            if config.use_early_termination && cost > config.max_cost {
                break;
            }
            stats.iterations += 1;
            if stats.iterations > cap {
                stats.iterations = cap;
                return Err(ERROR_MAX_ITERATIONS);
            }
            stats.nodes_explored += 1;

            let position = grid.point(index);
            grid.for_each_walkable_neighbor(
                position,
                config.allow_diagonal,
                config.diagonal_only_when_clear,
                |neighbor, direction| {
                    let next_cost = cost + config.metric_step_cost(direction.unit());
                    let neighbor_index = grid.index(neighbor);
                    if next_cost < costs[neighbor_index] && next_cost < config.max_cost {
                        costs[neighbor_index] = next_cost;
                        frontier.push(FrontierEntry {
                            cost: next_cost,
                            index: neighbor_index,
                        });
                    }
                },
            );
        }
        Ok(costs)
    }

    /// Point every walkable cell at its cheapest neighbour.
    ///
    /// Ties are broken by the fixed [crate::Direction::ALL] ordering. Goal
    /// cells (cost zero) and unreachable cells carry an invalid zero vector.
    fn derive_flow(&self, grid: &Grid, integration: &[f32]) -> Vec<FlowCell> {
        let config = &self.config;
        let mut flow = vec![FlowCell::INVALID; integration.len()];

        for index in 0..integration.len() {
            let position = grid.point(index);
            if !grid.is_walkable(position) {
                continue;
            }
            let own_cost = integration[index];
            if own_cost >= config.max_cost || own_cost == 0.0 {
                continue;
            }

            let mut best_cost = own_cost;
            let mut best_step: Option<IVec2> = None;
            grid.for_each_walkable_neighbor(
                position,
                config.allow_diagonal,
                config.diagonal_only_when_clear,
                |neighbor, direction| {
                    let neighbor_cost = integration[grid.index(neighbor)];
                    if neighbor_cost < best_cost {
                        best_cost = neighbor_cost;
                        best_step = Some(direction.unit());
                    }
                },
            );

            if let Some(step) = best_step {
                let vector = step.as_vec2();
                let magnitude = vector.length();
                flow[index] = FlowCell {
                    direction: if config.normalize_flow_vectors {
                        vector / magnitude
                    } else {
                        vector
                    },
                    magnitude,
                    valid: true,
                };
            }
        }
        flow
    }

    /// Steer a single agent from `start` across a generated field until it
    /// reaches a goal cell.
    ///
    /// The walk follows each cell's flow vector rounded to the nearest cell
    /// step. A cell without valid flow, a revisited cell (cycle) or an
    /// unreachable start fails the walk, unless `use_astar_fallback` is
    /// configured, in which case the remainder is planned with A* toward the
    /// nearest goal.
    pub fn find_agent_path(&mut self, grid: &Grid, start: IVec2, field: &FlowFieldResult) -> PathResult {
        let started = Instant::now();
        self.stats.reset();

        if !field.success || field.width != grid.width() || field.height != grid.height() {
            return self.fail_path(ERROR_NO_PATH, started);
        }
        if !grid.in_bounds(start) {
            return self.fail_path(ERROR_START_OUT_OF_BOUNDS, started);
        }
        if !grid.is_walkable(start) {
            return self.fail_path(ERROR_START_BLOCKED, started);
        }
        if field.integration_cost(start).unwrap() >= self.config.max_cost {
            return self.fail_path(ERROR_NO_PATH, started);
        }

        let mut path = vec![start];
        let mut visited: FxHashSet<IVec2> = FxHashSet::default();
        visited.insert(start);
        let mut total_cost = 0.0;
        let mut current = start;

        for _ in 0..grid.len() {
            self.stats.iterations += 1;
            if field.integration_cost(current) == Some(0.0) {
                self.stats.success = true;
                self.stats.count_steps(&path);
                self.stats.execution_time = started.elapsed();
                return PathResult {
                    success: true,
                    path,
                    total_cost,
                    explored: None,
                    error: None,
                    stats: self.stats.clone(),
                };
            }

            let flow = field.flow(current).unwrap();
            let next = if flow.valid {
                current
                    + IVec2::new(
                        flow.direction.x.round() as i32,
                        flow.direction.y.round() as i32,
                    )
            } else {
                current // No progress possible
            };

            let stuck = !flow.valid || !grid.is_walkable(next) || !visited.insert(next);
            if stuck {
                if self.config.use_astar_fallback {
                    return self.fallback_path(grid, path, total_cost, field, started);
                }
                return self.fail_path(ERROR_NO_PATH, started);
            }

            total_cost += self.config.metric_step_cost(next - current);
            path.push(next);
            current = next;
        }
        self.fail_path(ERROR_MAX_ITERATIONS, started)
    }

    /// Continue a stalled walk with A* toward the nearest goal, joining the
    /// two path segments.
    fn fallback_path(
        &mut self,
        grid: &Grid,
        walked: Vec<IVec2>,
        walked_cost: f32,
        field: &FlowFieldResult,
        started: Instant,
    ) -> PathResult {
        let current = *walked.last().unwrap();
        let goal = field
            .goals
            .iter()
            .copied()
            .min_by(|a, b| {
                euclidean(current, *a)
                    .partial_cmp(&euclidean(current, *b))
                    .unwrap_or(Ordering::Equal)
            })
            .unwrap();

        let search_config = SearchConfig {
            allow_diagonal: self.config.allow_diagonal,
            diagonal_only_when_clear: self.config.diagonal_only_when_clear,
            cardinal_cost: self.config.cardinal_cost,
            diagonal_cost: self.config.diagonal_cost,
            ..SearchConfig::default()
        };
        let outcome = grid_astar(
            grid,
            current,
            goal,
            &search_config,
            |_| true,
            &mut self.stats,
            None,
        );
        match outcome {
            SearchOutcome::Found { path, cost } => {
                let mut joined = walked;
                joined.extend_from_slice(&path[1..]);
                self.stats.success = true;
                self.stats.count_steps(&joined);
                self.stats.execution_time = started.elapsed();
                PathResult {
                    success: true,
                    path: joined,
                    total_cost: walked_cost + cost,
                    explored: None,
                    error: None,
                    stats: self.stats.clone(),
                }
            }
            _ => self.fail_path(ERROR_NO_PATH, started),
        }
    }

    /// Replay a crowd of agents across one field, every agent stepping in
    /// lockstep.
    ///
    /// Without collision avoidance each agent independently follows the
    /// steepest descent, which is exactly [FlowFieldGenerator::find_agent_path].
    /// With `use_collision_avoidance`, descent candidates are biased by a
    /// separation penalty from other agents within
    /// `collision_avoidance_radius`, spreading the crowd across equivalent
    /// descents.
    pub fn simulate_crowd(
        &mut self,
        grid: &Grid,
        starts: &[IVec2],
        field: &FlowFieldResult,
    ) -> Vec<PathResult> {
        if !self.config.use_collision_avoidance {
            return starts
                .iter()
                .map(|&start| self.find_agent_path(grid, start, field))
                .collect();
        }

        struct Agent {
            position: IVec2,
            path: Vec<IVec2>,
            cost: f32,
            done: bool,
            failed: bool,
        }

        let started = Instant::now();
        self.stats.reset();

        let mut agents: Vec<Agent> = starts
            .iter()
            .map(|&start| {
                let reachable = grid.is_walkable(start)
                    && field.integration_cost(start).is_some_and(|c| c < self.config.max_cost);
                Agent {
                    position: start,
                    path: vec![start],
                    cost: 0.0,
                    done: reachable && field.integration_cost(start) == Some(0.0),
                    failed: !reachable,
                }
            })
            .collect();

        let radius = self.config.collision_avoidance_radius;
        for _ in 0..grid.len() {
            if agents.iter().all(|a| a.done || a.failed) {
                break;
            }
            let positions: Vec<(usize, IVec2)> = agents
                .iter()
                .enumerate()
                .filter(|(_, a)| !a.done && !a.failed)
                .map(|(i, a)| (i, a.position))
                .collect();

            for index in 0..agents.len() {
                if agents[index].done || agents[index].failed {
                    continue;
                }
                let position = agents[index].position;
                let own_cost = field.integration_cost(position).unwrap();

                // Separation repulsion: uniform weight per nearby agent,
                // scaled by how deep inside the radius it sits.
                let penalty = |cell: IVec2| -> f32 {
                    positions
                        .iter()
                        .filter(|(i, _)| *i != index)
                        .map(|(_, other)| {
                            let distance = euclidean(cell, *other);
                            if distance < radius {
                                (radius - distance) / radius * self.config.cardinal_cost
                            } else {
                                0.0
                            }
                        })
                        .sum()
                };

                let mut best: Option<(f32, IVec2)> = None;
                grid.for_each_walkable_neighbor(
                    position,
                    self.config.allow_diagonal,
                    self.config.diagonal_only_when_clear,
                    |neighbor, _| {
                        let neighbor_cost = field.integration_cost(neighbor).unwrap();
                        if neighbor_cost >= own_cost {
                            return;
                        }
                        let score = neighbor_cost + penalty(neighbor);
                        if best.map_or(true, |(s, _)| score < s) {
                            best = Some((score, neighbor));
                        }
                    },
                );

                match best {
                    Some((_, next)) => {
                        let agent = &mut agents[index];
                        agent.cost += self.config.metric_step_cost(next - agent.position);
                        agent.position = next;
                        agent.path.push(next);
                        if field.integration_cost(next) == Some(0.0) {
                            agent.done = true;
                        }
                    }
                    None => agents[index].failed = true,
                }
            }
            self.stats.iterations += 1;
        }

        self.stats.success = agents.iter().all(|a| a.done);
        self.stats.execution_time = started.elapsed();

        agents
            .into_iter()
            .map(|agent| {
                if agent.done {
                    let mut stats = self.stats.clone();
                    stats.count_steps(&agent.path);
                    PathResult {
                        success: true,
                        path: agent.path,
                        total_cost: agent.cost,
                        explored: None,
                        error: None,
                        stats,
                    }
                } else {
                    PathResult::failure(ERROR_NO_PATH, self.stats.clone())
                }
            })
            .collect()
    }

    /// Compose several fields over the same grid into one, per-cell.
    ///
    /// `weights` applies to [CompositionRule::WeightedAverage] and defaults
    /// to uniform. The flow field of the result is re-derived from the
    /// composed integration field, so the monotonicity invariant holds for
    /// the composite as well.
    pub fn compose_fields(
        &self,
        grid: &Grid,
        fields: &[&FlowFieldResult],
        rule: CompositionRule,
        weights: Option<&[f32]>,
    ) -> FlowFieldResult {
        let started = Instant::now();
        let mut stats = SearchStats::default();

        if fields.is_empty()
            || fields.iter().any(|f| {
                !f.success || f.width != grid.width() || f.height != grid.height()
            })
        {
            return FlowFieldResult::failure("no composable fields provided", stats);
        }
        if let Some(weights) = weights {
            if weights.len() != fields.len() {
                return FlowFieldResult::failure(
                    "weight count does not match field count",
                    stats,
                );
            }
        }

        let len = grid.len();
        let max_cost = self.config.max_cost;
        let mut integration = Vec::with_capacity(len);
        for index in 0..len {
            let combined = match rule {
                CompositionRule::Minimum => fields
                    .iter()
                    .map(|f| f.integration_field[index])
                    .fold(f32::INFINITY, f32::min),
                CompositionRule::Maximum => fields
                    .iter()
                    .map(|f| f.integration_field[index])
                    .fold(0.0, f32::max),
                CompositionRule::WeightedAverage => {
                    if fields.iter().any(|f| f.integration_field[index] >= max_cost) {
                        max_cost
                    } else {
                        let total: f32 = match weights {
                            Some(weights) => fields
                                .iter()
                                .zip(weights)
                                .map(|(f, w)| f.integration_field[index] * w)
                                .sum(),
                            None => fields.iter().map(|f| f.integration_field[index]).sum(),
                        };
                        let divisor = match weights {
                            Some(weights) => weights.iter().sum::<f32>(),
                            None => fields.len() as f32,
                        };
                        total / divisor
                    }
                }
            };
            integration.push(combined.min(max_cost));
        }

        let flow = self.derive_flow(grid, &integration);
        let mut goals: Vec<IVec2> = Vec::new();
        for field in fields {
            for &goal in &field.goals {
                if integration[grid.index(goal)] == 0.0 && !goals.contains(&goal) {
                    goals.push(goal);
                }
            }
        }

        stats.success = true;
        stats.execution_time = started.elapsed();
        FlowFieldResult {
            success: true,
            width: grid.width(),
            height: grid.height(),
            integration_field: integration,
            flow_field: flow,
            goals,
            error: None,
            stats,
        }
    }

    fn fail(&mut self, error: impl Into<String>, started: Instant) -> FlowFieldResult {
        let error = error.into();
        self.stats.record_failure(&error);
        self.stats.execution_time = started.elapsed();
        FlowFieldResult::failure(error, self.stats.clone())
    }

    fn fail_path(&mut self, error: impl Into<String>, started: Instant) -> PathResult {
        let error = error.into();
        self.stats.record_failure(&error);
        self.stats.execution_time = started.elapsed();
        PathResult::failure(error, self.stats.clone())
    }
}

impl Default for FlowFieldGenerator {
    fn default() -> Self {
        Self::new()
    }
}
