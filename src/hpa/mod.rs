mod cluster;
mod graph;

pub use self::cluster::{Cluster, ClusterLayer, Entrance};
pub use self::graph::{AbstractEdge, AbstractGraph, EdgeKind};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use self::graph::{abstract_search, AbstractOutcome, IntraCostMemo, QueryLinks};
use crate::astar::{grid_astar, SearchOutcome};
use crate::{
    chebyshev, optimize_path, path_cost, validate_goal_set, Fingerprint, Grid, HpaConfig,
    OptimizeOptions, ResultCache, SearchStats, ValidationOptions, ValidationReport,
    ERROR_MAX_ITERATIONS, ERROR_NO_PATH,
};
use bevy_math::IVec2;
use fxhash::FxHashSet;
use log::debug;
use std::time::{Duration, Instant};

/// Lifecycle of the cluster hierarchy owned by an [HpaPathfinder].
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// No hierarchy has been built yet.
    Unbuilt,
    /// A build is in progress.
    Building,
    /// The hierarchy matches the last seen grid and configuration.
    Ready,
    /// Configuration or grid changes invalidated the hierarchy.
    Stale,
}

/// The outcome of a hierarchical query: the abstract entrance-level path,
/// the refined cell-level path, and the timing split between the two phases.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HpaResult {
    pub success: bool,
    /// Start, the traversed entrance cells in order, and the reached goal.
    pub abstract_path: Vec<IVec2>,
    /// Cell-by-cell path from start to the reached goal.
    pub refined_path: Vec<IVec2>,
    /// Movement cost of `refined_path`.
    pub total_cost: f32,
    /// The goal that was reached, for multi-goal queries.
    pub goal_reached: Option<IVec2>,
    /// Time spent searching the abstract graph.
    pub abstract_time: Duration,
    /// Time spent refining abstract legs into cells.
    pub refinement_time: Duration,
    pub error: Option<String>,
    pub stats: SearchStats,
}

impl HpaResult {
    fn failure(error: impl Into<String>, mut stats: SearchStats) -> Self {
        let error = error.into();
        stats.record_failure(&error);
        Self {
            success: false,
            error: Some(error),
            stats,
            ..Self::default()
        }
    }
}

/// Hierarchical pathfinding over a cached cluster decomposition.
///
/// Preprocessing partitions the grid into clusters, detects border
/// entrances, and builds the abstract entrance graph; queries insert
/// ephemeral start/goal nodes, search the abstract graph, and refine each
/// abstract leg back into cells with cluster-restricted A*. The hierarchy is
/// cached across queries and invalidated when the grid dimensions or the
/// cluster configuration change.
#[derive(Debug)]
pub struct HpaPathfinder {
    config: HpaConfig,
    stats: SearchStats,
    state: BuildState,
    layer: Option<ClusterLayer>,
    graph: Option<AbstractGraph>,
    built_dimensions: Option<(u32, u32)>,
    cache: ResultCache<HpaResult>,
}

impl HpaPathfinder {
    /// Create a pathfinder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HpaConfig::default()).unwrap()
    }

    /// Create a pathfinder with the given configuration.
    pub fn with_config(config: HpaConfig) -> Result<Self, crate::ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            stats: SearchStats::default(),
            state: BuildState::Unbuilt,
            layer: None,
            graph: None,
            built_dimensions: None,
            cache: ResultCache::default(),
        })
    }

    /// The active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HpaConfig {
        &self.config
    }

    /// Replace the configuration after validating it.
    ///
    /// Marks the hierarchy stale and drops the built structures: the cluster
    /// layout and the memoized intra-cluster edge costs both embed the old
    /// configuration. Clears the result cache.
    pub fn update_configuration(&mut self, config: HpaConfig) -> Result<(), crate::ConfigError> {
        config.validate()?;
        self.config = config;
        if self.state == BuildState::Ready {
            self.state = BuildState::Stale;
        }
        self.layer = None;
        self.graph = None;
        self.built_dimensions = None;
        self.cache.clear();
        Ok(())
    }

    /// Current hierarchy lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// The cluster decomposition, once built.
    #[inline]
    #[must_use]
    pub fn cluster_layer(&self) -> Option<&ClusterLayer> {
        self.layer.as_ref()
    }

    /// The abstract entrance graph, once built.
    #[inline]
    #[must_use]
    pub fn abstract_graph(&self) -> Option<&AbstractGraph> {
        self.graph.as_ref()
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

    /// Build (or rebuild) the cluster hierarchy for `grid`.
    pub fn build(&mut self, grid: &Grid) {
        self.state = BuildState::Building;
        // Reuse memoized intra-cluster costs only when the layout is intact.
        let memo = match (&mut self.graph, self.built_dimensions) {
            (Some(graph), Some(dimensions)) if dimensions == (grid.width(), grid.height()) => {
                std::mem::take(&mut graph.memo)
            }
            _ => IntraCostMemo::default(),
        };
        let layer = ClusterLayer::build(grid, &self.config);
        let graph = AbstractGraph::build(grid, &layer, &self.config, memo);
        debug!(
            "built cluster hierarchy: {} clusters, {} entrances, {} edges",
            layer.clusters.len(),
            layer.entrances.len(),
            graph.edge_count()
        );
        self.layer = Some(layer);
        self.graph = Some(graph);
        self.built_dimensions = Some((grid.width(), grid.height()));
        self.state = BuildState::Ready;
    }

    /// Invalidate after in-place grid edits.
    ///
    /// With `track_dynamic_obstacles`, only the clusters containing changed
    /// cells (and their neighbours) lose their memoized intra-cluster edge
    /// costs before the rebuild; everything else is reused. Without it the
    /// whole hierarchy is marked stale and rebuilt on the next query.
    pub fn notify_cells_changed(&mut self, grid: &Grid, cells: &[IVec2]) {
        if cells.is_empty() {
            return;
        }
        self.cache.clear();
        if !self.config.track_dynamic_obstacles
            || self.state != BuildState::Ready
            || self.built_dimensions != Some((grid.width(), grid.height()))
        {
            if self.state == BuildState::Ready {
                self.state = BuildState::Stale;
            }
            return;
        }

        let layer = self.layer.as_ref().unwrap();
        let mut affected: FxHashSet<u32> = FxHashSet::default();
        for &cell in cells {
            if let Some(id) = layer.cluster_at(cell) {
                affected.insert(id);
                for &neighbour in &layer.clusters[id as usize].neighbours {
                    affected.insert(neighbour);
                }
            }
        }
        if let Some(graph) = &mut self.graph {
            graph.memo.retain(|&(cluster, _, _), _| !affected.contains(&cluster));
        }
        debug!("partial invalidation of {} clusters", affected.len());
        self.build(grid);
    }

    /// Validate a query against the grid without running it.
    #[must_use]
    pub fn validate_input(&self, grid: &Grid, start: IVec2, goals: &[IVec2]) -> ValidationReport {
        validate_goal_set(
            grid,
            start,
            goals,
            &ValidationOptions {
                allow_diagonal: self.config.search.allow_diagonal,
                diagonal_only_when_clear: self.config.search.diagonal_only_when_clear,
                check_connectivity: self.config.search.check_connectivity,
            },
        )
    }

    /// Single-goal form of [HpaPathfinder::validate_input].
    #[must_use]
    pub fn validate_grid(&self, grid: &Grid, start: IVec2, goal: IVec2) -> ValidationReport {
        self.validate_input(grid, start, &[goal])
    }

    /// Find a hierarchical path from `start` to `goal`.
    pub fn find_path(&mut self, grid: &Grid, start: IVec2, goal: IVec2) -> HpaResult {
        self.find_path_to_nearest_goal(grid, start, &[goal])
    }

    /// Find a hierarchical path from `start` to the cheapest reachable goal.
    ///
    /// The abstract search treats every goal as a candidate terminal; the
    /// winner is reported in `goal_reached`.
    pub fn find_path_to_nearest_goal(
        &mut self,
        grid: &Grid,
        start: IVec2,
        goals: &[IVec2],
    ) -> HpaResult {
        let started = Instant::now();
        self.stats.reset();

        if self.config.search.validate_input {
            let report = self.validate_input(grid, start, goals);
            if !report.is_valid {
                return self.fail(report.message(), started);
            }
        }
        let usable: Vec<IVec2> = goals
            .iter()
            .copied()
            .filter(|&g| grid.is_walkable(g))
            .collect();

        if usable.contains(&start) {
            self.stats.success = true;
            self.stats.execution_time = started.elapsed();
            return HpaResult {
                success: true,
                abstract_path: vec![start],
                refined_path: vec![start],
                total_cost: 0.0,
                goal_reached: Some(start),
                abstract_time: Duration::ZERO,
                refinement_time: Duration::ZERO,
                error: None,
                stats: self.stats.clone(),
            };
        }

        match self.state {
            BuildState::Ready if self.built_dimensions == Some((grid.width(), grid.height())) => {}
            BuildState::Unbuilt | BuildState::Stale | BuildState::Ready => {
                if !self.config.build_on_demand {
                    return self.fail("cluster hierarchy not built", started);
                }
                self.build(grid);
            }
            BuildState::Building => {
                return self.fail("cluster hierarchy build in progress", started);
            }
        }

        let key = self.fingerprint(grid, start, &usable);
        if self.config.search.enable_caching {
            if let Some(mut result) = self.cache.get(key) {
                result.stats.iterations = 0;
                result.stats.execution_time = Duration::ZERO;
                result.abstract_time = Duration::ZERO;
                result.refinement_time = Duration::ZERO;
                return result;
            }
        }

        let abstract_started = Instant::now();
        let layer = self.layer.as_ref().unwrap();
        let graph = self.graph.as_ref().unwrap();

        let links = build_query_links(grid, layer, start, &usable, &self.config);
        let outcome = abstract_search(graph, start, &usable, &links, &self.config, &mut self.stats);
        let abstract_time = abstract_started.elapsed();

        let (nodes, goal_index) = match outcome {
            AbstractOutcome::Found { nodes, goal_index, .. } => (nodes, goal_index),
            AbstractOutcome::IterationCap => return self.fail(ERROR_MAX_ITERATIONS, started),
            AbstractOutcome::Exhausted => return self.fail(ERROR_NO_PATH, started),
        };
        let goal = usable[goal_index];

        // Waypoints: start, entrance cells in order, goal; drop coincident
        // neighbours (the start may itself sit on an entrance cell).
        let mut waypoints = vec![start];
        for &node in &nodes {
            let cell = graph.position(node);
            if *waypoints.last().unwrap() != cell {
                waypoints.push(cell);
            }
        }
        if *waypoints.last().unwrap() != goal {
            waypoints.push(goal);
        }

        let refinement_started = Instant::now();
        let refined = self.refine(grid, &waypoints);
        let refinement_time = refinement_started.elapsed();

        let mut refined = match refined {
            Some(path) => path,
            None => return self.fail(ERROR_NO_PATH, started),
        };
        if self.config.use_path_smoothing {
            refined = optimize_path(
                &refined,
                grid,
                &OptimizeOptions::from_search_config(&self.config.search),
            )
            .path;
        }
        let total_cost = path_cost(
            &refined,
            self.config.search.cardinal_cost,
            self.config.search.diagonal_cost,
        );

        self.stats.count_steps(&refined);
        self.stats.success = true;
        self.stats.execution_time = started.elapsed();
        let result = HpaResult {
            success: true,
            abstract_path: waypoints,
            refined_path: refined,
            total_cost,
            goal_reached: Some(goal),
            abstract_time,
            refinement_time,
            error: None,
            stats: self.stats.clone(),
        };
        if self.config.search.enable_caching {
            self.cache.insert(key, result.clone());
        }
        result
    }

    /// Turn consecutive abstract waypoints into a continuous cell path.
    ///
    /// Border crossings are chebyshev-adjacent and concatenate directly;
    /// intra-cluster legs re-run A* restricted to the two owning clusters.
    /// Leg joins are deduplicated.
    fn refine(&mut self, grid: &Grid, waypoints: &[IVec2]) -> Option<Vec<IVec2>> {
        let layer = self.layer.as_ref().unwrap();
        let mut refined = vec![waypoints[0]];
        for pair in waypoints.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            if from == to {
                continue;
            }
            if chebyshev(from, to) == 1 {
                refined.push(to);
                continue;
            }
            let from_cluster = layer.cluster_at(from)?;
            let to_cluster = layer.cluster_at(to)?;
            let rect_a = &layer.clusters[from_cluster as usize];
            let rect_b = &layer.clusters[to_cluster as usize];

            let mut leg_stats = SearchStats::default();
            let outcome = grid_astar(
                grid,
                from,
                to,
                &self.config.search,
                |p| rect_a.contains(p) || rect_b.contains(p),
                &mut leg_stats,
                None,
            );
            self.stats.iterations += leg_stats.iterations;
            self.stats.nodes_explored += leg_stats.nodes_explored;
            match outcome {
                SearchOutcome::Found { path, .. } => refined.extend_from_slice(&path[1..]),
                _ => return None,
            }
        }
        Some(refined)
    }

    fn fingerprint(&self, grid: &Grid, start: IVec2, goals: &[IVec2]) -> u64 {
        Fingerprint::of_grid(grid)
            .point(start)
            .points(goals)
            .int(self.config.cluster_size)
            .int(self.config.min_entrance_width)
            .int(self.config.max_entrance_width)
            .flag(self.config.merge_small_clusters)
            .flag(self.config.use_interior_entrances)
            .flag(self.config.use_path_smoothing)
            .flag(self.config.search.allow_diagonal)
            .flag(self.config.search.diagonal_only_when_clear)
            .value(self.config.search.cardinal_cost)
            .value(self.config.search.diagonal_cost)
            .value(self.config.search.smoothing_factor)
            .int(self.config.search.max_smoothing_iterations)
            .finish()
    }

    fn fail(&mut self, error: impl Into<String>, started: Instant) -> HpaResult {
        let error = error.into();
        self.stats.record_failure(&error);
        self.stats.execution_time = started.elapsed();
        HpaResult::failure(error, self.stats.clone())
    }
}

impl Default for HpaPathfinder {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect the ephemeral start and goal nodes to the entrances of their
/// owning clusters via intra-cluster A* costs, plus direct start-to-goal
/// legs for goals sharing the start's cluster.
fn build_query_links(
    grid: &Grid,
    layer: &ClusterLayer,
    start: IVec2,
    goals: &[IVec2],
    config: &HpaConfig,
) -> QueryLinks {
    let mut links = QueryLinks {
        from_start: Vec::new(),
        to_goal: vec![Vec::new(); goals.len()],
        direct: Vec::new(),
    };
    let start_cluster = match layer.cluster_at(start) {
        Some(id) => id,
        None => return links,
    };
    let leg = |from: IVec2, to: IVec2, cluster: &Cluster| -> Option<f32> {
        let mut stats = SearchStats::default();
        match grid_astar(
            grid,
            from,
            to,
            &config.search,
            |p| cluster.contains(p),
            &mut stats,
            None,
        ) {
            SearchOutcome::Found { cost, .. } => Some(cost),
            _ => None,
        }
    };

    let start_cluster_ref = &layer.clusters[start_cluster as usize];
    for &entrance_id in &start_cluster_ref.entrances {
        let cell = layer.entrances[entrance_id as usize].cell;
        if let Some(cost) = leg(start, cell, start_cluster_ref) {
            links.from_start.push((entrance_id, cost));
        }
    }

    for (goal_index, &goal) in goals.iter().enumerate() {
        let goal_cluster = match layer.cluster_at(goal) {
            Some(id) => id,
            None => continue,
        };
        let goal_cluster_ref = &layer.clusters[goal_cluster as usize];
        for &entrance_id in &goal_cluster_ref.entrances {
            let cell = layer.entrances[entrance_id as usize].cell;
            if let Some(cost) = leg(cell, goal, goal_cluster_ref) {
                links.to_goal[goal_index].push((entrance_id, cost));
            }
        }
        if goal_cluster == start_cluster {
            if let Some(cost) = leg(start, goal, start_cluster_ref) {
                links.direct.push((goal_index, cost));
            }
        }
    }
    links
}
