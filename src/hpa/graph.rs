#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::astar::{grid_astar, SearchOutcome, NO_PARENT};
use crate::hpa::cluster::ClusterLayer;
use crate::{euclidean, Grid, HpaConfig, SearchStats};
use bevy_math::IVec2;
use fxhash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Whether an abstract edge crosses a border or stays inside a cluster.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Inter,
    Intra,
}

/// A directed edge of the abstract graph.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbstractEdge {
    pub to: u32,
    /// True low-level path cost between the endpoints.
    pub cost: f32,
    pub kind: EdgeKind,
}

/// Memoized intra-cluster edge costs, keyed by cluster id and the
/// lexicographically ordered endpoint pair. `None` records a proven absence
/// of a path, so disconnected pairs are not re-searched on rebuilds.
pub(crate) type IntraCostMemo = FxHashMap<(u32, (i32, i32), (i32, i32)), Option<f32>>;

pub(crate) fn memo_key(cluster: u32, a: IVec2, b: IVec2) -> (u32, (i32, i32), (i32, i32)) {
    let a = (a.x, a.y);
    let b = (b.x, b.y);
    if b < a {
        (cluster, b, a)
    } else {
        (cluster, a, b)
    }
}

/// The entrance graph: nodes are entrances, edges are border crossings and
/// within-cluster shortest paths.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractGraph {
    positions: Vec<IVec2>,
    node_clusters: Vec<u32>,
    adjacency: Vec<Vec<AbstractEdge>>,
    #[cfg_attr(feature = "serialize", serde(skip))]
    pub(crate) memo: IntraCostMemo,
}

impl AbstractGraph {
    /// Build the graph for a cluster layer.
    ///
    /// `memo` carries intra-cluster edge costs across rebuilds; pass an empty
    /// map for a cold build. Intra edges are computed with A* restricted to
    /// the owning cluster, so every edge cost is the true shortest walkable
    /// cost between its endpoints inside that cluster.
    pub(crate) fn build(
        grid: &Grid,
        layer: &ClusterLayer,
        config: &HpaConfig,
        memo: IntraCostMemo,
    ) -> Self {
        let node_count = layer.entrances.len();
        let mut graph = Self {
            positions: layer.entrances.iter().map(|e| e.cell).collect(),
            node_clusters: layer.entrances.iter().map(|e| e.cluster).collect(),
            adjacency: vec![Vec::new(); node_count],
            memo,
        };

        for crossing in &layer.crossings {
            graph.adjacency[crossing.from as usize].push(AbstractEdge {
                to: crossing.to,
                cost: crossing.cost,
                kind: EdgeKind::Inter,
            });
            graph.adjacency[crossing.to as usize].push(AbstractEdge {
                to: crossing.from,
                cost: crossing.cost,
                kind: EdgeKind::Inter,
            });
        }

        for cluster in &layer.clusters {
            for (slot, &a) in cluster.entrances.iter().enumerate() {
                for &b in &cluster.entrances[slot + 1..] {
                    let cell_a = layer.entrances[a as usize].cell;
                    let cell_b = layer.entrances[b as usize].cell;
                    let key = memo_key(cluster.id, cell_a, cell_b);
                    let cost = *graph.memo.entry(key).or_insert_with(|| {
                        cluster_leg_cost(grid, cell_a, cell_b, cluster, config)
                    });
                    if let Some(cost) = cost {
                        graph.adjacency[a as usize].push(AbstractEdge {
                            to: b,
                            cost,
                            kind: EdgeKind::Intra,
                        });
                        graph.adjacency[b as usize].push(AbstractEdge {
                            to: a,
                            cost,
                            kind: EdgeKind::Intra,
                        });
                    }
                }
            }
        }
        graph
    }

    /// Number of entrance nodes.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    /// Total directed edge count.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    /// World position of a node.
    #[inline]
    #[must_use]
    pub fn position(&self, node: u32) -> IVec2 {
        self.positions[node as usize]
    }

    /// Owning cluster of a node.
    #[inline]
    #[must_use]
    pub fn cluster_of(&self, node: u32) -> u32 {
        self.node_clusters[node as usize]
    }

    /// Outgoing edges of a node.
    #[inline]
    #[must_use]
    pub fn edges(&self, node: u32) -> &[AbstractEdge] {
        &self.adjacency[node as usize]
    }
}

/// Shortest intra-cluster path cost between two cells, or `None` when the
/// cluster does not connect them.
fn cluster_leg_cost(
    grid: &Grid,
    from: IVec2,
    to: IVec2,
    cluster: &crate::Cluster,
    config: &HpaConfig,
) -> Option<f32> {
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
}

/// Ephemeral query-time connections: the start node and each goal node are
/// inserted into the graph for one search only.
#[derive(Debug, Default)]
pub(crate) struct QueryLinks {
    /// Start to entrance node, with intra-cluster cost.
    pub from_start: Vec<(u32, f32)>,
    /// Entrance node to goal, per goal index.
    pub to_goal: Vec<Vec<(u32, f32)>>,
    /// Start directly to goal (same-cluster legs), per goal index.
    pub direct: Vec<(usize, f32)>,
}

pub(crate) enum AbstractOutcome {
    Found {
        /// Entrance node ids along the path (virtual endpoints stripped).
        nodes: Vec<u32>,
        cost: f32,
        goal_index: usize,
    },
    Exhausted,
    IterationCap,
}

struct AbstractHolder {
    f: f32,
    g: f32,
    id: usize,
}

impl PartialEq for AbstractHolder {
    fn eq(&self, other: &Self) -> bool {
        self.f.eq(&other.f)
    }
}

impl Eq for AbstractHolder {}

impl PartialOrd for AbstractHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbstractHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.partial_cmp(&self.f).unwrap_or(Ordering::Equal)
    }
}

/// A* over the abstract graph with ephemeral start and goal nodes.
///
/// Node ids: `0..n` are entrances, `n` is the start, `n + 1 + k` is goal `k`.
/// The heuristic is the euclidean world distance to the nearest goal, scaled
/// by the cardinal cost.
pub(crate) fn abstract_search(
    graph: &AbstractGraph,
    start: IVec2,
    goals: &[IVec2],
    links: &QueryLinks,
    config: &HpaConfig,
    stats: &mut SearchStats,
) -> AbstractOutcome {
    let n = graph.node_count();
    let total = n + 1 + goals.len();
    let start_id = n;
    let goal_base = n + 1;

    let position = |id: usize| -> IVec2 {
        if id < n {
            graph.position(id as u32)
        } else if id == start_id {
            start
        } else {
            goals[id - goal_base]
        }
    };
    let estimate = |id: usize| -> f32 {
        goals
            .iter()
            .map(|&goal| euclidean(position(id), goal))
            .fold(f32::INFINITY, f32::min)
            * config.search.cardinal_cost
    };

    // Entrance node -> goal links, grouped by source node.
    let mut goal_links: FxHashMap<usize, Vec<(usize, f32)>> = FxHashMap::default();
    for (goal_index, links) in links.to_goal.iter().enumerate() {
        for &(node, cost) in links {
            goal_links
                .entry(node as usize)
                .or_default()
                .push((goal_base + goal_index, cost));
        }
    }

    let mut g = vec![f32::INFINITY; total];
    let mut parent = vec![NO_PARENT; total];
    let mut heap = BinaryHeap::new();
    g[start_id] = 0.0;
    heap.push(AbstractHolder {
        f: estimate(start_id),
        g: 0.0,
        id: start_id,
    });

    while let Some(AbstractHolder { g: entry_g, id, .. }) = heap.pop() {
        stats.iterations += 1;
        if stats.iterations > config.search.max_iterations {
            stats.iterations = config.search.max_iterations;
            return AbstractOutcome::IterationCap;
        }
        if entry_g > g[id] {
            continue; // Stale heap entry
        }
        if id >= goal_base {
            // Reconstruct and strip the virtual endpoints.
            let mut ids = Vec::new();
            let mut current = id as u32;
            while current != NO_PARENT {
                ids.push(current);
                current = parent[current as usize];
            }
            ids.reverse();
            let nodes = ids
                .into_iter()
                .filter(|&node| (node as usize) < n)
                .collect();
            return AbstractOutcome::Found {
                nodes,
                cost: g[id],
                goal_index: id - goal_base,
            };
        }
        stats.nodes_explored += 1;

        let mut relax = |to: usize, cost: f32, heap: &mut BinaryHeap<AbstractHolder>| {
            let tentative = g[id] + cost;
            if tentative < g[to] {
                g[to] = tentative;
                parent[to] = id as u32;
                heap.push(AbstractHolder {
                    f: tentative + estimate(to),
                    g: tentative,
                    id: to,
                });
            }
        };

        if id == start_id {
            for &(node, cost) in &links.from_start {
                relax(node as usize, cost, &mut heap);
            }
            for &(goal_index, cost) in &links.direct {
                relax(goal_base + goal_index, cost, &mut heap);
            }
        } else {
            for edge in graph.edges(id as u32) {
                relax(edge.to as usize, edge.cost, &mut heap);
            }
            if let Some(exits) = goal_links.get(&id) {
                for &(goal_id, cost) in exits {
                    relax(goal_id, cost, &mut heap);
                }
            }
        }
    }
    AbstractOutcome::Exhausted
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CellState, GridBuffer};
    use bevy_math::ivec2;

    fn build_graph(buffer: &GridBuffer, cluster_size: u32) -> (ClusterLayer, AbstractGraph) {
        let config = HpaConfig {
            cluster_size,
            ..HpaConfig::default()
        };
        let layer = ClusterLayer::build(&buffer.view(), &config);
        let graph = AbstractGraph::build(&buffer.view(), &layer, &config, IntraCostMemo::default());
        (layer, graph)
    }

    #[test]
    fn test_open_grid_graph_shape() {
        let buffer = GridBuffer::filled(20, 20, CellState::Walkable).unwrap();
        let (layer, graph) = build_graph(&buffer, 5);
        assert_eq!(graph.node_count(), layer.entrances.len());
        // Every crossing appears as a pair of directed inter edges.
        let inter_edges: usize = (0..graph.node_count() as u32)
            .map(|id| {
                graph
                    .edges(id)
                    .iter()
                    .filter(|e| e.kind == EdgeKind::Inter)
                    .count()
            })
            .sum();
        assert_eq!(inter_edges, layer.crossings.len() * 2);
    }

    #[test]
    fn test_intra_edges_carry_true_cluster_costs() {
        let buffer = GridBuffer::filled(10, 10, CellState::Walkable).unwrap();
        let (_layer, graph) = build_graph(&buffer, 5);
        for node in 0..graph.node_count() as u32 {
            for edge in graph.edges(node) {
                if edge.kind != EdgeKind::Intra {
                    continue;
                }
                let a = graph.position(node);
                let b = graph.position(edge.to);
                assert_eq!(graph.cluster_of(node), graph.cluster_of(edge.to));
                // On an open cluster, the true cost is the diagonal model.
                let expected = crate::diagonal_distance(a, b, 1.0, std::f32::consts::SQRT_2);
                assert!((edge.cost - expected).abs() < 1e-4, "{a:?} -> {b:?}");
            }
        }
    }

    #[test]
    fn test_disconnected_pair_has_no_intra_edge() {
        // Split the single 8x8 cluster's interior with a full wall, leaving
        // entrances unreachable from each other inside the left cluster.
        let mut buffer = GridBuffer::filled(16, 8, CellState::Walkable).unwrap();
        for y in 0..8 {
            buffer.set(ivec2(3, y), CellState::Obstacle);
        }
        let (_, graph) = build_graph(&buffer, 8);
        for node in 0..graph.node_count() as u32 {
            for edge in graph.edges(node) {
                if edge.kind == EdgeKind::Intra {
                    let a = graph.position(node);
                    let b = graph.position(edge.to);
                    assert!(
                        !(a.x < 3 && b.x > 3 || a.x > 3 && b.x < 3),
                        "edge spans the wall: {a:?} -> {b:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_abstract_search_reaches_goal() {
        let buffer = GridBuffer::filled(20, 20, CellState::Walkable).unwrap();
        let config = HpaConfig {
            cluster_size: 5,
            ..HpaConfig::default()
        };
        let layer = ClusterLayer::build(&buffer.view(), &config);
        let graph = AbstractGraph::build(&buffer.view(), &layer, &config, IntraCostMemo::default());

        let start = ivec2(0, 0);
        let goal = ivec2(19, 19);
        let start_cluster = layer.cluster_at(start).unwrap();
        let goal_cluster = layer.cluster_at(goal).unwrap();

        let mut links = QueryLinks::default();
        links.to_goal.push(Vec::new());
        for entrance in &layer.entrances {
            if entrance.cluster == start_cluster {
                let cost = crate::euclidean(start, entrance.cell) * 2.0;
                links.from_start.push((entrance.id, cost));
            }
            if entrance.cluster == goal_cluster {
                let cost = crate::euclidean(entrance.cell, goal) * 2.0;
                links.to_goal[0].push((entrance.id, cost));
            }
        }

        let mut stats = SearchStats::default();
        match abstract_search(&graph, start, &[goal], &links, &config, &mut stats) {
            AbstractOutcome::Found {
                nodes,
                cost,
                goal_index,
            } => {
                assert_eq!(goal_index, 0);
                assert!(!nodes.is_empty());
                assert!(cost > 0.0);
                // The path enters via the start cluster and leaves via the
                // goal cluster.
                assert_eq!(graph.cluster_of(nodes[0]), start_cluster);
                assert_eq!(graph.cluster_of(*nodes.last().unwrap()), goal_cluster);
            }
            _ => panic!("abstract search failed"),
        }
        assert!(stats.iterations > 0);
    }

    #[test]
    fn test_direct_link_wins_for_same_cluster() {
        let buffer = GridBuffer::filled(8, 8, CellState::Walkable).unwrap();
        let config = HpaConfig {
            cluster_size: 8,
            ..HpaConfig::default()
        };
        let layer = ClusterLayer::build(&buffer.view(), &config);
        let graph = AbstractGraph::build(&buffer.view(), &layer, &config, IntraCostMemo::default());

        let links = QueryLinks {
            from_start: Vec::new(),
            to_goal: vec![Vec::new()],
            direct: vec![(0, 3.0)],
        };
        let mut stats = SearchStats::default();
        match abstract_search(
            &graph,
            ivec2(1, 1),
            &[ivec2(4, 1)],
            &links,
            &config,
            &mut stats,
        ) {
            AbstractOutcome::Found { nodes, cost, .. } => {
                assert!(nodes.is_empty(), "direct leg uses no entrances");
                assert_eq!(cost, 3.0);
            }
            _ => panic!("direct link not taken"),
        }
    }
}
