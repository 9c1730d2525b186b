#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{Grid, HpaConfig};
use bevy_math::IVec2;
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// An axis-aligned rectangular subregion of the grid.
///
/// The union of a layer's clusters partitions the grid exactly; trailing
/// clusters on the right and bottom may be smaller than the configured side
/// length (or larger, when small trailers are merged into their neighbour).
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: u32,
    /// Top-left cell.
    pub origin: IVec2,
    pub width: u32,
    pub height: u32,
    /// Ids of entrances owned by this cluster.
    pub entrances: Vec<u32>,
    /// Ids of geometrically adjacent clusters.
    pub neighbours: Vec<u32>,
}

impl Cluster {
    /// Returns true when `p` lies inside this cluster.
    #[inline]
    #[must_use]
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.origin.x
            && p.y >= self.origin.y
            && p.x < self.origin.x + self.width as i32
            && p.y < self.origin.y + self.height as i32
    }
}

/// A walkable cell on a cluster border, usable as a cross-cluster waypoint.
///
/// Interior entrances (cells flagged inside internally disconnected
/// clusters) have no `links`.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrance {
    pub id: u32,
    pub cell: IVec2,
    /// Owning cluster id.
    pub cluster: u32,
    /// Clusters this entrance connects to across a border.
    pub links: Vec<u32>,
}

/// A paired border transition between entrances of adjacent clusters.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BorderCrossing {
    pub from: u32,
    pub to: u32,
    pub cost: f32,
}

/// The cluster decomposition of one grid: clusters, entrances and border
/// crossings, plus the column/row layout needed to resolve a cell to its
/// cluster.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLayer {
    pub clusters: Vec<Cluster>,
    pub entrances: Vec<Entrance>,
    pub(crate) crossings: Vec<BorderCrossing>,
    cols: u32,
    rows: u32,
    col_starts: Vec<i32>,
    row_starts: Vec<i32>,
    width: u32,
    height: u32,
}

impl ClusterLayer {
    /// Decompose `grid` into clusters and detect border entrances.
    #[must_use]
    pub fn build(grid: &Grid, config: &HpaConfig) -> Self {
        let col_spans = axis_spans(grid.width(), config.cluster_size, config.merge_small_clusters);
        let row_spans = axis_spans(grid.height(), config.cluster_size, config.merge_small_clusters);
        let cols = col_spans.len() as u32;
        let rows = row_spans.len() as u32;

        let mut clusters = Vec::with_capacity((cols * rows) as usize);
        for (j, &(row_start, row_size)) in row_spans.iter().enumerate() {
            for (i, &(col_start, col_size)) in col_spans.iter().enumerate() {
                let id = (j as u32) * cols + i as u32;
                let mut neighbours = Vec::new();
                if i > 0 {
                    neighbours.push(id - 1);
                }
                if (i as u32) < cols - 1 {
                    neighbours.push(id + 1);
                }
                if j > 0 {
                    neighbours.push(id - cols);
                }
                if (j as u32) < rows - 1 {
                    neighbours.push(id + cols);
                }
                clusters.push(Cluster {
                    id,
                    origin: IVec2::new(col_start as i32, row_start as i32),
                    width: col_size,
                    height: row_size,
                    entrances: Vec::new(),
                    neighbours,
                });
            }
        }

        let mut layer = Self {
            clusters,
            entrances: Vec::new(),
            crossings: Vec::new(),
            cols,
            rows,
            col_starts: col_spans.iter().map(|&(s, _)| s as i32).collect(),
            row_starts: row_spans.iter().map(|&(s, _)| s as i32).collect(),
            width: grid.width(),
            height: grid.height(),
        };
        layer.detect_entrances(grid, config);
        if config.use_interior_entrances {
            layer.detect_interior_entrances(grid, config);
        }
        layer
    }

    /// Number of cluster columns.
    #[inline]
    #[must_use]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Number of cluster rows.
    #[inline]
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// The id of the cluster containing `p`, or `None` out of bounds.
    #[must_use]
    pub fn cluster_at(&self, p: IVec2) -> Option<u32> {
        if p.x < 0 || p.y < 0 || p.x as u32 >= self.width || p.y as u32 >= self.height {
            return None;
        }
        let col = self.col_starts.partition_point(|&s| s <= p.x) - 1;
        let row = self.row_starts.partition_point(|&s| s <= p.y) - 1;
        Some(row as u32 * self.cols + col as u32)
    }

    /// Scan every shared border for maximal runs of walkable cell pairs and
    /// place paired entrances on them.
    ///
    /// Runs shorter than `min_entrance_width` are ignored. Runs up to
    /// `max_entrance_width` get one crossing at the midpoint; wider runs get
    /// one at each endpoint.
    fn detect_entrances(&mut self, grid: &Grid, config: &HpaConfig) {
        let mut by_key: FxHashMap<(u32, IVec2), u32> = FxHashMap::default();
        let crossing_cost = config.search.cardinal_cost;

        // Vertical borders between horizontally adjacent clusters.
        for j in 0..self.rows {
            for i in 0..self.cols - 1 {
                let left = (j * self.cols + i) as usize;
                let right = left + 1;
                let x_left = self.clusters[left].origin.x + self.clusters[left].width as i32 - 1;
                let x_right = self.clusters[right].origin.x;
                let y0 = self.clusters[left].origin.y;
                let y1 = y0 + self.clusters[left].height as i32;

                let mut run_start: Option<i32> = None;
                for y in y0..=y1 {
                    let open = y < y1
                        && grid.is_walkable(IVec2::new(x_left, y))
                        && grid.is_walkable(IVec2::new(x_right, y));
                    match (open, run_start) {
                        (true, None) => run_start = Some(y),
                        (false, Some(start)) => {
                            self.place_run(
                                config,
                                &mut by_key,
                                crossing_cost,
                                left as u32,
                                right as u32,
                                |anchor| {
                                    (IVec2::new(x_left, anchor), IVec2::new(x_right, anchor))
                                },
                                start,
                                y - 1,
                            );
                            run_start = None;
                        }
                        _ => {}
                    }
                }
            }
        }

        // Horizontal borders between vertically adjacent clusters.
        for j in 0..self.rows - 1 {
            for i in 0..self.cols {
                let top = (j * self.cols + i) as usize;
                let bottom = top + self.cols as usize;
                let y_top = self.clusters[top].origin.y + self.clusters[top].height as i32 - 1;
                let y_bottom = self.clusters[bottom].origin.y;
                let x0 = self.clusters[top].origin.x;
                let x1 = x0 + self.clusters[top].width as i32;

                let mut run_start: Option<i32> = None;
                for x in x0..=x1 {
                    let open = x < x1
                        && grid.is_walkable(IVec2::new(x, y_top))
                        && grid.is_walkable(IVec2::new(x, y_bottom));
                    match (open, run_start) {
                        (true, None) => run_start = Some(x),
                        (false, Some(start)) => {
                            self.place_run(
                                config,
                                &mut by_key,
                                crossing_cost,
                                top as u32,
                                bottom as u32,
                                |anchor| {
                                    (IVec2::new(anchor, y_top), IVec2::new(anchor, y_bottom))
                                },
                                start,
                                x - 1,
                            );
                            run_start = None;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Place the crossings for one maximal walkable run along a border.
    #[allow(clippy::too_many_arguments)]
    fn place_run<F>(
        &mut self,
        config: &HpaConfig,
        by_key: &mut FxHashMap<(u32, IVec2), u32>,
        crossing_cost: f32,
        cluster_a: u32,
        cluster_b: u32,
        cells_at: F,
        run_start: i32,
        run_end: i32,
    ) where
        F: Fn(i32) -> (IVec2, IVec2),
    {
        let length = (run_end - run_start + 1) as u32;
        if length < config.min_entrance_width {
            return;
        }
        let anchors: &[i32] = if length <= config.max_entrance_width {
            &[run_start + (length as i32 - 1) / 2]
        } else {
            &[run_start, run_end]
        };
        for &anchor in anchors {
            let (cell_a, cell_b) = cells_at(anchor);
            let from = self.entrance_at(by_key, cluster_a, cell_a, cluster_b);
            let to = self.entrance_at(by_key, cluster_b, cell_b, cluster_a);
            self.crossings.push(BorderCrossing {
                from,
                to,
                cost: crossing_cost,
            });
        }
    }

    /// Create or reuse the entrance of `cluster` at `cell`, linking it to
    /// `linked` cluster.
    fn entrance_at(
        &mut self,
        by_key: &mut FxHashMap<(u32, IVec2), u32>,
        cluster: u32,
        cell: IVec2,
        linked: u32,
    ) -> u32 {
        let id = *by_key.entry((cluster, cell)).or_insert_with(|| {
            let id = self.entrances.len() as u32;
            self.entrances.push(Entrance {
                id,
                cell,
                cluster,
                links: Vec::new(),
            });
            self.clusters[cluster as usize].entrances.push(id);
            id
        });
        let entrance = &mut self.entrances[id as usize];
        if !entrance.links.contains(&linked) {
            entrance.links.push(linked);
        }
        id
    }

    /// Flag a representative cell in every internally disconnected walkable
    /// region of a cluster that has no border entrance of its own.
    fn detect_interior_entrances(&mut self, grid: &Grid, config: &HpaConfig) {
        for cluster_index in 0..self.clusters.len() {
            let cluster = self.clusters[cluster_index].clone();
            let entrance_cells: FxHashSet<IVec2> = cluster
                .entrances
                .iter()
                .map(|&id| self.entrances[id as usize].cell)
                .collect();

            let mut visited: FxHashSet<IVec2> = FxHashSet::default();
            for y in cluster.origin.y..cluster.origin.y + cluster.height as i32 {
                for x in cluster.origin.x..cluster.origin.x + cluster.width as i32 {
                    let seed = IVec2::new(x, y);
                    if !grid.is_walkable(seed) || visited.contains(&seed) {
                        continue;
                    }
                    // Flood this component within the cluster.
                    let mut component = Vec::new();
                    let mut has_entrance = false;
                    let mut frontier = VecDeque::new();
                    visited.insert(seed);
                    frontier.push_back(seed);
                    while let Some(current) = frontier.pop_front() {
                        has_entrance |= entrance_cells.contains(&current);
                        component.push(current);
                        grid.for_each_walkable_neighbor(
                            current,
                            config.search.allow_diagonal,
                            config.search.diagonal_only_when_clear,
                            |neighbor, _| {
                                if cluster.contains(neighbor) && visited.insert(neighbor) {
                                    frontier.push_back(neighbor);
                                }
                            },
                        );
                    }
                    if !has_entrance {
                        let id = self.entrances.len() as u32;
                        self.entrances.push(Entrance {
                            id,
                            cell: seed,
                            cluster: cluster.id,
                            links: Vec::new(),
                        });
                        self.clusters[cluster_index].entrances.push(id);
                    }
                }
            }
        }
    }
}

/// Split one axis into cluster spans of `(start, size)`.
fn axis_spans(dim: u32, cluster_size: u32, merge_small: bool) -> Vec<(u32, u32)> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < dim {
        let size = cluster_size.min(dim - start);
        spans.push((start, size));
        start += size;
    }
    if merge_small && spans.len() > 1 {
        let (_, last_size) = *spans.last().unwrap();
        if last_size < cluster_size.div_ceil(2) {
            spans.pop();
            spans.last_mut().unwrap().1 += last_size;
        }
    }
    spans
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CellState, GridBuffer};
    use bevy_math::ivec2;

    fn open_grid(width: u32, height: u32) -> GridBuffer {
        GridBuffer::filled(width, height, CellState::Walkable).unwrap()
    }

    #[test]
    fn test_axis_spans_exact_fit() {
        assert_eq!(axis_spans(20, 5, true), vec![(0, 5), (5, 5), (10, 5), (15, 5)]);
    }

    #[test]
    fn test_axis_spans_trailing_remainder() {
        assert_eq!(axis_spans(11, 4, false), vec![(0, 4), (4, 4), (8, 3)]);
        // A one-cell trailer merges into its neighbour.
        assert_eq!(axis_spans(9, 4, true), vec![(0, 4), (4, 5)]);
        assert_eq!(axis_spans(9, 4, false), vec![(0, 4), (4, 4), (8, 1)]);
    }

    #[test]
    fn test_partition_covers_grid() {
        let buffer = open_grid(20, 20);
        let layer = ClusterLayer::build(&buffer.view(), &HpaConfig {
            cluster_size: 5,
            ..HpaConfig::default()
        });
        assert_eq!(layer.clusters.len(), 16);
        assert_eq!(layer.cols(), 4);
        assert_eq!(layer.rows(), 4);

        // Every cell resolves to exactly the cluster that contains it.
        for y in 0..20 {
            for x in 0..20 {
                let p = ivec2(x, y);
                let id = layer.cluster_at(p).unwrap();
                assert!(layer.clusters[id as usize].contains(p), "{p:?} -> {id}");
            }
        }
        assert_eq!(layer.cluster_at(ivec2(20, 0)), None);
    }

    #[test]
    fn test_entrances_on_open_grid() {
        let buffer = open_grid(20, 20);
        let layer = ClusterLayer::build(&buffer.view(), &HpaConfig {
            cluster_size: 5,
            ..HpaConfig::default()
        });
        // 4x4 arrangement: 12 vertical + 12 horizontal shared borders, each
        // contributing one midpoint crossing with a paired entrance per side.
        assert_eq!(layer.crossings.len(), 24);
        assert!(layer.entrances.len() >= 24);

        for entrance in &layer.entrances {
            assert!(buffer.view().is_walkable(entrance.cell));
            assert!(!entrance.links.is_empty());
            let cluster = &layer.clusters[entrance.cluster as usize];
            assert!(cluster.contains(entrance.cell));
        }
    }

    #[test]
    fn test_blocked_border_produces_no_entrance() {
        // Wall the full border column between cluster columns 0 and 1.
        let mut buffer = open_grid(8, 8);
        for y in 0..8 {
            buffer.set(ivec2(3, y), CellState::Obstacle);
        }
        let config = HpaConfig {
            cluster_size: 4,
            ..HpaConfig::default()
        };
        let layer = ClusterLayer::build(&buffer.view(), &config);
        for crossing in &layer.crossings {
            let from = &layer.entrances[crossing.from as usize];
            let to = &layer.entrances[crossing.to as usize];
            assert!(from.cell.x != 3 && to.cell.x != 3);
        }
    }

    #[test]
    fn test_wide_run_gets_two_crossings() {
        let buffer = open_grid(16, 8);
        let config = HpaConfig {
            cluster_size: 8,
            max_entrance_width: 6,
            ..HpaConfig::default()
        };
        let layer = ClusterLayer::build(&buffer.view(), &config);
        // One vertical border with a run of 8 > max_entrance_width.
        assert_eq!(layer.crossings.len(), 2);
        let anchor_ys: Vec<i32> = layer
            .crossings
            .iter()
            .map(|c| layer.entrances[c.from as usize].cell.y)
            .collect();
        assert!(anchor_ys.contains(&0));
        assert!(anchor_ys.contains(&7));
    }

    #[test]
    fn test_interior_entrance_for_sealed_pocket() {
        // Seal the cluster-local region around (6, 6) with obstacles. The
        // pocket has no border contact, so it only gets a node when interior
        // entrances are enabled.
        let mut buffer = open_grid(8, 8);
        for p in [
            ivec2(5, 5),
            ivec2(6, 5),
            ivec2(7, 5),
            ivec2(5, 6),
            ivec2(5, 7),
        ] {
            buffer.set(p, CellState::Obstacle);
        }
        let base = HpaConfig {
            cluster_size: 4,
            ..HpaConfig::default()
        };
        let without = ClusterLayer::build(&buffer.view(), &base);
        let with = ClusterLayer::build(&buffer.view(), &HpaConfig {
            use_interior_entrances: true,
            ..base
        });
        assert!(with.entrances.len() > without.entrances.len());
        let interior: Vec<_> = with.entrances.iter().filter(|e| e.links.is_empty()).collect();
        assert_eq!(interior.len(), 1);
        let pocket = &with.clusters[with.cluster_at(ivec2(6, 6)).unwrap() as usize];
        assert!(pocket.contains(interior[0].cell));
    }
}
