#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{approx_eq, FlowFieldResult, HpaPathfinder, HpaResult, PathResult};
use bevy_math::IVec2;
use fxhash::FxHashSet;

/// Ratio in `[0, 1]` of two non-negative magnitudes, where equality (including
/// both zero) is 1.
fn magnitude_agreement(a: f32, b: f32) -> f32 {
    let (min, max) = (a.min(b), a.max(b));
    if max <= f32::EPSILON {
        1.0
    } else {
        (min / max).clamp(0.0, 1.0)
    }
}

/// How two path results relate.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathComparison {
    /// True when both paths match point-for-point and in cost (under
    /// tolerance).
    pub equal: bool,
    /// `a.length - b.length`.
    pub length_difference: i32,
    /// `a.total_cost - b.total_cost`.
    pub cost_difference: f32,
    /// 1 for equal results, otherwise a blend of length, cost and
    /// exploration agreement.
    pub similarity: f32,
}

/// Compare two path results.
#[must_use]
pub fn compare_paths(a: &PathResult, b: &PathResult, tolerance: f32) -> PathComparison {
    let equal = a.path.len() == b.path.len()
        && a.path.iter().zip(&b.path).all(|(p, q)| p == q)
        && approx_eq(a.total_cost, b.total_cost, tolerance);

    let similarity = if equal {
        1.0
    } else {
        let length = magnitude_agreement(a.path.len() as f32, b.path.len() as f32);
        let cost = magnitude_agreement(a.total_cost, b.total_cost);
        let exploration = magnitude_agreement(
            a.stats.nodes_explored as f32,
            b.stats.nodes_explored as f32,
        );
        0.4 * length + 0.4 * cost + 0.2 * exploration
    };

    PathComparison {
        equal,
        length_difference: a.path.len() as i32 - b.path.len() as i32,
        cost_difference: a.total_cost - b.total_cost,
        similarity,
    }
}

/// One cell where two flow fields disagree.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDifference {
    pub index: usize,
    pub cell: IVec2,
    pub description: String,
}

/// How two flow-field results relate, cell by cell.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FlowFieldComparison {
    pub equal: bool,
    pub differences_count: usize,
    pub differences: Vec<FlowDifference>,
    /// Mean cosine similarity over corresponding flow vectors. Cells where
    /// both fields are invalid agree perfectly; validity mismatches score
    /// zero.
    pub average_cosine_similarity: f32,
}

/// Compare two flow fields under magnitude and direction tolerances.
///
/// `direction_tolerance` bounds the allowed deviation of the cosine from 1:
/// zero demands exactly parallel vectors.
#[must_use]
pub fn compare_flow_fields(
    a: &FlowFieldResult,
    b: &FlowFieldResult,
    magnitude_tolerance: f32,
    direction_tolerance: f32,
) -> FlowFieldComparison {
    if a.width != b.width || a.height != b.height {
        return FlowFieldComparison {
            equal: false,
            differences_count: 1,
            differences: vec![FlowDifference {
                index: 0,
                cell: IVec2::ZERO,
                description: format!(
                    "dimension mismatch: {}x{} vs {}x{}",
                    a.width, a.height, b.width, b.height
                ),
            }],
            average_cosine_similarity: 0.0,
        };
    }

    let mut differences = Vec::new();
    let mut cosine_sum = 0.0;
    let len = a.flow_field.len();
    for index in 0..len {
        let cell = IVec2::new(
            (index % a.width as usize) as i32,
            (index / a.width as usize) as i32,
        );
        let fa = &a.flow_field[index];
        let fb = &b.flow_field[index];

        if fa.valid != fb.valid {
            differences.push(FlowDifference {
                index,
                cell,
                description: format!("validity differs: {} vs {}", fa.valid, fb.valid),
            });
            continue;
        }
        if !fa.valid {
            cosine_sum += 1.0;
            continue;
        }

        let cosine = fa
            .direction
            .normalize_or_zero()
            .dot(fb.direction.normalize_or_zero());
        cosine_sum += cosine;
        if (fa.magnitude - fb.magnitude).abs() > magnitude_tolerance {
            differences.push(FlowDifference {
                index,
                cell,
                description: format!(
                    "magnitude differs: {} vs {}",
                    fa.magnitude, fb.magnitude
                ),
            });
        } else if cosine < 1.0 - direction_tolerance {
            differences.push(FlowDifference {
                index,
                cell,
                description: format!("direction differs: cosine {cosine}"),
            });
        }
    }

    FlowFieldComparison {
        equal: differences.is_empty(),
        differences_count: differences.len(),
        differences,
        average_cosine_similarity: if len == 0 {
            1.0
        } else {
            cosine_sum / len as f32
        },
    }
}

/// How two hierarchical pathfinder states and one query each relate.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HpaComparison {
    /// Overlap of the cluster decompositions (origin and size).
    pub cluster_similarity: f32,
    /// Overlap of the entrance cell sets.
    pub entrance_similarity: f32,
    /// Agreement of abstract graph node and edge counts.
    pub graph_similarity: f32,
    /// Agreement of the two refined query results.
    pub path_similarity: f32,
    /// Mean of the four sub-similarities.
    pub overall_similarity: f32,
}

fn jaccard<T: std::hash::Hash + Eq>(a: &FxHashSet<T>, b: &FxHashSet<T>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// Compare two hierarchical pathfinders (their built structures) together
/// with one result from each.
#[must_use]
pub fn compare_hpa(
    a: &HpaPathfinder,
    b: &HpaPathfinder,
    result_a: &HpaResult,
    result_b: &HpaResult,
    tolerance: f32,
) -> HpaComparison {
    let (cluster_similarity, entrance_similarity) = match (a.cluster_layer(), b.cluster_layer()) {
        (Some(la), Some(lb)) => {
            let clusters_a: FxHashSet<(i32, i32, u32, u32)> = la
                .clusters
                .iter()
                .map(|c| (c.origin.x, c.origin.y, c.width, c.height))
                .collect();
            let clusters_b: FxHashSet<(i32, i32, u32, u32)> = lb
                .clusters
                .iter()
                .map(|c| (c.origin.x, c.origin.y, c.width, c.height))
                .collect();
            let entrances_a: FxHashSet<(i32, i32)> =
                la.entrances.iter().map(|e| (e.cell.x, e.cell.y)).collect();
            let entrances_b: FxHashSet<(i32, i32)> =
                lb.entrances.iter().map(|e| (e.cell.x, e.cell.y)).collect();
            (
                jaccard(&clusters_a, &clusters_b),
                jaccard(&entrances_a, &entrances_b),
            )
        }
        (None, None) => (1.0, 1.0),
        _ => (0.0, 0.0),
    };

    let graph_similarity = match (a.abstract_graph(), b.abstract_graph()) {
        (Some(ga), Some(gb)) => {
            let nodes = magnitude_agreement(ga.node_count() as f32, gb.node_count() as f32);
            let edges = magnitude_agreement(ga.edge_count() as f32, gb.edge_count() as f32);
            0.5 * (nodes + edges)
        }
        (None, None) => 1.0,
        _ => 0.0,
    };

    let path_equal = result_a.refined_path.len() == result_b.refined_path.len()
        && result_a
            .refined_path
            .iter()
            .zip(&result_b.refined_path)
            .all(|(p, q)| p == q)
        && approx_eq(result_a.total_cost, result_b.total_cost, tolerance);
    let path_similarity = if path_equal {
        1.0
    } else {
        let length = magnitude_agreement(
            result_a.refined_path.len() as f32,
            result_b.refined_path.len() as f32,
        );
        let cost = magnitude_agreement(result_a.total_cost, result_b.total_cost);
        0.5 * (length + cost)
    };

    let overall_similarity =
        (cluster_similarity + entrance_similarity + graph_similarity + path_similarity) / 4.0;
    HpaComparison {
        cluster_similarity,
        entrance_similarity,
        graph_similarity,
        path_similarity,
        overall_similarity,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        AStarPathfinder, CellState, FlowFieldGenerator, GridBuffer, HpaConfig, SearchStats,
    };
    use bevy_math::ivec2;

    fn open_grid(width: u32, height: u32) -> GridBuffer {
        GridBuffer::filled(width, height, CellState::Walkable).unwrap()
    }

    #[test]
    fn test_identical_paths_compare_equal() {
        let buffer = open_grid(10, 10);
        let mut pathfinder = AStarPathfinder::new();
        let a = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 4));
        let b = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 4));
        let comparison = compare_paths(&a, &b, 1e-6);
        assert!(comparison.equal);
        assert_eq!(comparison.similarity, 1.0);
        assert_eq!(comparison.length_difference, 0);
        assert_eq!(comparison.cost_difference, 0.0);
    }

    #[test]
    fn test_different_paths_blend_below_one() {
        let buffer = open_grid(10, 10);
        let mut pathfinder = AStarPathfinder::new();
        let a = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(9, 9));
        let b = pathfinder.find_path(&buffer.view(), ivec2(0, 0), ivec2(4, 4));
        let comparison = compare_paths(&a, &b, 1e-6);
        assert!(!comparison.equal);
        assert!(comparison.similarity < 1.0);
        assert!(comparison.similarity > 0.0);
        assert!(comparison.cost_difference > 0.0);
    }

    #[test]
    fn test_empty_paths_compare_equal() {
        let a = PathResult::failure("No path exists between start and goal", SearchStats::default());
        let b = PathResult::failure("No path exists between start and goal", SearchStats::default());
        let comparison = compare_paths(&a, &b, 1e-6);
        assert!(comparison.equal);
        assert_eq!(comparison.similarity, 1.0);
    }

    #[test]
    fn test_flow_fields_identical() {
        let buffer = open_grid(8, 8);
        let mut generator = FlowFieldGenerator::new();
        let a = generator.generate(&buffer.view(), &[ivec2(7, 7)]);
        let b = generator.generate(&buffer.view(), &[ivec2(7, 7)]);
        let comparison = compare_flow_fields(&a, &b, 1e-6, 1e-6);
        assert!(comparison.equal);
        assert_eq!(comparison.differences_count, 0);
        assert!((comparison.average_cosine_similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_flow_fields_differ_per_cell() {
        let buffer = open_grid(8, 8);
        let mut generator = FlowFieldGenerator::new();
        let a = generator.generate(&buffer.view(), &[ivec2(7, 7)]);
        let b = generator.generate(&buffer.view(), &[ivec2(0, 0)]);
        let comparison = compare_flow_fields(&a, &b, 1e-6, 1e-6);
        assert!(!comparison.equal);
        assert!(comparison.differences_count > 0);
        assert_eq!(comparison.differences.len(), comparison.differences_count);
        assert!(comparison.average_cosine_similarity < 1.0);
        // Differences carry resolvable cells.
        for difference in &comparison.differences {
            assert!(difference.cell.x >= 0 && difference.cell.x < 8);
            assert!(difference.cell.y >= 0 && difference.cell.y < 8);
        }
    }

    #[test]
    fn test_flow_field_dimension_mismatch() {
        let small = open_grid(4, 4);
        let large = open_grid(8, 8);
        let mut generator = FlowFieldGenerator::new();
        let a = generator.generate(&small.view(), &[ivec2(3, 3)]);
        let b = generator.generate(&large.view(), &[ivec2(7, 7)]);
        let comparison = compare_flow_fields(&a, &b, 1e-6, 1e-6);
        assert!(!comparison.equal);
        assert_eq!(comparison.average_cosine_similarity, 0.0);
    }

    #[test]
    fn test_hpa_self_comparison_is_unity() {
        let buffer = open_grid(20, 20);
        let mut a = HpaPathfinder::with_config(HpaConfig {
            cluster_size: 5,
            ..HpaConfig::default()
        })
        .unwrap();
        let mut b = HpaPathfinder::with_config(HpaConfig {
            cluster_size: 5,
            ..HpaConfig::default()
        })
        .unwrap();
        let ra = a.find_path(&buffer.view(), ivec2(0, 0), ivec2(19, 19));
        let rb = b.find_path(&buffer.view(), ivec2(0, 0), ivec2(19, 19));
        let comparison = compare_hpa(&a, &b, &ra, &rb, 1e-6);
        assert_eq!(comparison.cluster_similarity, 1.0);
        assert_eq!(comparison.entrance_similarity, 1.0);
        assert_eq!(comparison.graph_similarity, 1.0);
        assert_eq!(comparison.path_similarity, 1.0);
        assert_eq!(comparison.overall_similarity, 1.0);
    }

    #[test]
    fn test_hpa_different_cluster_sizes_diverge() {
        let buffer = open_grid(20, 20);
        let mut a = HpaPathfinder::with_config(HpaConfig {
            cluster_size: 5,
            ..HpaConfig::default()
        })
        .unwrap();
        let mut b = HpaPathfinder::with_config(HpaConfig {
            cluster_size: 10,
            ..HpaConfig::default()
        })
        .unwrap();
        let ra = a.find_path(&buffer.view(), ivec2(0, 0), ivec2(19, 19));
        let rb = b.find_path(&buffer.view(), ivec2(0, 0), ivec2(19, 19));
        let comparison = compare_hpa(&a, &b, &ra, &rb, 1e-6);
        assert!(comparison.cluster_similarity < 1.0);
        assert!(comparison.overall_similarity < 1.0);
        assert!(comparison.overall_similarity > 0.0);
    }
}
