#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::Grid;
use bevy_math::IVec2;
use fxhash::FxHashSet;
use std::collections::VecDeque;

/// Stable validation error strings. Every planner reports these verbatim so
/// callers may assert on them regardless of the algorithm in use.
pub const ERROR_START_OUT_OF_BOUNDS: &str = "Start position out of bounds";
pub const ERROR_GOAL_OUT_OF_BOUNDS: &str = "Goal position out of bounds";
pub const ERROR_START_BLOCKED: &str = "Start position is blocked";
pub const ERROR_GOAL_BLOCKED: &str = "Goal position is blocked";
pub const ERROR_NO_PATH: &str = "No path exists between start and goal";
pub const ERROR_MAX_ITERATIONS: &str = "max iterations exceeded";
pub const ERROR_NO_GOALS: &str = "no goal cells provided";

/// Movement model options consulted by validation.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    pub allow_diagonal: bool,
    pub diagonal_only_when_clear: bool,
    /// Flood-fill from start to prove the goal reachable. Off by default;
    /// the flood costs O(width * height).
    pub check_connectivity: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            diagonal_only_when_clear: false,
            check_connectivity: false,
        }
    }
}

/// Outcome of validating planner inputs.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// True when no errors were recorded. Warnings do not affect validity.
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// All errors joined into one message, for embedding in a result.
    #[must_use]
    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Validate a single start/goal pair against the grid.
///
/// The same report is produced for the same inputs no matter which planner
/// asks; the error vocabulary is the constant set above.
#[must_use]
pub fn validate_endpoints(
    grid: &Grid,
    start: IVec2,
    goal: IVec2,
    options: &ValidationOptions,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !grid.in_bounds(start) {
        errors.push(ERROR_START_OUT_OF_BOUNDS.to_owned());
    } else if !grid.is_walkable(start) {
        errors.push(ERROR_START_BLOCKED.to_owned());
    }

    if !grid.in_bounds(goal) {
        errors.push(ERROR_GOAL_OUT_OF_BOUNDS.to_owned());
    } else if !grid.is_walkable(goal) {
        errors.push(ERROR_GOAL_BLOCKED.to_owned());
    }

    if errors.is_empty() && start == goal {
        warnings.push("start and goal are the same cell".to_owned());
    }

    if errors.is_empty() && options.check_connectivity && !flood_reaches(grid, start, &[goal], options)
    {
        errors.push(ERROR_NO_PATH.to_owned());
    }

    ValidationReport::from_parts(errors, warnings)
}

/// Validate a start against a set of goal cells (flow fields, multi-goal
/// hierarchical queries).
///
/// Individually unusable goals are warnings; the report only errors when no
/// usable goal remains.
#[must_use]
pub fn validate_goal_set(
    grid: &Grid,
    start: IVec2,
    goals: &[IVec2],
    options: &ValidationOptions,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !grid.in_bounds(start) {
        errors.push(ERROR_START_OUT_OF_BOUNDS.to_owned());
    } else if !grid.is_walkable(start) {
        errors.push(ERROR_START_BLOCKED.to_owned());
    }

    if goals.is_empty() {
        errors.push(ERROR_NO_GOALS.to_owned());
        return ValidationReport::from_parts(errors, warnings);
    }

    let mut usable = Vec::new();
    for &goal in goals {
        if !grid.in_bounds(goal) {
            warnings.push(format!("goal ({}, {}) is out of bounds", goal.x, goal.y));
        } else if !grid.is_walkable(goal) {
            warnings.push(format!("goal ({}, {}) is blocked", goal.x, goal.y));
        } else {
            usable.push(goal);
        }
    }

    if usable.is_empty() {
        let all_out_of_bounds = goals.iter().all(|g| !grid.in_bounds(*g));
        errors.push(if all_out_of_bounds {
            ERROR_GOAL_OUT_OF_BOUNDS.to_owned()
        } else {
            ERROR_GOAL_BLOCKED.to_owned()
        });
    }

    if errors.is_empty() && options.check_connectivity && !flood_reaches(grid, start, &usable, options)
    {
        errors.push(ERROR_NO_PATH.to_owned());
    }

    ValidationReport::from_parts(errors, warnings)
}

/// Breadth-first flood from `start` under the configured neighbour model,
/// stopping as soon as any goal is reached.
pub(crate) fn flood_reaches(
    grid: &Grid,
    start: IVec2,
    goals: &[IVec2],
    options: &ValidationOptions,
) -> bool {
    if goals.contains(&start) {
        return true;
    }
    let goal_set: FxHashSet<IVec2> = goals.iter().copied().collect();

    let mut visited = FxHashSet::default();
    let mut frontier = VecDeque::new();
    visited.insert(start);
    frontier.push_back(start);

    let mut reached = false;
    while let Some(current) = frontier.pop_front() {
        if reached {
            break;
        }
        grid.for_each_walkable_neighbor(
            current,
            options.allow_diagonal,
            options.diagonal_only_when_clear,
            |neighbor, _| {
                if reached || !visited.insert(neighbor) {
                    return;
                }
                if goal_set.contains(&neighbor) {
                    reached = true;
                    return;
                }
                frontier.push_back(neighbor);
            },
        );
    }
    reached
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CellState, GridBuffer};
    use bevy_math::ivec2;

    fn walled_grid() -> GridBuffer {
        // 10x10 with a full vertical wall at x = 5.
        let mut buffer = GridBuffer::filled(10, 10, CellState::Walkable).unwrap();
        for y in 0..10 {
            buffer.set(ivec2(5, y), CellState::Obstacle);
        }
        buffer
    }

    #[test]
    fn test_out_of_bounds_endpoints() {
        let buffer = GridBuffer::filled(4, 4, CellState::Walkable).unwrap();
        let grid = buffer.view();
        let report = validate_endpoints(
            &grid,
            ivec2(-1, 0),
            ivec2(4, 4),
            &ValidationOptions::default(),
        );
        assert!(!report.is_valid);
        assert!(report.errors.contains(&ERROR_START_OUT_OF_BOUNDS.to_owned()));
        assert!(report.errors.contains(&ERROR_GOAL_OUT_OF_BOUNDS.to_owned()));
    }

    #[test]
    fn test_blocked_endpoints() {
        let mut buffer = GridBuffer::filled(4, 4, CellState::Walkable).unwrap();
        buffer.set(ivec2(0, 0), CellState::Obstacle);
        buffer.set(ivec2(3, 3), CellState::Obstacle);
        let grid = buffer.view();
        let report = validate_endpoints(
            &grid,
            ivec2(0, 0),
            ivec2(3, 3),
            &ValidationOptions::default(),
        );
        assert_eq!(
            report.errors,
            vec![ERROR_START_BLOCKED.to_owned(), ERROR_GOAL_BLOCKED.to_owned()]
        );
    }

    #[test]
    fn test_connectivity_flood() {
        let buffer = walled_grid();
        let grid = buffer.view();
        let options = ValidationOptions {
            check_connectivity: true,
            ..ValidationOptions::default()
        };
        let report = validate_endpoints(&grid, ivec2(0, 0), ivec2(9, 9), &options);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec![ERROR_NO_PATH.to_owned()]);

        // Opening one cell restores connectivity.
        let mut open = walled_grid();
        open.set(ivec2(5, 4), CellState::Walkable);
        let report = validate_endpoints(&open.view(), ivec2(0, 0), ivec2(9, 9), &options);
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn test_connectivity_respects_neighbor_model() {
        // Diagonal-only gap: passable with corner cutting, not without.
        // 0 1
        // 1 0
        let mut buffer = GridBuffer::filled(2, 2, CellState::Walkable).unwrap();
        buffer.set(ivec2(1, 0), CellState::Obstacle);
        buffer.set(ivec2(0, 1), CellState::Obstacle);
        let grid = buffer.view();

        let permissive = ValidationOptions {
            check_connectivity: true,
            ..ValidationOptions::default()
        };
        assert!(validate_endpoints(&grid, ivec2(0, 0), ivec2(1, 1), &permissive).is_valid);

        let strict = ValidationOptions {
            check_connectivity: true,
            diagonal_only_when_clear: true,
            ..ValidationOptions::default()
        };
        let report = validate_endpoints(&grid, ivec2(0, 0), ivec2(1, 1), &strict);
        assert_eq!(report.errors, vec![ERROR_NO_PATH.to_owned()]);
    }

    #[test]
    fn test_goal_set_partial_blockage_warns() {
        let mut buffer = GridBuffer::filled(5, 5, CellState::Walkable).unwrap();
        buffer.set(ivec2(4, 4), CellState::Obstacle);
        let grid = buffer.view();
        let report = validate_goal_set(
            &grid,
            ivec2(0, 0),
            &[ivec2(4, 4), ivec2(2, 2)],
            &ValidationOptions::default(),
        );
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_goal_set_fully_blocked_errors() {
        let mut buffer = GridBuffer::filled(5, 5, CellState::Walkable).unwrap();
        buffer.set(ivec2(4, 4), CellState::Obstacle);
        let grid = buffer.view();
        let report = validate_goal_set(
            &grid,
            ivec2(0, 0),
            &[ivec2(4, 4)],
            &ValidationOptions::default(),
        );
        assert_eq!(report.errors, vec![ERROR_GOAL_BLOCKED.to_owned()]);

        let report = validate_goal_set(&grid, ivec2(0, 0), &[], &ValidationOptions::default());
        assert_eq!(report.errors, vec![ERROR_NO_GOALS.to_owned()]);
    }
}
