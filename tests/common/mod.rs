//! Deterministic grid builders for the scenario tests.

use bevy_math::{ivec2, IVec2};
use grid_nav::{CellState, GridBuffer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A fully walkable grid.
pub fn open_grid(width: u32, height: u32) -> GridBuffer {
    GridBuffer::filled(width, height, CellState::Walkable).unwrap()
}

/// A seeded random obstacle grid. The generator is local to the call, so
/// identical seeds always produce identical grids.
pub fn random_grid(width: u32, height: u32, obstacle_density: f64, seed: u64) -> GridBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buffer = GridBuffer::filled(width, height, CellState::Walkable).unwrap();
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            if rng.gen_bool(obstacle_density) {
                buffer.set(ivec2(x, y), CellState::Obstacle);
            }
        }
    }
    buffer
}

/// A seeded random grid with the given endpoints forced open.
pub fn random_grid_with_endpoints(
    width: u32,
    height: u32,
    obstacle_density: f64,
    seed: u64,
    start: IVec2,
    goal: IVec2,
) -> GridBuffer {
    let mut buffer = random_grid(width, height, obstacle_density, seed);
    buffer.set(start, CellState::Walkable);
    buffer.set(goal, CellState::Walkable);
    buffer
}

/// A horizontal obstacle row at `wall_y`, open only at `gap_x` (pass `None`
/// for a sealed wall).
pub fn wall_row(width: u32, height: u32, wall_y: i32, gap_x: Option<i32>) -> GridBuffer {
    let mut buffer = open_grid(width, height);
    for x in 0..width as i32 {
        if Some(x) != gap_x {
            buffer.set(ivec2(x, wall_y), CellState::Obstacle);
        }
    }
    buffer
}
