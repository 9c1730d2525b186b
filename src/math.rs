use bevy_math::IVec2;

/// Euclidean distance squared between two cell coordinates.
#[inline]
#[must_use]
pub fn euclidean_squared(a: IVec2, b: IVec2) -> f32 {
    a.as_vec2().distance_squared(b.as_vec2())
}

/// Euclidean distance between two cell coordinates.
#[inline]
#[must_use]
pub fn euclidean(a: IVec2, b: IVec2) -> f32 {
    euclidean_squared(a, b).sqrt()
}

/// Manhattan distance `|dx| + |dy|`.
#[inline]
#[must_use]
pub fn manhattan(a: IVec2, b: IVec2) -> f32 {
    let d = (a - b).abs();
    (d.x + d.y) as f32
}

/// Chebyshev distance `max(|dx|, |dy|)`.
#[inline]
#[must_use]
pub fn chebyshev(a: IVec2, b: IVec2) -> i32 {
    let d = (a - b).abs();
    d.x.max(d.y)
}

/// Octile distance `max + (sqrt(2) - 1) * min`.
#[inline]
#[must_use]
pub fn octile(a: IVec2, b: IVec2) -> f32 {
    let d = (a - b).abs();
    let (min, max) = (d.x.min(d.y) as f32, d.x.max(d.y) as f32);
    max + (std::f32::consts::SQRT_2 - 1.0) * min
}

/// The diagonal-movement cost model: `diagonal * min + cardinal * (max - min)`.
///
/// With the default weights this is the exact 8-connected shortest-path cost
/// on an obstacle-free grid.
#[inline]
#[must_use]
pub fn diagonal_distance(a: IVec2, b: IVec2, cardinal_cost: f32, diagonal_cost: f32) -> f32 {
    let d = (a - b).abs();
    let (min, max) = (d.x.min(d.y) as f32, d.x.max(d.y) as f32);
    diagonal_cost * min + cardinal_cost * (max - min)
}

/// Movement cost for a single-cell step `delta`, which must have components
/// in `-1..=1`.
#[inline]
#[must_use]
pub fn step_cost(delta: IVec2, cardinal_cost: f32, diagonal_cost: f32) -> f32 {
    debug_assert!(delta.x.abs() <= 1 && delta.y.abs() <= 1);
    if delta.x != 0 && delta.y != 0 {
        diagonal_cost
    } else {
        cardinal_cost
    }
}

/// Equality under a tolerance, for real-valued comparisons.
#[inline]
#[must_use]
pub fn approx_eq(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance
}

/// Sum the per-step movement cost along a path of chebyshev-adjacent cells,
/// falling back to euclidean length for longer segments (any-angle paths).
#[must_use]
pub fn path_cost(path: &[IVec2], cardinal_cost: f32, diagonal_cost: f32) -> f32 {
    path.windows(2)
        .map(|pair| {
            let delta = pair[1] - pair[0];
            if delta.x.abs() <= 1 && delta.y.abs() <= 1 {
                step_cost(delta, cardinal_cost, diagonal_cost)
            } else {
                euclidean(pair[0], pair[1])
            }
        })
        .sum()
}
