#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::Direction;
use bevy_math::IVec2;
use thiserror::Error;

/// The state of a single grid cell.
///
/// `Goal`, `Agent` and `Start` are semantic markers; they do not block
/// movement. Only `Obstacle` does.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellState {
    #[default]
    Walkable = 0,
    Obstacle = 1,
    Goal = 2,
    Agent = 3,
    Start = 4,
}

impl CellState {
    /// Decode an external cell code (`0..=4`). Returns `None` for any other value.
    #[inline]
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CellState::Walkable),
            1 => Some(CellState::Obstacle),
            2 => Some(CellState::Goal),
            3 => Some(CellState::Agent),
            4 => Some(CellState::Start),
            _ => None,
        }
    }

    /// The external cell code for this state.
    #[inline]
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns true unless this cell blocks movement.
    #[inline]
    #[must_use]
    pub fn is_walkable(self) -> bool {
        !matches!(self, CellState::Obstacle)
    }
}

/// Errors raised when constructing a grid from caller-supplied data.
///
/// These are programming errors on the caller's side and are reported
/// fail-fast, unlike search failures which are carried inside results.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    /// Width or height is zero.
    #[error("grid dimensions must be positive, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    /// The cell array length does not equal `width * height`.
    #[error("grid length {len} does not match {width}x{height} = {expected}")]
    LengthMismatch {
        len: usize,
        width: u32,
        height: u32,
        expected: usize,
    },

    /// A raw cell code was outside the recognized set.
    #[error("cell code {code} at index {index} is not a valid cell state")]
    InvalidCode { code: u8, index: usize },
}

/// A borrowed, read-only view of a row-major cell grid.
///
/// The coordinate origin `(0, 0)` is the top-left cell; `x` increases to the
/// right and `y` increases downward. `index(x, y) = y * width + x`.
///
/// The view borrows the caller's cells for the duration of a planner call;
/// planners never retain it across calls.
#[derive(Debug, Clone, Copy)]
pub struct Grid<'a> {
    cells: &'a [CellState],
    width: u32,
    height: u32,
}

impl<'a> Grid<'a> {
    /// Create a view over `cells` with the given dimensions.
    ///
    /// Fails when a dimension is zero or the slice length does not match
    /// `width * height`.
    pub fn new(cells: &'a [CellState], width: u32, height: u32) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::ZeroDimension { width, height });
        }
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(GridError::LengthMismatch {
                len: cells.len(),
                width,
                height,
                expected,
            });
        }
        Ok(Self {
            cells,
            width,
            height,
        })
    }

    /// Grid width in cells.
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of cells.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always false; a [Grid] cannot be constructed empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The underlying cell slice, row-major.
    #[inline]
    #[must_use]
    pub fn cells(&self) -> &'a [CellState] {
        self.cells
    }

    /// Row-major index of an in-bounds point.
    #[inline]
    #[must_use]
    pub fn index(&self, p: IVec2) -> usize {
        debug_assert!(self.in_bounds(p));
        p.y as usize * self.width as usize + p.x as usize
    }

    /// The point for a row-major index.
    #[inline]
    #[must_use]
    pub fn point(&self, index: usize) -> IVec2 {
        IVec2::new(
            (index % self.width as usize) as i32,
            (index / self.width as usize) as i32,
        )
    }

    /// Returns true when `p` lies within the grid.
    #[inline]
    #[must_use]
    pub fn in_bounds(&self, p: IVec2) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as u32) < self.width && (p.y as u32) < self.height
    }

    /// The cell state at `p`, or `None` when out of bounds.
    #[inline]
    #[must_use]
    pub fn cell(&self, p: IVec2) -> Option<CellState> {
        if self.in_bounds(p) {
            Some(self.cells[self.index(p)])
        } else {
            None
        }
    }

    /// Returns true when `p` is in bounds and its cell does not block movement.
    #[inline]
    #[must_use]
    pub fn is_walkable(&self, p: IVec2) -> bool {
        self.in_bounds(p) && self.cells[self.index(p)].is_walkable()
    }

    /// Visit every walkable neighbour of `p` under the given movement model.
    ///
    /// With `allow_diagonal`, all eight neighbours are considered in the fixed
    /// [Direction::ALL] order; otherwise only the four cardinals. Under
    /// `diagonal_only_when_clear` a diagonal step is visited only when both of
    /// its orthogonal side cells are walkable, which forbids corner-cutting.
    #[inline]
    pub fn for_each_walkable_neighbor<F>(
        &self,
        p: IVec2,
        allow_diagonal: bool,
        diagonal_only_when_clear: bool,
        mut visit: F,
    ) where
        F: FnMut(IVec2, Direction),
    {
        let directions: &[Direction] = if allow_diagonal {
            &Direction::ALL
        } else {
            &Direction::CARDINAL
        };
        for &direction in directions {
            let step = direction.unit();
            let neighbor = p + step;
            if !self.is_walkable(neighbor) {
                continue;
            }
            if direction.is_diagonal()
                && diagonal_only_when_clear
                && !(self.is_walkable(p + IVec2::new(step.x, 0))
                    && self.is_walkable(p + IVec2::new(0, step.y)))
            {
                continue;
            }
            visit(neighbor, direction);
        }
    }
}

/// Owned cell storage, convenient for building grids from raw codes and for
/// mutating cells between planner calls.
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBuffer {
    cells: Vec<CellState>,
    width: u32,
    height: u32,
}

impl GridBuffer {
    /// Create a buffer of `width * height` cells, all set to `state`.
    pub fn filled(width: u32, height: u32, state: CellState) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::ZeroDimension { width, height });
        }
        Ok(Self {
            cells: vec![state; width as usize * height as usize],
            width,
            height,
        })
    }

    /// Decode a buffer from external cell codes.
    pub fn from_codes(codes: &[u8], width: u32, height: u32) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::ZeroDimension { width, height });
        }
        let expected = width as usize * height as usize;
        if codes.len() != expected {
            return Err(GridError::LengthMismatch {
                len: codes.len(),
                width,
                height,
                expected,
            });
        }
        let mut cells = Vec::with_capacity(codes.len());
        for (index, &code) in codes.iter().enumerate() {
            match CellState::from_code(code) {
                Some(state) => cells.push(state),
                None => return Err(GridError::InvalidCode { code, index }),
            }
        }
        Ok(Self {
            cells,
            width,
            height,
        })
    }

    /// Buffer width in cells.
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in cells.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Set the state of the cell at `p`. Returns false when `p` is out of bounds.
    pub fn set(&mut self, p: IVec2, state: CellState) -> bool {
        if p.x < 0 || p.y < 0 || p.x as u32 >= self.width || p.y as u32 >= self.height {
            return false;
        }
        self.cells[p.y as usize * self.width as usize + p.x as usize] = state;
        true
    }

    /// A borrowed [Grid] view over this buffer.
    #[inline]
    #[must_use]
    pub fn view(&self) -> Grid<'_> {
        Grid {
            cells: &self.cells,
            width: self.width,
            height: self.height,
        }
    }
}
