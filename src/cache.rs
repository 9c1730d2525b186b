#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::Grid;
use bevy_math::IVec2;
use fxhash::{FxBuildHasher, FxHasher};
use indexmap::IndexMap;
use log::debug;
use std::hash::Hasher;

/// Default per-instance capacity of a [ResultCache].
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Number of cells sampled (beyond the running checksum) when fingerprinting
/// a grid.
const FINGERPRINT_SAMPLES: usize = 64;

/// Hit/miss counters and occupancy of a [ResultCache].
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// A bounded mapping from input fingerprints to prior results.
///
/// Eviction is by insertion order: when the cache is full, the
/// oldest-inserted entry is discarded. Lookups count hits and misses;
/// [ResultCache::clear] resets both the entries and the counters.
#[derive(Debug, Clone)]
pub struct ResultCache<V> {
    entries: IndexMap<u64, V, FxBuildHasher>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache bounded to `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::default(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a fingerprint, counting the hit or miss.
    pub fn get(&mut self, key: u64) -> Option<V> {
        match self.entries.get(&key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result, evicting the oldest entry at capacity.
    pub fn insert(&mut self, key: u64, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.entries.shift_remove_index(0);
            debug!("result cache full, evicted oldest entry");
        }
        self.entries.insert(key, value);
    }

    /// Drop all entries and reset the hit/miss counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Number of cached results.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no results are cached.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current counters and occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Incremental fingerprint over a grid and the query parameters relevant to
/// one algorithm.
///
/// The grid contribution combines the dimensions, a strided sample of cell
/// states and a cheap position-weighted running checksum over all cells, so
/// that single-cell edits produce distinct keys without an exhaustive hash
/// pass per call.
#[derive(Debug)]
pub struct Fingerprint {
    hasher: FxHasher,
}

impl Fingerprint {
    /// Start a fingerprint from the grid content digest.
    #[must_use]
    pub fn of_grid(grid: &Grid) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write_u32(grid.width());
        hasher.write_u32(grid.height());

        let cells = grid.cells();
        let stride = (cells.len() / FINGERPRINT_SAMPLES).max(1);
        for index in (0..cells.len()).step_by(stride) {
            hasher.write_u8(cells[index].code());
        }

        let mut checksum: u64 = 0;
        for (index, cell) in cells.iter().enumerate() {
            let weighted = (cell.code() as u64 + 1).rotate_left((index % 57) as u32);
            checksum = checksum.wrapping_add(weighted);
        }
        hasher.write_u64(checksum);

        Self { hasher }
    }

    /// Mix in a coordinate.
    #[must_use]
    pub fn point(mut self, p: IVec2) -> Self {
        self.hasher.write_i32(p.x);
        self.hasher.write_i32(p.y);
        self
    }

    /// Mix in a coordinate set (order-sensitive).
    #[must_use]
    pub fn points(mut self, points: &[IVec2]) -> Self {
        self.hasher.write_usize(points.len());
        for p in points {
            self.hasher.write_i32(p.x);
            self.hasher.write_i32(p.y);
        }
        self
    }

    /// Mix in a boolean flag.
    #[must_use]
    pub fn flag(mut self, flag: bool) -> Self {
        self.hasher.write_u8(flag as u8);
        self
    }

    /// Mix in a real-valued parameter by bit pattern.
    #[must_use]
    pub fn value(mut self, value: f32) -> Self {
        self.hasher.write_u32(value.to_bits());
        self
    }

    /// Mix in an integer parameter.
    #[must_use]
    pub fn int(mut self, value: u32) -> Self {
        self.hasher.write_u32(value);
        self
    }

    /// Finalize to the cache key.
    #[must_use]
    pub fn finish(self) -> u64 {
        self.hasher.finish()
    }
}
