//! Bilinear interpolation weights and the per-map interpolation cache.
//!
//! Sampling a map at a sky direction needs four pixel indices and their
//! weights. Computing them requires a projection lookup, which dominates the
//! cost of a sample, so each map remembers the last direction it was asked
//! about. Repeated queries for the same direction (for instance one per
//! layer, or one per energy/offset corner of a response cube) reuse the
//! stored weights.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::sky_dir::SkyDir;

/// Four pixel indices with bilinear weights.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Interpolator {
    indices: [usize; 4],
    weights: [f64; 4],
}

impl Interpolator {
    pub fn new(indices: [usize; 4], weights: [f64; 4]) -> Self {
        Self { indices, weights }
    }

    /// Bilinear weights on a planar grid for a continuous pixel position.
    ///
    /// The lower-left corner is clamped so that all four pixels lie on the
    /// grid; positions outside the grid extrapolate from the edge cell.
    /// Grids with a single row or column collapse the corresponding axis.
    ///
    /// # Arguments
    /// * `x`, `y` - Pixel coordinates (0-based, integer values at pixel centres)
    /// * `nx`, `ny` - Grid dimensions
    pub fn planar(x: f64, y: f64, nx: usize, ny: usize) -> Self {
        let (ix, wx) = Self::axis_weight(x, nx);
        let (iy, wy) = Self::axis_weight(y, ny);
        let step_x = usize::from(nx > 1);
        let step_y = if ny > 1 { nx } else { 0 };

        let idx1 = ix + iy * nx;
        let idx2 = idx1 + step_y;
        let idx3 = idx1 + step_x;
        let idx4 = idx2 + step_x;

        Self {
            indices: [idx1, idx2, idx3, idx4],
            weights: [
                (1.0 - wx) * (1.0 - wy),
                (1.0 - wx) * wy,
                wx * (1.0 - wy),
                wx * wy,
            ],
        }
    }

    fn axis_weight(position: f64, n: usize) -> (usize, f64) {
        if n < 2 {
            return (0, 0.0);
        }
        let left = (position.floor().max(0.0) as usize).min(n - 2);
        (left, position - left as f64)
    }

    pub fn indices(&self) -> &[usize; 4] {
        &self.indices
    }

    pub fn weights(&self) -> &[f64; 4] {
        &self.weights
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Weighted sum of `values` at the four indices.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.indices
            .iter()
            .zip(self.weights.iter())
            .map(|(&index, &weight)| weight * values[index])
            .sum()
    }
}

/// Hit/miss counters of an [`InterpolationCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Copy, Default)]
enum CacheState {
    #[default]
    Empty,
    /// Weights for `dir`; `None` when the direction lies outside the map
    Valid {
        dir: SkyDir,
        interpolator: Option<Interpolator>,
    },
}

#[derive(Debug, Default)]
struct CacheInner {
    state: CacheState,
    stats: CacheStats,
}

/// Memo of the interpolation weights for the most recently sampled direction.
///
/// Only geometry is cached, so changing map values leaves the cache valid.
/// Anything that changes the map geometry must call [`invalidate`].
///
/// [`invalidate`]: InterpolationCache::invalidate
#[derive(Default)]
pub struct InterpolationCache {
    inner: Mutex<CacheInner>,
}

impl InterpolationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the interpolator for `dir`, computing it with `compute` on a miss.
    pub fn lookup<F>(&self, dir: &SkyDir, compute: F) -> Option<Interpolator>
    where
        F: FnOnce(&SkyDir) -> Option<Interpolator>,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let CacheState::Valid {
            dir: cached,
            interpolator,
        } = inner.state
        {
            if cached == *dir {
                inner.stats.hits += 1;
                return interpolator;
            }
        }

        let interpolator = compute(dir);
        inner.state = CacheState::Valid {
            dir: *dir,
            interpolator,
        };
        inner.stats.misses += 1;
        interpolator
    }

    /// Forget the cached direction.
    pub fn invalidate(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.state = CacheState::Empty;
    }

    /// Whether the cache currently holds weights for exactly `dir`.
    pub fn is_valid_for(&self, dir: &SkyDir) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(inner.state, CacheState::Valid { dir: cached, .. } if cached == *dir)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
    }
}

impl Clone for InterpolationCache {
    fn clone(&self) -> Self {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Self {
            inner: Mutex::new(CacheInner {
                state: inner.state,
                stats: CacheStats::default(),
            }),
        }
    }
}

impl fmt::Debug for InterpolationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InterpolationCache")
            .field("state", &inner.state)
            .field("stats", &inner.stats)
            .finish()
    }
}
