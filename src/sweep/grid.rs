//! Search windows, axis grids and the Cartesian trial order

use serde::{Deserialize, Serialize};

/// Closed search window of one dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl ParamRange {
    /// New window
    pub const fn new(min: f64, max: f64) -> Self {
        ParamRange { min, max }
    }

    /// Window width
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Window midpoint
    pub fn mid(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// True for finite bounds with `min <= max`
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// `points` evenly spaced values; a single point is the midpoint
    pub fn axis(&self, points: usize) -> Vec<f64> {
        match points {
            0 => Vec::new(),
            1 => vec![self.mid()],
            n => {
                let step = self.width() / (n - 1) as f64;
                (0..n)
                    .map(|i| {
                        if i == n - 1 {
                            self.max
                        } else {
                            self.min + i as f64 * step
                        }
                    })
                    .collect()
            }
        }
    }

    /// Window of `width * factor` centred on `center`.
    ///
    /// The window slides to stay inside `bounds` without losing width and is
    /// never narrower than `min_width` (nor wider than `bounds`).
    pub fn shrink_around(
        &self,
        center: f64,
        factor: f64,
        min_width: f64,
        bounds: &ParamRange,
    ) -> Self {
        let width = (self.width() * factor).max(min_width).min(bounds.width());
        let mut lo = center - 0.5 * width;
        let mut hi = lo + width;
        if lo < bounds.min {
            lo = bounds.min;
            hi = lo + width;
        }
        if hi > bounds.max {
            hi = bounds.max;
            lo = hi - width;
        }
        ParamRange::new(lo, hi)
    }
}

/// Number of combinations over the given axes
pub fn combination_count(axes: &[Vec<f64>]) -> usize {
    axes.iter().map(Vec::len).product()
}

/// The `index`-th combination in lexicographic order (last axis fastest)
pub fn combination(axes: &[Vec<f64>], mut index: usize) -> Vec<f64> {
    let mut values = vec![0.0; axes.len()];
    for (slot, axis) in values.iter_mut().zip(axes).rev() {
        let len = axis.len().max(1);
        *slot = axis.get(index % len).copied().unwrap_or_default();
        index /= len;
    }
    values
}

/// All combinations in lexicographic order
pub fn combinations(axes: &[Vec<f64>]) -> Vec<Vec<f64>> {
    (0..combination_count(axes))
        .map(|i| combination(axes, i))
        .collect()
}
