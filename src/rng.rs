//! Deterministic random source for tree construction.
//!
//! The split machinery needs four primitives: a fair coin, a uniform float
//! in a half-open range, uniform indices, and standard-normal draws for
//! Gaussian hyperplane directions. Identical seeds yield identical indexes
//! on the same platform-and-SIMD combination.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Default seed used until [`SplitRng::reseed`] (or `Indexer::set_seed`)
/// is called.
pub const DEFAULT_SEED: u64 = 42;

/// Seeded random source owned by the indexer and passed to the metrics.
#[derive(Debug, Clone)]
pub struct SplitRng {
    inner: SmallRng,
}

impl SplitRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reset the stream to a fresh seed.
    pub fn reseed(&mut self, seed: u64) {
        self.inner = SmallRng::seed_from_u64(seed);
    }

    /// Fair coin.
    #[inline]
    pub fn flip(&mut self) -> bool {
        self.inner.gen()
    }

    /// Uniform float in `[lo, hi)`. Returns `lo` when the range is empty.
    #[inline]
    pub fn uniform(&mut self, lo: f32, hi: f32) -> f32 {
        if hi <= lo {
            lo
        } else {
            self.inner.gen_range(lo..hi)
        }
    }

    /// Uniform index in `[0, n)`.
    #[inline]
    pub fn index(&mut self, n: usize) -> usize {
        self.inner.gen_range(0..n)
    }

    /// Two distinct uniform indices in `[0, n)`. Requires `n >= 2`.
    pub fn index_pair(&mut self, n: usize) -> (usize, usize) {
        let i = self.index(n);
        let mut j = self.index(n - 1);
        if j >= i {
            j += 1;
        }
        (i, j)
    }

    /// Standard-normal draw via Box-Muller over two uniform draws.
    pub fn standard_normal(&mut self) -> f32 {
        let u1: f32 = 1.0 - self.inner.gen::<f32>(); // (0, 1], keeps ln finite
        let u2: f32 = self.inner.gen();
        (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
    }
}

impl Default for SplitRng {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
