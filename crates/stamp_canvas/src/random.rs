//! Seedable, replayable random source.
//!
//! A [`Generator`] never shares live state across workers. Every image and every
//! object gets its own substream derived from the base seed and its index, so any
//! worker can reproduce the draws for `(image_index, object_index)` without
//! coordination.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

const IMAGE_STREAM: u64 = 0x1A6E_5EED_0000_0001;
const OBJECT_STREAM: u64 = 0x0B1E_C75E_ED00_0002;

/// Deterministic pseudo-random generator with index-derived substreams.
#[derive(Debug)]
pub struct Generator {
    seed: u64,
    rng: StdRng,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Substream for `index`, independent of how many draws were taken from `self`.
    pub fn derive(&self, index: u64) -> Generator {
        Generator::new(seed_for_index(self.seed, index))
    }

    /// Substream used at the image level (tile order, scattered positions, noise).
    pub fn for_image(&self, image_index: usize) -> Generator {
        Generator::new(seed_for_index(self.seed ^ IMAGE_STREAM, image_index as u64))
    }

    /// Substream handed to the stamp builder for one object.
    pub fn for_object(&self, object_index: usize) -> Generator {
        Generator::new(seed_for_index(self.seed ^ OBJECT_STREAM, object_index as u64))
    }

    /// Uniform draw in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        (self.rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform integer in the inclusive range `[min, max]`.
    pub fn uniform_int(&mut self, min: i32, max: i32) -> i32 {
        debug_assert!(min <= max, "empty range [{min}, {max}]");
        let span = (max as i64 - min as i64 + 1) as f64;
        let k = ((self.uniform() * span) as i64).min(max as i64 - min as i64);
        (min as i64 + k) as i32
    }

    /// Zero-mean Gaussian draw with the given standard deviation.
    pub fn gaussian(&mut self, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return 0.0;
        }
        let z: f64 = StandardNormal.sample(&mut self.rng);
        z * sigma
    }

    /// In-place Fisher-Yates shuffle.
    pub fn permute<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = ((i + 1) as f64 * self.uniform()) as usize;
            items.swap(i, j.min(i));
        }
    }

    /// Raw access for collaborators that want an [`RngCore`].
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Creates a deterministic seed for an index from a base seed.
pub fn seed_for_index(base_seed: u64, index: u64) -> u64 {
    let mixed = base_seed ^ index.wrapping_mul(0x9E3779B97F4A7C15);
    mix_u64(mixed.wrapping_add(0xBF58476D1CE4E5B9))
}

#[inline]
fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
