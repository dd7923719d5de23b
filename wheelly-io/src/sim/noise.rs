//! Deterministic noise source for the simulator.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Gaussian noise generator with reproducible seeding.
#[derive(Clone, Debug)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Creates the generator. Seed 0 draws from entropy, any other seed is
    /// reproducible.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Standard normal sample scaled by `sigma`.
    pub fn gaussian(&mut self, sigma: f32) -> f32 {
        if sigma == 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * sigma
    }

    /// Multiplicative perturbation factor `1 + N(0, sigma)`.
    pub fn factor(&mut self, sigma: f32) -> f32 {
        1.0 + self.gaussian(sigma)
    }
}
