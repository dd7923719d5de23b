//! Seeded random source threaded through the agent.
//!
//! All sampling is reproducible from the seed and the sequence of calls.

use ndarray::ArrayView1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Explicit random context used for weight initialization and policy
/// sampling.
#[derive(Clone, Debug)]
pub struct SeedRng {
    rng: SmallRng,
}

impl SeedRng {
    /// Creates the source. Seed 0 draws from entropy, any other seed is
    /// reproducible.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Standard normal sample.
    pub fn normal(&mut self) -> f32 {
        self.rng.sample(StandardNormal)
    }

    /// Uniform sample in [0, 1).
    pub fn uniform(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Samples a class index from a categorical distribution.
    ///
    /// Probabilities are assumed non-negative; any mass deficit falls on
    /// the last class.
    pub fn choose(&mut self, probabilities: ArrayView1<f32>) -> usize {
        let threshold = self.uniform();
        let mut cumulative = 0.0;
        for (index, &p) in probabilities.iter().enumerate() {
            cumulative += p;
            if threshold < cumulative {
                return index;
            }
        }
        probabilities.len().saturating_sub(1)
    }
}
