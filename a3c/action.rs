use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, SeedableRng};

use crate::error::Result;

/// Picks an action index from a policy vector.
pub trait ActionSelector {
    fn select(&mut self, policy: &[f32]) -> Result<usize>;
}

/// Samples actions in proportion to their probability.
#[derive(Debug)]
pub struct Sampling {
    rng: StdRng,
}

impl Sampling {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSelector for Sampling {
    fn select(&mut self, policy: &[f32]) -> Result<usize> {
        let distribution = WeightedIndex::new(policy)?;
        Ok(distribution.sample(&mut self.rng))
    }
}

/// Always takes the most probable action.
#[derive(Debug, Default, Clone, Copy)]
pub struct Greedy;

impl ActionSelector for Greedy {
    fn select(&mut self, policy: &[f32]) -> Result<usize> {
        let (action, _) = policy
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or(rand::distributions::WeightedError::NoItem)?;
        Ok(action)
    }
}
