use derive_setters::Setters;
use tch::Device;

use crate::{model::Architecture, shared::Optimizer, trajectory::RewardClip};

/// Settings fixed for the lifetime of a training run.
#[must_use]
#[derive(Setters, Clone, Copy, Debug)]
pub struct Config {
    pub device: Device,
    pub architecture: Architecture,
    /// Number of stacked frames per observation.
    pub history_len: usize,
    /// Discount factor.
    pub gamma: f32,
    pub reward_clip: Option<RewardClip>,
    pub optimizer: Optimizer,
    /// Cap on the global L2 norm of each applied gradient.
    pub max_grad_norm: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            architecture: Architecture::default(),
            history_len: 4,
            gamma: 0.99,
            reward_clip: Some(RewardClip::UNIT),
            optimizer: Optimizer::default(),
            max_grad_norm: Some(40.0),
        }
    }
}
