use ndarray::{Array1, Array2, ArrayView1};
use tch::Tensor;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RewardClip {
    pub min: f32,
    pub max: f32,
}

impl RewardClip {
    pub const UNIT: RewardClip = RewardClip {
        min: -1.0,
        max: 1.0,
    };

    #[must_use]
    pub fn apply(self, reward: f32) -> f32 {
        reward.clamp(self.min, self.max)
    }
}

impl Default for RewardClip {
    fn default() -> Self {
        Self::UNIT
    }
}

#[derive(Debug)]
pub struct Step {
    /// `(height, width, history_len)` observation the action was chosen from.
    pub prestate: Tensor,
    pub predicted_value: f32,
    pub action: usize,
    pub reward: f32,
    pub terminal: bool,
}

/// Steps collected by one worker between two training steps.
///
/// Consumed by value by [`crate::runner::ModelRunner::train`].
#[must_use]
#[derive(Debug, Default)]
pub struct Trajectory {
    steps: Vec<Step>,
    bootstrap_value: f32,
}

impl Trajectory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
            bootstrap_value: 0.0,
        }
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Value estimate for the state following the last step.
    pub fn set_bootstrap_value(&mut self, bootstrap_value: f32) {
        self.bootstrap_value = bootstrap_value;
    }

    #[must_use]
    pub fn bootstrap_value(&self) -> f32 {
        self.bootstrap_value
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn ends_episode(&self) -> bool {
        self.steps.last().is_some_and(|step| step.terminal)
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn prestates(&self) -> Result<Tensor> {
        let prestates: Vec<&Tensor> = self.steps.iter().map(|step| &step.prestate).collect();
        Ok(Tensor::f_stack(&prestates, 0)?)
    }

    #[must_use]
    pub fn actions(&self) -> Vec<usize> {
        self.steps.iter().map(|step| step.action).collect()
    }

    pub fn targets(&self, gamma: f32, reward_clip: Option<RewardClip>) -> Targets {
        let rewards: Vec<f32> = self.steps.iter().map(|step| step.reward).collect();
        let predicted: Vec<f32> = self.steps.iter().map(|step| step.predicted_value).collect();

        Targets::compute(
            &rewards,
            &predicted,
            self.bootstrap_value,
            gamma,
            reward_clip,
        )
    }
}

/// Bootstrapped n-step returns and the advantages derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    pub values: Array1<f32>,
    pub advantages: Array1<f32>,
}

impl Targets {
    /// Folds the rewards from the last step back to the first, seeding the
    /// running return with `bootstrap_value`.
    ///
    /// `rewards` and `predicted_values` must have the same length.
    #[must_use]
    pub(crate) fn compute(
        rewards: &[f32],
        predicted_values: &[f32],
        bootstrap_value: f32,
        gamma: f32,
        reward_clip: Option<RewardClip>,
    ) -> Self {
        debug_assert_eq!(rewards.len(), predicted_values.len());

        let mut values: Vec<f32> = rewards
            .iter()
            .rev()
            .scan(bootstrap_value, |running_return, &reward| {
                let reward = reward_clip.map_or(reward, |clip| clip.apply(reward));
                *running_return = reward + gamma * *running_return;
                Some(*running_return)
            })
            .collect();
        values.reverse();

        let values = Array1::from(values);
        let advantages = &values - &ArrayView1::from(predicted_values);

        Self { values, advantages }
    }
}

pub fn one_hot(actions: &[usize], num_actions: usize) -> Result<Array2<f32>> {
    let mut matrix = Array2::zeros((actions.len(), num_actions));

    for (i, &action) in actions.iter().enumerate() {
        if action >= num_actions {
            return Err(Error::InvalidAction {
                action,
                num_actions,
            });
        }
        matrix[[i, action]] = 1.0;
    }

    Ok(matrix)
}
