use tch::{Kind, Tensor};

/// Weight of the entropy bonus in the policy loss.
pub const ENTROPY_BETA: f64 = 0.01;

/// Floor applied to probabilities before the logarithm.
pub const MIN_PROBABILITY: f64 = 1e-20;

/// The A3C objective for one trajectory.
///
/// Every term is summed over the batch rather than averaged, so longer
/// trajectories produce proportionally larger gradients.
#[derive(Debug)]
pub struct Loss {
    pub policy: Tensor,
    pub value: Tensor,
    /// Policy entropy summed over the batch.
    pub entropy: Tensor,
    pub total: Tensor,
}

impl Loss {
    /// `policy` and `actions` are `(B, A)`, the rest are `(B,)`.
    #[must_use]
    pub fn new(
        policy: &Tensor,
        actions: &Tensor,
        advantages: &Tensor,
        target_values: &Tensor,
        values: &Tensor,
    ) -> Self {
        let log_pi = policy.clamp(MIN_PROBABILITY, 1.0).log();

        let entropy = -(policy * &log_pi).sum_dim_intlist(1, false, Kind::Float);
        let log_likelihood = (&log_pi * actions).sum_dim_intlist(1, false, Kind::Float);

        let policy_loss =
            -(log_likelihood * advantages + &entropy * ENTROPY_BETA).sum(Kind::Float);
        let value_loss = (values - target_values).square().sum(Kind::Float) * 0.5;

        Self {
            total: &policy_loss + &value_loss,
            policy: policy_loss,
            value: value_loss,
            entropy: entropy.sum(Kind::Float),
        }
    }
}
