use std::sync::Arc;

use log::debug;
use tch::{Device, Kind, Tensor};

use crate::{
    config::Config,
    error::{Error, Result},
    gradients::GradientAccumulator,
    loss::Loss,
    model::ActorCritic,
    shared::GlobalParameters,
    trajectory::{one_hot, RewardClip, Trajectory},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub steps: usize,
    pub policy_loss: f64,
    pub value_loss: f64,
    pub entropy: f64,
    /// Norm of the accumulated gradient before clipping.
    pub grad_norm: f64,
}

/// One worker's view of the training run: a private approximator plus a
/// handle on the global parameters it trains.
pub struct ModelRunner<M>
where
    M: ActorCritic,
{
    thread_no: usize,
    model: M,
    variables: Vec<Tensor>,
    global: Arc<GlobalParameters>,
    accumulator: GradientAccumulator,
    gamma: f32,
    reward_clip: Option<RewardClip>,
    max_grad_norm: Option<f64>,
}

impl<M> ModelRunner<M>
where
    M: ActorCritic,
{
    /// Binds `model` to `global` and copies the global values in.
    pub fn new(
        thread_no: usize,
        model: M,
        global: Arc<GlobalParameters>,
        config: &Config,
    ) -> Result<Self> {
        let named = model.variables();
        global.check_names(named.iter().map(|(name, _)| name.as_str()))?;

        let variables: Vec<Tensor> = named.into_iter().map(|(_, var)| var).collect();
        let accumulator = GradientAccumulator::new(&variables);

        let mut runner = Self {
            thread_no,
            model,
            variables,
            global,
            accumulator,
            gamma: config.gamma,
            reward_clip: config.reward_clip,
            max_grad_norm: config.max_grad_norm,
        };
        runner.sync()?;

        debug!(
            worker = thread_no,
            variables = runner.variables.len();
            "model runner initialized"
        );

        Ok(runner)
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    #[must_use]
    pub fn global(&self) -> &Arc<GlobalParameters> {
        &self.global
    }

    fn device(&self) -> Device {
        self.model.device()
    }

    fn forward_single(&self, state: &Tensor) -> (Tensor, Tensor) {
        let batch = state.unsqueeze(0).to_device(self.device());
        tch::no_grad(|| self.model.forward(&batch))
    }

    /// Policy and value for a single `(height, width, history_len)` state.
    pub fn predict_action_state(&self, state: &Tensor) -> Result<(Vec<f32>, f32)> {
        let (policy, value) = self.forward_single(state);
        let policy = Vec::<f32>::try_from(&policy.get(0).to_device(Device::Cpu))?;
        let value = value.f_double_value(&[0])? as f32;
        Ok((policy, value))
    }

    pub fn predict_state(&self, state: &Tensor) -> Result<f32> {
        let (_, value) = self.forward_single(state);
        Ok(value.f_double_value(&[0])? as f32)
    }

    pub fn predict(&self, state: &Tensor) -> Result<Vec<f32>> {
        let (policy, _) = self.forward_single(state);
        Ok(Vec::<f32>::try_from(&policy.get(0).to_device(Device::Cpu))?)
    }

    /// Runs one A3C update from `trajectory`: accumulates the local gradient,
    /// applies it to the global parameters, resets the accumulator and syncs
    /// the local copy back from the global one.
    pub fn train(&mut self, trajectory: Trajectory, learning_rate: f64) -> Result<TrainStats> {
        if trajectory.is_empty() {
            return Err(Error::EmptyTrajectory);
        }

        let device = self.device();
        let len = trajectory.len() as i64;

        let targets = trajectory.targets(self.gamma, self.reward_clip);
        let actions = one_hot(&trajectory.actions(), self.model.num_actions())?;

        let prestates = trajectory.prestates()?.to_device(device);
        let actions = Tensor::from_slice(&actions.into_raw_vec())
            .view([len, self.model.num_actions() as i64])
            .to_device(device);
        let target_values = Tensor::from_slice(&targets.values.to_vec()).to_device(device);
        let advantages = Tensor::from_slice(&targets.advantages.to_vec()).to_device(device);

        let (policy, values) = self.model.forward(&prestates);
        let loss = Loss::new(&policy, &actions, &advantages, &target_values, &values);

        self.accumulator.accumulate(&loss.total, &mut self.variables)?;

        let grad_norm = match self.max_grad_norm {
            Some(max_norm) => self.accumulator.clip_global_norm(max_norm)?,
            None => self.accumulator.global_norm()?,
        };

        self.global
            .apply_gradients(self.accumulator.gradients(), learning_rate)?;
        self.accumulator.reset();
        self.sync()?;

        let stats = TrainStats {
            steps: trajectory.len(),
            policy_loss: loss.policy.to_kind(Kind::Double).f_double_value(&[])?,
            value_loss: loss.value.to_kind(Kind::Double).f_double_value(&[])?,
            entropy: loss.entropy.to_kind(Kind::Double).f_double_value(&[])?,
            grad_norm,
        };

        debug!(
            worker = self.thread_no,
            steps = stats.steps,
            learning_rate = learning_rate;
            "policy_loss={:.4} value_loss={:.4} entropy={:.4} grad_norm={:.4}",
            stats.policy_loss,
            stats.value_loss,
            stats.entropy,
            stats.grad_norm
        );

        Ok(stats)
    }

    /// Overwrites the local parameters with the current global values.
    pub fn sync(&mut self) -> Result<()> {
        self.global.copy_into(&mut self.variables)
    }
}
