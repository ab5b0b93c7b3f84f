use tch::Tensor;

use crate::error::{Error, Result};

/// Per-worker buffers holding the gradient of the current training step.
#[derive(Debug)]
pub struct GradientAccumulator {
    buffers: Vec<Tensor>,
}

impl GradientAccumulator {
    /// One zeroed buffer per variable, in the same order.
    #[must_use]
    pub fn new(variables: &[Tensor]) -> Self {
        let buffers: Vec<Tensor> = tch::no_grad(|| variables.iter().map(Tensor::zeros_like).collect());
        Self { buffers }
    }

    /// Backpropagates `loss` into `variables` and adds the resulting
    /// gradients to the buffers. The variables' own gradients are cleared
    /// first so nothing leaks in from a previous step.
    pub fn accumulate(&mut self, loss: &Tensor, variables: &mut [Tensor]) -> Result<()> {
        if variables.len() != self.buffers.len() {
            return Err(Error::ParameterCount {
                expected: self.buffers.len(),
                got: variables.len(),
            });
        }

        for var in variables.iter_mut() {
            var.zero_grad();
        }

        loss.f_backward()?;

        let _guard = tch::no_grad_guard();
        for (buffer, var) in self.buffers.iter_mut().zip(variables.iter()) {
            let grad = var.grad();
            if grad.defined() {
                buffer.f_add_(&grad)?;
            }
        }

        Ok(())
    }

    /// Rescales the buffers so their global L2 norm is at most `max_norm`.
    /// Returns the norm measured before rescaling.
    pub fn clip_global_norm(&mut self, max_norm: f64) -> Result<f64> {
        let norm = self.global_norm()?;

        if norm > max_norm {
            let scale = max_norm / norm;
            let _guard = tch::no_grad_guard();
            for buffer in &mut self.buffers {
                buffer.f_mul_scalar_(scale)?;
            }
        }

        Ok(norm)
    }

    pub fn global_norm(&self) -> Result<f64> {
        let mut sum = 0.0;
        for buffer in &self.buffers {
            sum += buffer.square().sum(tch::Kind::Double).f_double_value(&[])?;
        }
        Ok(sum.sqrt())
    }

    #[must_use]
    pub fn gradients(&self) -> &[Tensor] {
        &self.buffers
    }

    pub fn reset(&mut self) {
        let _guard = tch::no_grad_guard();
        for buffer in &mut self.buffers {
            let _ = buffer.zero_();
        }
    }
}
