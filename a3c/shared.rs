use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tch::Tensor;

use crate::{
    error::{Error, Result},
    model::ActorCritic,
};

/// Update rule used when a worker's gradient is applied to the global
/// parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Optimizer {
    Sgd,
    /// RMSProp whose squared-gradient averages are shared by all workers.
    RmsProp { decay: f64, epsilon: f64 },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::RmsProp {
            decay: 0.99,
            epsilon: 0.1,
        }
    }
}

#[derive(Debug)]
struct VariableState {
    value: Tensor,
    square_avg: Tensor,
}

#[derive(Debug)]
struct SharedVariable {
    name: String,
    state: Mutex<VariableState>,
}

/// The global copy of the approximator's parameters.
///
/// Every variable sits behind its own lock. Applying a gradient or copying
/// values out locks one variable at a time, so concurrent workers may
/// interleave their updates across variables.
#[derive(Debug)]
pub struct GlobalParameters {
    variables: Vec<SharedVariable>,
    optimizer: Optimizer,
    updates: AtomicUsize,
}

impl GlobalParameters {
    /// Snapshots the current values of `model`'s variables.
    pub fn from_model<M>(model: &M, optimizer: Optimizer) -> Self
    where
        M: ActorCritic + ?Sized,
    {
        let variables: Vec<SharedVariable> = tch::no_grad(|| {
            model
                .variables()
                .into_iter()
                .map(|(name, var)| SharedVariable {
                    name,
                    state: Mutex::new(VariableState {
                        value: var.detach().copy(),
                        square_avg: var.zeros_like(),
                    }),
                })
                .collect()
        });

        Self {
            variables,
            optimizer,
            updates: AtomicUsize::new(0),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|var| var.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Number of gradients applied so far, across all workers.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    /// Fails unless `names` lists exactly this store's variables, in order.
    pub fn check_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let names: Vec<&str> = names.into_iter().collect();

        if names.len() != self.variables.len() {
            return Err(Error::ParameterCount {
                expected: self.variables.len(),
                got: names.len(),
            });
        }

        for (local, global) in names.iter().zip(self.names()) {
            if *local != global {
                return Err(Error::ParameterMismatch {
                    local: (*local).to_owned(),
                    global: global.to_owned(),
                });
            }
        }

        Ok(())
    }

    fn check_count(&self, got: usize) -> Result<()> {
        if got == self.variables.len() {
            Ok(())
        } else {
            Err(Error::ParameterCount {
                expected: self.variables.len(),
                got,
            })
        }
    }

    /// Applies one gradient per variable with the configured optimizer.
    pub fn apply_gradients(&self, gradients: &[Tensor], learning_rate: f64) -> Result<()> {
        self.check_count(gradients.len())?;

        let _guard = tch::no_grad_guard();
        for (var, grad) in self.variables.iter().zip(gradients) {
            let mut guard = var.state.lock();
            let state = &mut *guard;

            match self.optimizer {
                Optimizer::Sgd => {
                    state.value = &state.value - grad * learning_rate;
                }
                Optimizer::RmsProp { decay, epsilon } => {
                    state.square_avg = &state.square_avg * decay + grad.square() * (1.0 - decay);
                    let step = grad * learning_rate / (&state.square_avg + epsilon).sqrt();
                    state.value = &state.value - step;
                }
            }
        }

        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Overwrites `locals` with the current global values.
    pub fn copy_into(&self, locals: &mut [Tensor]) -> Result<()> {
        self.check_count(locals.len())?;

        let _guard = tch::no_grad_guard();
        for (var, local) in self.variables.iter().zip(locals.iter_mut()) {
            let state = var.state.lock();
            local.f_copy_(&state.value)?;
        }

        Ok(())
    }

    /// Deep copies of the current values, paired with their names.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Tensor)> {
        self.variables
            .iter()
            .map(|var| (var.name.clone(), var.state.lock().value.copy()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use tch::Kind;

    use super::*;
    use crate::model::{testing::LinearActorCritic, ObservationShape};

    const SHAPE: ObservationShape = ObservationShape {
        height: 2,
        width: 2,
        history_len: 1,
    };

    fn values(t: &Tensor) -> Vec<f32> {
        Vec::<f32>::try_from(&t.flatten(0, -1)).unwrap()
    }

    fn ones_like_store(store: &GlobalParameters) -> Vec<Tensor> {
        store
            .snapshot()
            .iter()
            .map(|(_, value)| value.ones_like())
            .collect()
    }

    #[test]
    fn snapshot_matches_the_model() {
        let model = LinearActorCritic::new(SHAPE, 3);
        let store = GlobalParameters::from_model(&model, Optimizer::Sgd);

        let names: Vec<_> = store.names().collect();
        assert_eq!(
            names,
            [
                "net.policy.bias",
                "net.policy.weight",
                "net.value.bias",
                "net.value.weight"
            ]
        );

        for ((_, local), (_, global)) in model.variables().iter().zip(store.snapshot()) {
            assert!(local.equal(&global));
        }
    }

    #[test]
    fn sgd_steps_against_the_gradient() {
        let model = LinearActorCritic::new(SHAPE, 2);
        let store = GlobalParameters::from_model(&model, Optimizer::Sgd);
        let before = store.snapshot();

        store
            .apply_gradients(&ones_like_store(&store), 0.5)
            .unwrap();

        for ((_, old), (_, new)) in before.iter().zip(store.snapshot()) {
            let expected = values(&(old - 0.5));
            for (a, b) in values(&new).iter().zip(expected) {
                assert!((a - b).abs() < 1e-6);
            }
        }
        assert_eq!(store.update_count(), 1);
    }

    #[test]
    fn rms_prop_shares_its_statistics() {
        let model = LinearActorCritic::new(SHAPE, 2);
        let store = GlobalParameters::from_model(
            &model,
            Optimizer::RmsProp {
                decay: 0.5,
                epsilon: 0.0,
            },
        );
        let before = store.snapshot();
        let gradients = ones_like_store(&store);

        store.apply_gradients(&gradients, 1.0).unwrap();
        store.apply_gradients(&gradients, 1.0).unwrap();

        // square_avg goes 0.5 then 0.75, so the steps are 1/sqrt(0.5) and 1/sqrt(0.75)
        let moved = 1.0 / 0.5_f32.sqrt() + 1.0 / 0.75_f32.sqrt();
        for ((_, old), (_, new)) in before.iter().zip(store.snapshot()) {
            for (a, b) in values(old).iter().zip(values(&new)) {
                assert!((a - b - moved).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn copy_into_overwrites_locals() {
        let source = LinearActorCritic::new(SHAPE, 2);
        let target = LinearActorCritic::new(SHAPE, 2);
        let store = GlobalParameters::from_model(&source, Optimizer::Sgd);

        let mut locals: Vec<Tensor> = target.variables().into_iter().map(|(_, v)| v).collect();
        store.copy_into(&mut locals).unwrap();

        for ((_, local), (_, global)) in target.variables().iter().zip(store.snapshot()) {
            assert!(local.equal(&global));
        }
    }

    #[test]
    fn rejects_a_foreign_parameter_set() {
        let model = LinearActorCritic::new(SHAPE, 2);
        let store = GlobalParameters::from_model(&model, Optimizer::Sgd);

        let err = store.check_names(["net.policy.bias"]).unwrap_err();
        assert!(matches!(err, Error::ParameterCount { expected: 4, got: 1 }));

        let err = store
            .check_names(["a", "net.policy.weight", "net.value.bias", "net.value.weight"])
            .unwrap_err();
        assert!(matches!(err, Error::ParameterMismatch { .. }));

        let too_few = vec![Tensor::zeros([1], (Kind::Float, tch::Device::Cpu))];
        assert!(store.apply_gradients(&too_few, 0.1).is_err());
    }

    #[test]
    fn concurrent_updates_are_all_applied() {
        let model = LinearActorCritic::new(SHAPE, 2);
        let store = Arc::new(GlobalParameters::from_model(&model, Optimizer::Sgd));
        let before = store.snapshot();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let gradients = ones_like_store(&store);
                    for _ in 0..25 {
                        store.apply_gradients(&gradients, 0.01).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.update_count(), 100);
        for ((_, old), (_, new)) in before.iter().zip(store.snapshot()) {
            for (a, b) in values(old).iter().zip(values(&new)) {
                assert!((a - b - 1.0).abs() < 1e-4);
            }
        }
    }
}
