/// Learning rate as a function of the global step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LearningRate {
    Constant(f64),
    /// Anneals linearly from `start` to `end` over `total_steps`, then holds `end`.
    Linear {
        start: f64,
        end: f64,
        total_steps: usize,
    },
}

impl LearningRate {
    #[must_use]
    pub fn at(&self, step: usize) -> f64 {
        match *self {
            LearningRate::Constant(lr) => lr,
            LearningRate::Linear {
                start,
                end,
                total_steps,
            } => {
                if total_steps == 0 || step >= total_steps {
                    return end;
                }
                let progress = step as f64 / total_steps as f64;
                start + (end - start) * progress
            }
        }
    }
}

impl Default for LearningRate {
    fn default() -> Self {
        LearningRate::Constant(7e-4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_ignores_the_step() {
        let lr = LearningRate::Constant(1e-3);
        assert!((lr.at(0) - 1e-3).abs() < f64::EPSILON);
        assert!((lr.at(1_000_000) - 1e-3).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_anneals_then_holds() {
        let lr = LearningRate::Linear {
            start: 1e-3,
            end: 0.0,
            total_steps: 100,
        };

        assert!((lr.at(0) - 1e-3).abs() < 1e-12);
        assert!((lr.at(50) - 5e-4).abs() < 1e-12);
        assert!(lr.at(100).abs() < 1e-12);
        assert!(lr.at(250).abs() < 1e-12);
    }

    #[test]
    fn zero_length_schedule_uses_the_end_rate() {
        let lr = LearningRate::Linear {
            start: 1.0,
            end: 0.5,
            total_steps: 0,
        };
        assert!((lr.at(3) - 0.5).abs() < f64::EPSILON);
    }
}
