//! Gradient descent optimizers.

use playground_core::request::Optimizer;

const SGD_LEARNING_RATE: f64 = 0.01;
const ADAM_LEARNING_RATE: f64 = 0.001;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

/// Per-parameter first and second moment estimates.
#[derive(Debug, Clone, Default)]
pub struct Moments {
    mean: Vec<f64>,
    variance: Vec<f64>,
}

/// Optimizer with its running state.
#[derive(Debug, Clone)]
pub enum OptimizerState {
    Sgd {
        learning_rate: f64,
    },
    Adam {
        learning_rate: f64,
        step: i32,
        moments: Vec<Moments>,
    },
}

impl OptimizerState {
    /// Fresh optimizer state. `learning_rate` falls back to the optimizer's default.
    #[must_use]
    pub fn new(kind: Optimizer, learning_rate: Option<f64>) -> Self {
        match kind {
            Optimizer::Sgd => Self::Sgd {
                learning_rate: learning_rate.unwrap_or(SGD_LEARNING_RATE),
            },
            Optimizer::Adam => Self::Adam {
                learning_rate: learning_rate.unwrap_or(ADAM_LEARNING_RATE),
                step: 0,
                moments: Vec::new(),
            },
        }
    }

    #[must_use]
    pub const fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd { learning_rate } | Self::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    /// Start a new update step. Call once per batch, before [`Self::update`].
    pub fn begin_step(&mut self) {
        if let Self::Adam { step, .. } = self {
            *step = step.saturating_add(1);
        }
    }

    /// Apply `grads * scale` to one parameter tensor.
    ///
    /// `slot` identifies the tensor; it must be stable across steps.
    pub fn update(&mut self, slot: usize, params: &mut [f64], grads: &[f64], scale: f64) {
        match self {
            Self::Sgd { learning_rate } => {
                for (p, g) in params.iter_mut().zip(grads) {
                    *p -= *learning_rate * g * scale;
                }
            }
            Self::Adam {
                learning_rate,
                step,
                moments,
            } => {
                if moments.len() <= slot {
                    moments.resize_with(slot + 1, Moments::default);
                }
                let state = &mut moments[slot];
                if state.mean.len() != params.len() {
                    state.mean = vec![0.0; params.len()];
                    state.variance = vec![0.0; params.len()];
                }

                let t = (*step).max(1);
                let rate =
                    *learning_rate * (1.0 - BETA2.powi(t)).sqrt() / (1.0 - BETA1.powi(t));
                for (((p, g), m), v) in params
                    .iter_mut()
                    .zip(grads)
                    .zip(state.mean.iter_mut())
                    .zip(state.variance.iter_mut())
                {
                    let g = g * scale;
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                    *p -= rate * *m / (v.sqrt() + ADAM_EPSILON);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!((OptimizerState::new(Optimizer::Sgd, None).learning_rate() - 0.01).abs() < 1e-12);
        assert!((OptimizerState::new(Optimizer::Adam, None).learning_rate() - 0.001).abs() < 1e-12);
        assert!(
            (OptimizerState::new(Optimizer::Adam, Some(0.1)).learning_rate() - 0.1).abs() < 1e-12
        );
    }

    #[test]
    fn test_sgd_step() {
        let mut sgd = OptimizerState::new(Optimizer::Sgd, Some(0.5));
        let mut params = [1.0, 2.0];
        sgd.begin_step();
        sgd.update(0, &mut params, &[1.0, -2.0], 0.5);
        assert_eq!(params, [0.75, 2.5]);
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut adam = OptimizerState::new(Optimizer::Adam, None);
        let mut params = [1.0, 1.0];
        adam.begin_step();
        adam.update(0, &mut params, &[0.5, -3.0], 1.0);
        assert!((params[0] - 0.999).abs() < 1e-6);
        assert!((params[1] - 1.001).abs() < 1e-6);
    }

    #[test]
    fn test_adam_slots_are_independent() {
        let mut adam = OptimizerState::new(Optimizer::Adam, Some(0.1));
        let mut a = [0.0];
        let mut b = [0.0, 0.0];
        for _ in 0..3 {
            adam.begin_step();
            adam.update(0, &mut a, &[1.0], 1.0);
            adam.update(1, &mut b, &[0.0, 0.0], 1.0);
        }
        assert!(a[0] < -0.25);
        assert_eq!(b, [0.0, 0.0]);
    }
}
