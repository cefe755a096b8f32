//! Adam (Adaptive Moment Estimation) optimizer implementation.
//!
//! Adam combines momentum and adaptive learning rates with bias correction.
//! The update rule per step is:
//!
//! ```text
//! m_t = β1 * m_{t-1} + (1 - β1) * gradient
//! v_t = β2 * v_{t-1} + (1 - β2) * gradient²
//! m_hat = m_t / (1 - β1^t)
//! v_hat = v_t / (1 - β2^t)
//! parameter = parameter - α * m_hat / (√v_hat + ε)
//! ```
//!
//! An optional L2 regularization term adds `regularization * parameter` to
//! the gradient before the moment updates.
//!
//! # Reference
//!
//! Kingma, D. P., & Ba, J. (2014). Adam: A method for stochastic optimization.
//! arXiv preprint arXiv:1412.6980.

use crate::optimizers::Parameter;

/// Adam hyperparameters, acting as a state factory.
///
/// One `Adam` value is supplied per trainable layer at construction time; at
/// compile time it produces one independent [`AdamState`] per parameter, so
/// each weight matrix and bias vector tracks its own moment estimates.
///
/// The learning rate is not stored here: it is a training-run hyperparameter
/// passed to [`Adam::step`] by the training loop.
#[derive(Debug, Clone, Copy)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
}

impl Default for Adam {
    /// Defaults from the original paper: β1 = 0.9, β2 = 0.999, ε = 1e-8.
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Per-parameter Adam state: first/second moment estimates and step counter.
///
/// Initialized to zero, mutated on every update, reset only when the model
/// is recompiled.
#[derive(Debug, Clone)]
pub struct AdamState {
    /// First moment estimates (momentum).
    m: Vec<f32>,
    /// Second moment estimates (adaptive learning rate).
    v: Vec<f32>,
    /// Time step counter for bias correction.
    t: usize,
}

impl AdamState {
    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0f32; len],
            v: vec![0.0f32; len],
            t: 0,
        }
    }

    /// Current time step (number of updates applied).
    pub fn step_count(&self) -> usize {
        self.t
    }
}

impl Adam {
    /// Create an Adam rule with explicit hyperparameters.
    ///
    /// # Arguments
    ///
    /// * `beta1` - Exponential decay rate for first moment estimates (0 < β1 < 1)
    /// * `beta2` - Exponential decay rate for second moment estimates (0 < β2 < 1)
    /// * `epsilon` - Small constant for numerical stability (must be positive)
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            epsilon,
        }
    }

    /// Produce a fresh zeroed state instance for a parameter of `len` values.
    pub fn init_state(&self, len: usize) -> AdamState {
        AdamState::new(len)
    }

    /// Apply one Adam update to `param` using its accumulated gradient.
    ///
    /// Adds `regularization * value` to each gradient entry before the
    /// moment updates, applies the bias-corrected step, and clears the
    /// gradient buffer. If the parameter has no bound state yet, a fresh one
    /// is created (equivalent to binding at compile time).
    ///
    /// # Arguments
    ///
    /// * `param` - Parameter to update in place
    /// * `learning_rate` - Step size α (positive)
    /// * `regularization` - L2 coefficient (non-negative, 0 disables)
    pub fn step(&self, param: &mut Parameter, learning_rate: f32, regularization: f32) {
        let len = param.len();
        let (values, grad, state) = param.split_for_update();
        let state = state.get_or_insert_with(|| AdamState::new(len));

        state.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(state.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(state.t as i32);

        for i in 0..len {
            let g = grad[i] + regularization * values[i];

            state.m[i] = self.beta1 * state.m[i] + (1.0 - self.beta1) * g;
            state.v[i] = self.beta2 * state.v[i] + (1.0 - self.beta2) * g * g;

            let m_hat = state.m[i] / bias_correction1;
            let v_hat = state.v[i] / bias_correction2;

            values[i] -= learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);

            // Gradients are cleared immediately after each update, never
            // carried across batches.
            grad[i] = 0.0;
        }
    }
}
