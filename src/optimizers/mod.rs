//! Optimizer abstractions for parameter updates.
//!
//! The engine updates parameters with the Adam rule. Adam itself is a
//! stateless rule factory: one `Adam` value (the hyperparameters) is supplied
//! when a trainable layer is constructed, and at compile time it produces one
//! independent [`AdamState`] per [`Parameter`]. Layers without an optimizer
//! binding (BatchNorm scale/shift) fall back to a plain gradient step.
//!
//! # Example
//!
//! ```
//! use grayscale_cnn::optimizers::{Adam, Parameter};
//!
//! let adam = Adam::default();
//! let mut param = Parameter::new(vec![1.0, 2.0]);
//! param.bind(adam.init_state(2));
//! param.grad_mut().copy_from_slice(&[1.0, 1.0]);
//! adam.step(&mut param, 0.001, 0.0);
//! // First step moves each value by exactly -learning_rate.
//! assert!((param.values()[0] - 0.999).abs() < 1e-6);
//! ```

pub mod adam;

pub use adam::{Adam, AdamState};

/// A trainable tensor: values, a gradient accumulator, and optional
/// per-parameter optimizer state.
///
/// A `Parameter` is owned exclusively by the layer that created it. The
/// gradient buffer is zeroed before each backward pass, accumulated across
/// the batch, and cleared again immediately after each update. Optimizer
/// state persists across batches and epochs and is reset only when the model
/// is (re)compiled.
pub struct Parameter {
    values: Vec<f32>,
    grad: Vec<f32>,
    state: Option<AdamState>,
}

impl Parameter {
    /// Wrap initial values into a parameter with a zeroed gradient buffer
    /// and no optimizer state.
    pub fn new(values: Vec<f32>) -> Self {
        let grad = vec![0.0f32; values.len()];
        Self {
            values,
            grad,
            state: None,
        }
    }

    /// Number of scalar values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the parameter holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Immutable view of the values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable view of the values. Used by the update rule and by `load`.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Replace the values wholesale. The new slice must have the same length.
    pub fn set_values(&mut self, values: &[f32]) {
        debug_assert_eq!(values.len(), self.values.len());
        self.values.copy_from_slice(values);
    }

    /// Immutable view of the accumulated gradient.
    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Mutable view of the gradient accumulator, for layers' backward rules.
    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    /// Values and gradient as one immutable and one mutable borrow, for
    /// backward rules that read weights while accumulating gradients.
    pub fn values_and_grad_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.values, &mut self.grad)
    }

    /// Zero the gradient accumulator.
    pub fn zero_grad(&mut self) {
        for g in &mut self.grad {
            *g = 0.0;
        }
    }

    /// Bind (or rebind) optimizer state to this parameter.
    ///
    /// Called once per compile; rebinding discards accumulated moments.
    pub fn bind(&mut self, state: AdamState) {
        self.state = Some(state);
    }

    /// Whether optimizer state is bound.
    pub fn is_bound(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn state(&self) -> Option<&AdamState> {
        self.state.as_ref()
    }

    /// Disjoint mutable borrows of values, gradient and optimizer state,
    /// so the update rule can read and write all three at once.
    pub(crate) fn split_for_update(
        &mut self,
    ) -> (&mut [f32], &mut [f32], &mut Option<AdamState>) {
        (&mut self.values, &mut self.grad, &mut self.state)
    }

    /// Plain gradient step for parameters without an optimizer binding:
    /// `value -= learning_rate * grad`. Clears the gradient afterwards.
    pub fn sgd_step(&mut self, learning_rate: f32) {
        for i in 0..self.values.len() {
            self.values[i] -= learning_rate * self.grad[i];
        }
        self.zero_grad();
    }
}
