//! Dense (fully connected) layer.
//!
//! Performs the transformation `y = xW + b` with the bias broadcast across
//! the batch. The weight matrix is stored row-major as input_size ×
//! output_size.

use crate::error::Error;
use crate::layers::Mode;
use crate::optimizers::{Adam, Parameter};
use crate::shape::Shape;
use crate::utils::SimpleRng;

/// Fully connected layer with a weight matrix and bias vector.
///
/// Backward rules:
/// - weight gradient: `xᵗ · dOut`
/// - bias gradient: column-sum of `dOut`
/// - input gradient: `dOut · Wᵗ`
///
/// # Example
///
/// ```
/// use grayscale_cnn::layers::Dense;
/// use grayscale_cnn::optimizers::Adam;
/// use grayscale_cnn::shape::Shape;
/// use grayscale_cnn::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer = Dense::new(147, 128, Adam::default(), &mut rng);
/// assert_eq!(layer.compile(&Shape::d1(147)).unwrap(), Shape::d1(128));
/// ```
pub struct Dense {
    input_size: usize,
    output_size: usize,
    weights: Parameter,
    biases: Parameter,
    optimizer: Adam,

    // Forward cache, valid for one forward -> backward cycle.
    cached_input: Vec<f32>,
}

impl Dense {
    /// Create a new dense layer with Xavier initialization.
    ///
    /// Weights are sampled uniformly from [-limit, limit] with
    /// `limit = sqrt(6 / (input_size + output_size))`; biases start at zero.
    pub fn new(
        input_size: usize,
        output_size: usize,
        optimizer: Adam,
        rng: &mut SimpleRng,
    ) -> Self {
        let limit = (6.0f32 / (input_size + output_size) as f32).sqrt();
        let mut weights = vec![0.0f32; input_size * output_size];
        for value in &mut weights {
            *value = rng.gen_range_f32(-limit, limit);
        }

        Self {
            input_size,
            output_size,
            weights: Parameter::new(weights),
            biases: Parameter::new(vec![0.0f32; output_size]),
            optimizer,
            cached_input: Vec::new(),
        }
    }

    /// Validate the declared input size against the producing layer and bind
    /// fresh optimizer state.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(Error::Config("dense sizes must be positive".into()));
        }
        if shape_in.count() != self.input_size || shape_in.dims().len() != 1 {
            return Err(Error::ShapeMismatch {
                index: 0,
                kind: "dense",
                expected: Shape::d1(self.input_size),
                found: shape_in.clone(),
            });
        }

        self.weights.bind(self.optimizer.init_state(self.weights.len()));
        self.biases.bind(self.optimizer.init_state(self.biases.len()));
        self.weights.zero_grad();
        self.biases.zero_grad();
        self.cached_input.clear();

        Ok(Shape::d1(self.output_size))
    }

    /// `output = input · weights + bias`, bias broadcast across the batch.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, _mode: Mode) {
        let weights = self.weights.values();
        let biases = self.biases.values();

        for b in 0..batch_size {
            let in_base = b * self.input_size;
            let out_base = b * self.output_size;

            output[out_base..out_base + self.output_size].copy_from_slice(biases);

            for i in 0..self.input_size {
                let x = input[in_base + i];
                let w_base = i * self.output_size;
                for o in 0..self.output_size {
                    output[out_base + o] += x * weights[w_base + o];
                }
            }
        }

        self.cached_input.clear();
        self.cached_input
            .extend_from_slice(&input[..batch_size * self.input_size]);
    }

    /// Accumulate weight/bias gradients and compute the input gradient.
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let input = &self.cached_input;
        let (weights, grad_w) = self.weights.values_and_grad_mut();

        for b in 0..batch_size {
            let in_base = b * self.input_size;
            let out_base = b * self.output_size;

            for i in 0..self.input_size {
                let x = input[in_base + i];
                let w_base = i * self.output_size;
                let mut acc = 0.0f32;

                for o in 0..self.output_size {
                    let g = grad_output[out_base + o];
                    grad_w[w_base + o] += x * g;
                    acc += g * weights[w_base + o];
                }
                grad_input[in_base + i] = acc;
            }
        }

        let grad_b = self.biases.grad_mut();
        for b in 0..batch_size {
            let out_base = b * self.output_size;
            for o in 0..self.output_size {
                grad_b[o] += grad_output[out_base + o];
            }
        }
    }

    /// Adam step on weights and biases; gradients are cleared by the rule.
    pub fn update_parameters(&mut self, learning_rate: f32, regularization: f32) {
        self.optimizer
            .step(&mut self.weights, learning_rate, regularization);
        self.optimizer
            .step(&mut self.biases, learning_rate, regularization);
    }

    /// Number of input features.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Number of output features.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Weight parameter (input_size × output_size, row-major).
    pub fn weights(&self) -> &Parameter {
        &self.weights
    }

    /// Bias parameter (output_size).
    pub fn biases(&self) -> &Parameter {
        &self.biases
    }

    pub fn weights_mut(&mut self) -> &mut Parameter {
        &mut self.weights
    }

    pub fn biases_mut(&mut self) -> &mut Parameter {
        &mut self.biases
    }

    /// Total number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}
