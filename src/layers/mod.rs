//! Layer implementations for the network engine.
//!
//! Layers form a closed set of tagged variants behind the [`Layer`] enum:
//! adding a layer type means adding a variant, not extending a class
//! hierarchy. Every variant honors the same contract:
//!
//! - `compile(shape_in)` fixes shapes and binds optimizer state; shape
//!   mismatches are reported here, never during forward.
//! - `forward(input, output, batch_size, mode)` computes the output and
//!   caches whatever its own backward needs (inputs, masks, statistics).
//! - `backward(grad_output, grad_input, batch_size)` computes the gradient
//!   with respect to the input and accumulates parameter gradients. It must
//!   be called at most once per forward, and only after it.
//!
//! Buffers are flat row-major `f32` slices with the batch dimension leading;
//! per-example element counts come from [`Layer::input_len`] and
//! [`Layer::output_len`] after compilation.

pub mod batchnorm;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod flatten;
pub mod maxpool;
pub mod relu;
pub mod softmax;

pub use batchnorm::BatchNorm;
pub use conv2d::Conv2D;
pub use dense::Dense;
pub use dropout::Dropout;
pub use flatten::Flatten;
pub use maxpool::MaxPool;
pub use relu::Relu;
pub use softmax::Softmax;

use crate::error::Error;
use crate::shape::Shape;

/// Execution mode threaded through every forward pass.
///
/// BatchNorm and Dropout branch on this: in `Train` mode BatchNorm uses
/// batch statistics (and updates its running averages) and Dropout samples a
/// fresh mask; in `Infer` mode BatchNorm normalizes with running statistics
/// and Dropout is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Training-time forward: batch statistics, fresh dropout masks.
    Train,
    /// Inference-time forward: running statistics, no dropout.
    Infer,
}

/// The closed set of layer variants understood by the engine.
pub enum Layer {
    Conv2D(Conv2D),
    BatchNorm(BatchNorm),
    Relu(Relu),
    MaxPool(MaxPool),
    Flatten(Flatten),
    Dense(Dense),
    Softmax(Softmax),
    Dropout(Dropout),
}

impl Layer {
    /// Stable tag naming the layer type; also used in the persisted format.
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2D(_) => "conv2d",
            Layer::BatchNorm(_) => "batchnorm",
            Layer::Relu(_) => "relu",
            Layer::MaxPool(_) => "maxpool",
            Layer::Flatten(_) => "flatten",
            Layer::Dense(_) => "dense",
            Layer::Softmax(_) => "softmax",
            Layer::Dropout(_) => "dropout",
        }
    }

    /// Fix shapes against the producing layer's output shape, validate the
    /// configuration and bind fresh optimizer state to trainable parameters.
    ///
    /// Returns the layer's output shape on success.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        match self {
            Layer::Conv2D(l) => l.compile(shape_in),
            Layer::BatchNorm(l) => l.compile(shape_in),
            Layer::Relu(l) => l.compile(shape_in),
            Layer::MaxPool(l) => l.compile(shape_in),
            Layer::Flatten(l) => l.compile(shape_in),
            Layer::Dense(l) => l.compile(shape_in),
            Layer::Softmax(l) => l.compile(shape_in),
            Layer::Dropout(l) => l.compile(shape_in),
        }
    }

    /// Forward propagation for a batch.
    ///
    /// `input` holds `batch_size * input_len()` values, `output` must hold
    /// `batch_size * output_len()` values.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, mode: Mode) {
        match self {
            Layer::Conv2D(l) => l.forward(input, output, batch_size, mode),
            Layer::BatchNorm(l) => l.forward(input, output, batch_size, mode),
            Layer::Relu(l) => l.forward(input, output, batch_size, mode),
            Layer::MaxPool(l) => l.forward(input, output, batch_size, mode),
            Layer::Flatten(l) => l.forward(input, output, batch_size, mode),
            Layer::Dense(l) => l.forward(input, output, batch_size, mode),
            Layer::Softmax(l) => l.forward(input, output, batch_size, mode),
            Layer::Dropout(l) => l.forward(input, output, batch_size, mode),
        }
    }

    /// Backward propagation for a batch.
    ///
    /// Given the gradient of the loss w.r.t. this layer's output, writes the
    /// gradient w.r.t. its input and accumulates parameter gradients from the
    /// values cached by the matching forward call.
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        match self {
            Layer::Conv2D(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::BatchNorm(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::Relu(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::MaxPool(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::Flatten(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::Dense(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::Softmax(l) => l.backward(grad_output, grad_input, batch_size),
            Layer::Dropout(l) => l.backward(grad_output, grad_input, batch_size),
        }
    }

    /// Apply one optimizer step to every trainable parameter and clear the
    /// accumulated gradients. Layers without parameters are a no-op.
    pub fn update_parameters(&mut self, learning_rate: f32, regularization: f32) {
        match self {
            Layer::Conv2D(l) => l.update_parameters(learning_rate, regularization),
            Layer::BatchNorm(l) => l.update_parameters(learning_rate),
            Layer::Dense(l) => l.update_parameters(learning_rate, regularization),
            _ => {}
        }
    }

    /// Per-example input element count (valid after compile).
    pub fn input_len(&self) -> usize {
        match self {
            Layer::Conv2D(l) => l.input_len(),
            Layer::BatchNorm(l) => l.len(),
            Layer::Relu(l) => l.len(),
            Layer::MaxPool(l) => l.input_len(),
            Layer::Flatten(l) => l.len(),
            Layer::Dense(l) => l.input_size(),
            Layer::Softmax(l) => l.len(),
            Layer::Dropout(l) => l.len(),
        }
    }

    /// Per-example output element count (valid after compile).
    pub fn output_len(&self) -> usize {
        match self {
            Layer::Conv2D(l) => l.output_len(),
            Layer::BatchNorm(l) => l.len(),
            Layer::Relu(l) => l.len(),
            Layer::MaxPool(l) => l.output_len(),
            Layer::Flatten(l) => l.len(),
            Layer::Dense(l) => l.output_size(),
            Layer::Softmax(l) => l.len(),
            Layer::Dropout(l) => l.len(),
        }
    }

    /// Total number of trainable scalar parameters.
    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::Conv2D(l) => l.parameter_count(),
            Layer::BatchNorm(l) => l.parameter_count(),
            Layer::Dense(l) => l.parameter_count(),
            _ => 0,
        }
    }
}

impl From<Conv2D> for Layer {
    fn from(l: Conv2D) -> Self {
        Layer::Conv2D(l)
    }
}

impl From<BatchNorm> for Layer {
    fn from(l: BatchNorm) -> Self {
        Layer::BatchNorm(l)
    }
}

impl From<Relu> for Layer {
    fn from(l: Relu) -> Self {
        Layer::Relu(l)
    }
}

impl From<MaxPool> for Layer {
    fn from(l: MaxPool) -> Self {
        Layer::MaxPool(l)
    }
}

impl From<Flatten> for Layer {
    fn from(l: Flatten) -> Self {
        Layer::Flatten(l)
    }
}

impl From<Dense> for Layer {
    fn from(l: Dense) -> Self {
        Layer::Dense(l)
    }
}

impl From<Softmax> for Layer {
    fn from(l: Softmax) -> Self {
        Layer::Softmax(l)
    }
}

impl From<Dropout> for Layer {
    fn from(l: Dropout) -> Self {
        Layer::Dropout(l)
    }
}
