//! Softmax output layer.

use crate::error::Error;
use crate::layers::Mode;
use crate::shape::Shape;

/// Softmax over the feature dimension, one distribution per example.
///
/// Each row is shifted by its maximum before exponentiation so large logits
/// cannot overflow. The probabilities are cached for the loss computation.
///
/// The backward pass is the identity: the layer is fused with the
/// cross-entropy loss, whose combined gradient `probs - onehot` is formed by
/// the training loop and fed in from above. Softmax on its own has a dense
/// Jacobian; the fusion avoids materializing it.
pub struct Softmax {
    len: usize,

    // Forward cache: probabilities from the latest batch.
    cached_probs: Vec<f32>,
}

impl Softmax {
    /// Create a softmax layer. The class count is fixed at compile time.
    pub fn new() -> Self {
        Self {
            len: 0,
            cached_probs: Vec::new(),
        }
    }

    /// Shape-preserving; the incoming shape must be flat.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        if shape_in.dims().len() != 1 {
            return Err(Error::ShapeMismatch {
                index: 0,
                kind: "softmax",
                expected: Shape::d1(shape_in.count()),
                found: shape_in.clone(),
            });
        }
        self.len = shape_in.count();
        self.cached_probs.clear();
        Ok(shape_in.clone())
    }

    /// Row-max-stabilized softmax per example.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, _mode: Mode) {
        for b in 0..batch_size {
            let base = b * self.len;
            let row = &input[base..base + self.len];

            let mut max = row[0];
            for &v in &row[1..] {
                if v > max {
                    max = v;
                }
            }

            let mut sum = 0.0f32;
            for i in 0..self.len {
                let e = (row[i] - max).exp();
                output[base + i] = e;
                sum += e;
            }
            for i in 0..self.len {
                output[base + i] /= sum;
            }
        }

        self.cached_probs.clear();
        self.cached_probs
            .extend_from_slice(&output[..batch_size * self.len]);
    }

    /// Identity: the incoming gradient is already `probs - onehot` from the
    /// fused cross-entropy loss.
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let total = batch_size * self.len;
        grad_input[..total].copy_from_slice(&grad_output[..total]);
    }

    /// Per-example class count (input and output agree).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the layer is compiled to a non-empty shape.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Probabilities from the latest forward pass.
    pub fn probabilities(&self) -> &[f32] {
        &self.cached_probs
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean cross-entropy loss of softmax probabilities against integer labels.
///
/// `probs` holds one distribution of `classes` values per example.
pub fn cross_entropy(probs: &[f32], labels: &[u8], classes: usize) -> f32 {
    let mut total = 0.0f32;
    for (b, &label) in labels.iter().enumerate() {
        let p = probs[b * classes + label as usize];
        total -= p.ln();
    }
    total / labels.len() as f32
}
