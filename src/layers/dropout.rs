//! Dropout regularization layer.

use crate::error::Error;
use crate::layers::Mode;
use crate::shape::Shape;
use crate::utils::SimpleRng;

/// Inverted dropout: keeps each activation with probability `keep_prob` and
/// scales survivors by `1 / keep_prob`, so inference needs no rescaling.
///
/// Training-mode forwards sample a fresh mask from the layer's own generator;
/// inference mode is the identity. Backward reuses the mask from the matching
/// forward, so gradients flow only through surviving activations.
pub struct Dropout {
    keep_prob: f32,
    len: usize,
    rng: SimpleRng,

    // Forward cache: multiplicative mask (1/keep_prob or 0 per element).
    cached_mask: Vec<f32>,
}

impl Dropout {
    /// Create a dropout layer keeping each activation with `keep_prob`.
    ///
    /// The layer splits off its own generator so mask sampling does not
    /// perturb the shuffling stream.
    pub fn new(keep_prob: f32, rng: &mut SimpleRng) -> Self {
        Self {
            keep_prob,
            len: 0,
            rng: rng.split(),
            cached_mask: Vec::new(),
        }
    }

    /// Shape-preserving; validates the keep probability.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(Error::Config(format!(
                "dropout keep probability {} must be in range (0.0, 1.0]",
                self.keep_prob
            )));
        }
        self.len = shape_in.count();
        self.cached_mask.clear();
        Ok(shape_in.clone())
    }

    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, mode: Mode) {
        let total = batch_size * self.len;

        match mode {
            Mode::Train => {
                let scale = 1.0 / self.keep_prob;
                self.cached_mask.clear();
                self.cached_mask.resize(total, 0.0);

                for i in 0..total {
                    if self.rng.next_f32() < self.keep_prob {
                        self.cached_mask[i] = scale;
                        output[i] = input[i] * scale;
                    } else {
                        output[i] = 0.0;
                    }
                }
            }
            Mode::Infer => {
                output[..total].copy_from_slice(&input[..total]);
            }
        }
    }

    /// Reapply the training mask to the gradient.
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let total = batch_size * self.len;
        for i in 0..total {
            grad_input[i] = grad_output[i] * self.cached_mask[i];
        }
    }

    /// Probability of keeping an activation.
    pub fn keep_prob(&self) -> f32 {
        self.keep_prob
    }

    /// Per-example element count (input and output agree).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the layer is compiled to a non-empty shape.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
