//! ReLU activation layer.

use crate::error::Error;
use crate::layers::Mode;
use crate::shape::Shape;

/// Rectified linear unit: `max(0, x)` applied element-wise.
///
/// The forward pass caches a sign mask; backward passes the gradient through
/// exactly where the input was strictly positive.
pub struct Relu {
    len: usize,

    // Forward cache, valid for one forward -> backward cycle.
    cached_mask: Vec<bool>,
}

impl Relu {
    /// Create a ReLU activation. The element count is fixed at compile time.
    pub fn new() -> Self {
        Self {
            len: 0,
            cached_mask: Vec::new(),
        }
    }

    /// Shape-preserving; fixes the per-example element count.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        self.len = shape_in.count();
        self.cached_mask.clear();
        Ok(shape_in.clone())
    }

    /// `output[i] = max(0, input[i])`, caching which inputs were positive.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, _mode: Mode) {
        let total = batch_size * self.len;
        debug_assert_eq!(input.len(), total);

        self.cached_mask.clear();
        self.cached_mask.resize(total, false);

        for i in 0..total {
            if input[i] > 0.0 {
                output[i] = input[i];
                self.cached_mask[i] = true;
            } else {
                output[i] = 0.0;
            }
        }
    }

    /// Pass the gradient through where the input was strictly positive.
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let total = batch_size * self.len;
        for i in 0..total {
            grad_input[i] = if self.cached_mask[i] {
                grad_output[i]
            } else {
                0.0
            };
        }
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

impl Default for Relu {
    fn default() -> Self {
        Self::new()
    }
}
