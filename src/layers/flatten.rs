//! Flatten layer.

use crate::error::Error;
use crate::layers::Mode;
use crate::shape::Shape;

/// Reshapes a spatial (channels × height × width) activation into a flat
/// feature vector.
///
/// Buffers are already flat row-major slices, so both directions are plain
/// copies; the layer exists for the shape bookkeeping between convolutional
/// and dense stages.
pub struct Flatten {
    len: usize,
}

impl Flatten {
    /// Create a flatten layer. The element count is fixed at compile time.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Collapse the incoming shape into a single dimension.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        self.len = shape_in.count();
        Ok(Shape::d1(self.len))
    }

    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, _mode: Mode) {
        let total = batch_size * self.len;
        output[..total].copy_from_slice(&input[..total]);
    }

    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let total = batch_size * self.len;
        grad_input[..total].copy_from_slice(&grad_output[..total]);
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

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}
