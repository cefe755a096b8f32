//! Max pooling layer.

use crate::error::Error;
use crate::layers::Mode;
use crate::shape::Shape;

/// Non-overlapping max pooling over square windows.
///
/// The stride equals the window size, so both spatial dimensions must be
/// divisible by it; anything else is rejected at compile time. The forward
/// pass records, for every output cell, the flat index of the winning input
/// element; backward routes each gradient to exactly that element. Ties go to
/// the first element encountered in scan order.
pub struct MaxPool {
    window: usize,

    // Fixed at compile time.
    channels: usize,
    input_height: usize,
    input_width: usize,

    // Forward cache: absolute flat input index of each output's argmax.
    cached_argmax: Vec<u32>,
}

impl MaxPool {
    /// Create a max pooling layer with square `window × window` regions.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            channels: 0,
            input_height: 0,
            input_width: 0,
            cached_argmax: Vec::new(),
        }
    }

    /// Validate divisibility and fix the spatial layout.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        if self.window == 0 {
            return Err(Error::Config("maxpool window must be positive".into()));
        }
        let (channels, height, width) = match shape_in.as_d3() {
            Some(dims) => dims,
            None => {
                return Err(Error::ShapeMismatch {
                    index: 0,
                    kind: "maxpool",
                    expected: Shape::d3(1, self.window, self.window),
                    found: shape_in.clone(),
                });
            }
        };
        if height % self.window != 0 || width % self.window != 0 {
            return Err(Error::Config(format!(
                "maxpool window {} does not divide input {}x{}",
                self.window, height, width
            )));
        }

        self.channels = channels;
        self.input_height = height;
        self.input_width = width;
        self.cached_argmax.clear();

        Ok(Shape::d3(
            channels,
            height / self.window,
            width / self.window,
        ))
    }

    /// Take the maximum of each window, recording the winner's input index.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, _mode: Mode) {
        let out_h = self.input_height / self.window;
        let out_w = self.input_width / self.window;

        self.cached_argmax.clear();
        self.cached_argmax
            .resize(batch_size * self.channels * out_h * out_w, 0);

        for b in 0..batch_size {
            for c in 0..self.channels {
                let in_base = (b * self.channels + c) * self.input_height * self.input_width;
                let out_base = (b * self.channels + c) * out_h * out_w;

                for oy in 0..out_h {
                    for ox in 0..out_w {
                        let mut best_idx = in_base
                            + (oy * self.window) * self.input_width
                            + (ox * self.window);
                        let mut best = input[best_idx];

                        for ky in 0..self.window {
                            for kx in 0..self.window {
                                let iy = oy * self.window + ky;
                                let ix = ox * self.window + kx;
                                let idx = in_base + iy * self.input_width + ix;
                                // Strict comparison: ties keep the first
                                // element in scan order.
                                if input[idx] > best {
                                    best = input[idx];
                                    best_idx = idx;
                                }
                            }
                        }

                        let out_idx = out_base + oy * out_w + ox;
                        output[out_idx] = best;
                        self.cached_argmax[out_idx] = best_idx as u32;
                    }
                }
            }
        }
    }

    /// Route each output gradient to the input element that won its window.
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let total_in = batch_size * self.input_len();
        for g in grad_input[..total_in].iter_mut() {
            *g = 0.0;
        }

        let total_out = batch_size * self.output_len();
        for out_idx in 0..total_out {
            let in_idx = self.cached_argmax[out_idx] as usize;
            grad_input[in_idx] += grad_output[out_idx];
        }
    }

    /// Pooling window size.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Per-example input element count (valid after compile).
    pub fn input_len(&self) -> usize {
        self.channels * self.input_height * self.input_width
    }

    /// Per-example output element count (valid after compile).
    pub fn output_len(&self) -> usize {
        self.channels * (self.input_height / self.window) * (self.input_width / self.window)
    }
}
