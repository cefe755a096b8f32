//! 2D convolutional layer.
//!
//! Performs 2D convolution: slides a set of learnable kernels over the
//! zero-padded input to produce one feature map per kernel. Both forward and
//! backward are explicit loops over output positions and receptive-field
//! windows; the backward pass derives kernel, bias and input gradients from
//! the input cached by the matching forward call.

use crate::error::Error;
use crate::layers::Mode;
use crate::optimizers::{Adam, Parameter};
use crate::shape::Shape;
use crate::utils::SimpleRng;

/// 2D convolutional layer with learnable kernels and per-kernel biases.
///
/// Kernels have shape (out_channels × in_channels × kernel_size ×
/// kernel_size) stored flat in row-major order. Output spatial size follows
/// `floor((in + 2*padding - kernel_size) / stride) + 1`.
///
/// The spatial input size is not fixed at construction: it is bound when the
/// model is compiled, from the producing layer's output shape.
///
/// # Example
///
/// ```
/// use grayscale_cnn::layers::Conv2D;
/// use grayscale_cnn::optimizers::Adam;
/// use grayscale_cnn::shape::Shape;
/// use grayscale_cnn::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// // 1 input channel, 3 kernels, 5x5, padding 2, stride 1.
/// let mut layer = Conv2D::new(1, 3, 5, 2, 1, Adam::default(), &mut rng);
/// let out = layer.compile(&Shape::d3(1, 28, 28)).unwrap();
/// assert_eq!(out, Shape::d3(3, 28, 28));
/// ```
pub struct Conv2D {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    padding: isize,
    stride: usize,
    // Bound at compile time from the incoming shape.
    input_height: usize,
    input_width: usize,

    kernels: Parameter,
    biases: Parameter,
    optimizer: Adam,

    // Forward cache, valid for one forward -> backward cycle.
    cached_input: Vec<f32>,
}

impl Conv2D {
    /// Create a new convolutional layer with Xavier-initialized kernels.
    ///
    /// Kernels are sampled uniformly from [-limit, limit] with
    /// `limit = sqrt(6 / (fan_in + fan_out))` where
    /// `fan_in = in_channels * kernel_size²` and
    /// `fan_out = out_channels * kernel_size²`. Biases start at zero.
    ///
    /// # Arguments
    ///
    /// * `in_channels` - Number of input channels (1 for grayscale)
    /// * `out_channels` - Number of kernels / output feature maps
    /// * `kernel_size` - Side of the square kernel
    /// * `padding` - Symmetric zero-padding applied spatially
    /// * `stride` - Step between receptive-field windows
    /// * `optimizer` - Adam rule bound to both parameters at compile time
    /// * `rng` - Random number generator for weight initialization
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: isize,
        stride: usize,
        optimizer: Adam,
        rng: &mut SimpleRng,
    ) -> Self {
        let fan_in = (in_channels * kernel_size * kernel_size) as f32;
        let fan_out = (out_channels * kernel_size * kernel_size) as f32;
        let limit = (6.0f32 / (fan_in + fan_out)).sqrt();

        let weight_count = out_channels * in_channels * kernel_size * kernel_size;
        let mut weights = vec![0.0f32; weight_count];
        for value in &mut weights {
            *value = rng.gen_range_f32(-limit, limit);
        }

        Self {
            in_channels,
            out_channels,
            kernel_size,
            padding,
            stride,
            input_height: 0,
            input_width: 0,
            kernels: Parameter::new(weights),
            biases: Parameter::new(vec![0.0f32; out_channels]),
            optimizer,
            cached_input: Vec::new(),
        }
    }

    /// Validate configuration, fix the spatial input size and bind fresh
    /// optimizer state to kernels and biases.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        if self.kernel_size == 0 {
            return Err(Error::Config("conv2d kernel_size must be positive".into()));
        }
        if self.stride == 0 {
            return Err(Error::Config("conv2d stride must be positive".into()));
        }
        if self.padding < 0 {
            return Err(Error::Config("conv2d padding must be non-negative".into()));
        }

        let (c, h, w) = shape_in.as_d3().ok_or_else(|| {
            Error::Config(format!(
                "conv2d expects a channels x height x width input, got {}",
                shape_in
            ))
        })?;
        if c != self.in_channels {
            return Err(Error::ShapeMismatch {
                index: 0,
                kind: "conv2d",
                expected: Shape::d3(self.in_channels, h, w),
                found: shape_in.clone(),
            });
        }

        let span_h = h as isize + 2 * self.padding - self.kernel_size as isize;
        let span_w = w as isize + 2 * self.padding - self.kernel_size as isize;
        if span_h < 0 || span_w < 0 {
            return Err(Error::Config(format!(
                "conv2d kernel {} does not fit a {}x{} input with padding {}",
                self.kernel_size, h, w, self.padding
            )));
        }

        self.input_height = h;
        self.input_width = w;

        self.kernels.bind(self.optimizer.init_state(self.kernels.len()));
        self.biases.bind(self.optimizer.init_state(self.biases.len()));
        self.kernels.zero_grad();
        self.biases.zero_grad();
        self.cached_input.clear();

        Ok(Shape::d3(
            self.out_channels,
            self.output_height(),
            self.output_width(),
        ))
    }

    /// Output height: `floor((in + 2*pad - kernel) / stride) + 1`.
    pub fn output_height(&self) -> usize {
        ((self.input_height as isize + 2 * self.padding - self.kernel_size as isize)
            / self.stride as isize
            + 1) as usize
    }

    /// Output width: `floor((in + 2*pad - kernel) / stride) + 1`.
    pub fn output_width(&self) -> usize {
        ((self.input_width as isize + 2 * self.padding - self.kernel_size as isize)
            / self.stride as isize
            + 1) as usize
    }

    /// Slide every kernel over the zero-padded input.
    ///
    /// For each output position the receptive-field window is multiplied
    /// element-wise with the kernel and summed, plus the kernel's bias.
    /// Padding is handled by bounds checks rather than materializing a padded
    /// copy; out-of-range taps contribute zero either way.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, _mode: Mode) {
        let out_h = self.output_height();
        let out_w = self.output_width();
        let out_spatial = out_h * out_w;
        let in_spatial = self.input_height * self.input_width;
        let weights = self.kernels.values();

        for b in 0..batch_size {
            let in_base = b * (self.in_channels * in_spatial);
            let out_base_b = b * (self.out_channels * out_spatial);

            for oc in 0..self.out_channels {
                let bias = self.biases.values()[oc];
                let out_base = out_base_b + oc * out_spatial;

                for oy in 0..out_h {
                    for ox in 0..out_w {
                        let mut sum = bias;

                        for ic in 0..self.in_channels {
                            let w_base =
                                (oc * self.in_channels + ic) * self.kernel_size * self.kernel_size;
                            let in_base_c = in_base + ic * in_spatial;

                            for ky in 0..self.kernel_size {
                                for kx in 0..self.kernel_size {
                                    let iy = oy as isize * self.stride as isize + ky as isize
                                        - self.padding;
                                    let ix = ox as isize * self.stride as isize + kx as isize
                                        - self.padding;

                                    if iy >= 0
                                        && iy < self.input_height as isize
                                        && ix >= 0
                                        && ix < self.input_width as isize
                                    {
                                        let in_idx = in_base_c
                                            + iy as usize * self.input_width
                                            + ix as usize;
                                        let w_idx = w_base + ky * self.kernel_size + kx;
                                        sum += input[in_idx] * weights[w_idx];
                                    }
                                }
                            }
                        }

                        output[out_base + oy * out_w + ox] = sum;
                    }
                }
            }
        }

        // Cache the input for the gradient derivations in backward.
        self.cached_input.clear();
        self.cached_input
            .extend_from_slice(&input[..batch_size * self.in_channels * in_spatial]);
    }

    /// Backward pass from the cached forward input.
    ///
    /// - kernel gradient: cross-correlation of the (padded) input with the
    ///   output gradient
    /// - bias gradient: sum of the output gradient over batch and spatial
    ///   positions
    /// - input gradient: full convolution of the output gradient with the
    ///   spatially flipped kernels, accumulated through the same bounds
    ///   checks that implemented padding in forward
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let out_h = self.output_height();
        let out_w = self.output_width();
        let out_spatial = out_h * out_w;
        let in_spatial = self.input_height * self.input_width;

        let input = &self.cached_input;
        let (weights, grad_w) = self.kernels.values_and_grad_mut();

        for v in grad_input.iter_mut() {
            *v = 0.0;
        }

        for b in 0..batch_size {
            let in_base = b * (self.in_channels * in_spatial);
            let g_base_b = b * (self.out_channels * out_spatial);

            for oc in 0..self.out_channels {
                let g_base = g_base_b + oc * out_spatial;

                for ic in 0..self.in_channels {
                    let w_base = (oc * self.in_channels + ic) * self.kernel_size * self.kernel_size;
                    let in_base_c = in_base + ic * in_spatial;

                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let g = grad_output[g_base + oy * out_w + ox];

                            for ky in 0..self.kernel_size {
                                for kx in 0..self.kernel_size {
                                    let iy = oy as isize * self.stride as isize + ky as isize
                                        - self.padding;
                                    let ix = ox as isize * self.stride as isize + kx as isize
                                        - self.padding;

                                    if iy >= 0
                                        && iy < self.input_height as isize
                                        && ix >= 0
                                        && ix < self.input_width as isize
                                    {
                                        let in_idx = in_base_c
                                            + iy as usize * self.input_width
                                            + ix as usize;
                                        let w_idx = w_base + ky * self.kernel_size + kx;

                                        grad_w[w_idx] += g * input[in_idx];
                                        grad_input[in_idx] += g * weights[w_idx];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let grad_b = self.biases.grad_mut();
        for b in 0..batch_size {
            for oc in 0..self.out_channels {
                let g_base = (b * self.out_channels + oc) * out_spatial;
                for s in 0..out_spatial {
                    grad_b[oc] += grad_output[g_base + s];
                }
            }
        }
    }

    /// Adam step on kernels and biases; gradients are cleared by the rule.
    pub fn update_parameters(&mut self, learning_rate: f32, regularization: f32) {
        self.optimizer
            .step(&mut self.kernels, learning_rate, regularization);
        self.optimizer
            .step(&mut self.biases, learning_rate, regularization);
    }

    /// Per-example input element count.
    pub fn input_len(&self) -> usize {
        self.in_channels * self.input_height * self.input_width
    }

    /// Per-example output element count.
    pub fn output_len(&self) -> usize {
        self.out_channels * self.output_height() * self.output_width()
    }

    /// Kernel parameter (out_channels × in_channels × k × k, flat).
    pub fn kernels(&self) -> &Parameter {
        &self.kernels
    }

    /// Bias parameter (one per kernel).
    pub fn biases(&self) -> &Parameter {
        &self.biases
    }

    pub fn kernels_mut(&mut self) -> &mut Parameter {
        &mut self.kernels
    }

    pub fn biases_mut(&mut self) -> &mut Parameter {
        &mut self.biases
    }

    /// Total number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        self.kernels.len() + self.biases.len()
    }
}
