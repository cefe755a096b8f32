//! Batch normalization layer.
//!
//! Normalizes activations per channel to zero mean and unit variance using
//! batch statistics during training, then applies a learnable scale (gamma)
//! and shift (beta). Running exponential averages of the batch statistics are
//! maintained for inference-mode normalization.
//!
//! For spatial inputs (channels × height × width) the statistics are taken
//! over the batch and both spatial dimensions; for flat feature vectors each
//! feature is its own channel.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep
//! Network Training by Reducing Internal Covariate Shift. ICML.

use crate::error::Error;
use crate::layers::Mode;
use crate::optimizers::Parameter;
use crate::shape::Shape;

/// Batch normalization with learnable per-channel scale and shift.
///
/// The channel layout is fixed when the model is compiled: a spatial input
/// shape (C, H, W) yields C channels of H·W elements each, a flat shape (F)
/// yields F channels of one element. Gamma starts at 1, beta at 0.
///
/// The mode flag passed to `forward` selects batch statistics (training,
/// running averages updated) versus running statistics (inference). Callers
/// must not interleave training and inference forwards without switching the
/// mode deliberately; the running statistics are only mutated in training
/// mode.
pub struct BatchNorm {
    epsilon: f32,
    momentum: f32,

    // Fixed at compile time from the incoming shape.
    channels: usize,
    spatial: usize,

    // Learnable parameters, updated with a plain gradient step.
    gamma: Parameter,
    beta: Parameter,

    // Running statistics for inference.
    running_mean: Vec<f32>,
    running_var: Vec<f32>,

    // Forward cache, valid for one forward -> backward cycle.
    cached_mean: Vec<f32>,
    cached_std: Vec<f32>,
    cached_normalized: Vec<f32>,
}

impl BatchNorm {
    /// Create a batch normalization layer.
    ///
    /// # Arguments
    ///
    /// * `epsilon` - Stability constant added to the variance (typical 1e-5)
    /// * `momentum` - EMA factor for running statistics:
    ///   `running = momentum * running + (1 - momentum) * batch`
    pub fn new(epsilon: f32, momentum: f32) -> Self {
        Self {
            epsilon,
            momentum,
            channels: 0,
            spatial: 0,
            gamma: Parameter::new(Vec::new()),
            beta: Parameter::new(Vec::new()),
            running_mean: Vec::new(),
            running_var: Vec::new(),
            cached_mean: Vec::new(),
            cached_std: Vec::new(),
            cached_normalized: Vec::new(),
        }
    }

    /// Fix the channel layout from the incoming shape and reset parameters
    /// and running statistics.
    pub fn compile(&mut self, shape_in: &Shape) -> Result<Shape, Error> {
        if self.epsilon <= 0.0 {
            return Err(Error::Config("batchnorm epsilon must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(Error::Config(
                "batchnorm momentum must be in range [0.0, 1.0]".into(),
            ));
        }

        let (channels, spatial) = match shape_in.as_d3() {
            Some((c, h, w)) => (c, h * w),
            None => (shape_in.count(), 1),
        };
        if channels == 0 || spatial == 0 {
            return Err(Error::Config("batchnorm input shape is empty".into()));
        }

        self.channels = channels;
        self.spatial = spatial;
        self.gamma = Parameter::new(vec![1.0f32; channels]);
        self.beta = Parameter::new(vec![0.0f32; channels]);
        self.running_mean = vec![0.0f32; channels];
        self.running_var = vec![0.0f32; channels];
        self.cached_mean.clear();
        self.cached_std.clear();
        self.cached_normalized.clear();

        Ok(shape_in.clone())
    }

    /// Normalize per channel, then scale and shift.
    ///
    /// Training mode computes batch mean/variance over batch and spatial
    /// positions, caches the normalized values for backward, and folds the
    /// batch statistics into the running averages. Inference mode normalizes
    /// with the running statistics and leaves them untouched.
    pub fn forward(&mut self, input: &[f32], output: &mut [f32], batch_size: usize, mode: Mode) {
        let len = self.len();
        debug_assert_eq!(input.len(), batch_size * len);
        debug_assert_eq!(output.len(), batch_size * len);

        match mode {
            Mode::Train => self.forward_train(input, output, batch_size),
            Mode::Infer => self.forward_infer(input, output, batch_size),
        }
    }

    fn forward_train(&mut self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let count = (batch_size * self.spatial) as f32;

        let mut mean = vec![0.0f32; self.channels];
        let mut var = vec![0.0f32; self.channels];

        for b in 0..batch_size {
            for c in 0..self.channels {
                let base = (b * self.channels + c) * self.spatial;
                for s in 0..self.spatial {
                    mean[c] += input[base + s];
                }
            }
        }
        for m in &mut mean {
            *m /= count;
        }

        for b in 0..batch_size {
            for c in 0..self.channels {
                let base = (b * self.channels + c) * self.spatial;
                for s in 0..self.spatial {
                    let d = input[base + s] - mean[c];
                    var[c] += d * d;
                }
            }
        }
        for v in &mut var {
            *v /= count;
        }

        let std: Vec<f32> = var.iter().map(|v| (v + self.epsilon).sqrt()).collect();

        self.cached_normalized.clear();
        self.cached_normalized.resize(input.len(), 0.0);

        let gamma = self.gamma.values();
        let beta = self.beta.values();
        for b in 0..batch_size {
            for c in 0..self.channels {
                let base = (b * self.channels + c) * self.spatial;
                for s in 0..self.spatial {
                    let normalized = (input[base + s] - mean[c]) / std[c];
                    self.cached_normalized[base + s] = normalized;
                    output[base + s] = gamma[c] * normalized + beta[c];
                }
            }
        }

        for c in 0..self.channels {
            self.running_mean[c] =
                self.momentum * self.running_mean[c] + (1.0 - self.momentum) * mean[c];
            self.running_var[c] =
                self.momentum * self.running_var[c] + (1.0 - self.momentum) * var[c];
        }

        self.cached_mean = mean;
        self.cached_std = std;
    }

    fn forward_infer(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let gamma = self.gamma.values();
        let beta = self.beta.values();

        for b in 0..batch_size {
            for c in 0..self.channels {
                let base = (b * self.channels + c) * self.spatial;
                let std = (self.running_var[c] + self.epsilon).sqrt();
                for s in 0..self.spatial {
                    let normalized = (input[base + s] - self.running_mean[c]) / std;
                    output[base + s] = gamma[c] * normalized + beta[c];
                }
            }
        }
    }

    /// Standard batch-norm backward from the cached statistics.
    ///
    /// With m = batch · spatial elements per channel and x̂ the cached
    /// normalized values:
    ///
    /// ```text
    /// dβ      = Σ dOut
    /// dγ      = Σ dOut · x̂
    /// dx      = γ / (m · σ) · (m · dOut − Σ dOut − x̂ · Σ (dOut · x̂))
    /// ```
    pub fn backward(&mut self, grad_output: &[f32], grad_input: &mut [f32], batch_size: usize) {
        let m = (batch_size * self.spatial) as f32;
        let normalized = &self.cached_normalized;

        let mut sum_g = vec![0.0f32; self.channels];
        let mut sum_g_norm = vec![0.0f32; self.channels];

        for b in 0..batch_size {
            for c in 0..self.channels {
                let base = (b * self.channels + c) * self.spatial;
                for s in 0..self.spatial {
                    let g = grad_output[base + s];
                    sum_g[c] += g;
                    sum_g_norm[c] += g * normalized[base + s];
                }
            }
        }

        {
            let grad_gamma = self.gamma.grad_mut();
            for c in 0..self.channels {
                grad_gamma[c] += sum_g_norm[c];
            }
        }
        {
            let grad_beta = self.beta.grad_mut();
            for c in 0..self.channels {
                grad_beta[c] += sum_g[c];
            }
        }

        let gamma = self.gamma.values();
        for b in 0..batch_size {
            for c in 0..self.channels {
                let base = (b * self.channels + c) * self.spatial;
                let coeff = gamma[c] / (m * self.cached_std[c]);
                for s in 0..self.spatial {
                    let g = grad_output[base + s];
                    grad_input[base + s] =
                        coeff * (m * g - sum_g[c] - normalized[base + s] * sum_g_norm[c]);
                }
            }
        }
    }

    /// Plain gradient step on gamma and beta.
    pub fn update_parameters(&mut self, learning_rate: f32) {
        self.gamma.sgd_step(learning_rate);
        self.beta.sgd_step(learning_rate);
    }

    /// Per-example element count (input and output agree).
    pub fn len(&self) -> usize {
        self.channels * self.spatial
    }

    /// Whether the layer is compiled to a non-empty shape.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of normalized channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Scale parameter gamma (one per channel).
    pub fn gamma(&self) -> &Parameter {
        &self.gamma
    }

    /// Shift parameter beta (one per channel).
    pub fn beta(&self) -> &Parameter {
        &self.beta
    }

    pub fn gamma_mut(&mut self) -> &mut Parameter {
        &mut self.gamma
    }

    pub fn beta_mut(&mut self) -> &mut Parameter {
        &mut self.beta
    }

    /// Running mean per channel.
    pub fn running_mean(&self) -> &[f32] {
        &self.running_mean
    }

    /// Running variance per channel.
    pub fn running_var(&self) -> &[f32] {
        &self.running_var
    }

    pub fn set_running_stats(&mut self, mean: &[f32], var: &[f32]) {
        self.running_mean.copy_from_slice(mean);
        self.running_var.copy_from_slice(var);
    }

    /// Total number of trainable parameters (gamma + beta).
    pub fn parameter_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}
