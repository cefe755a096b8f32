//! Model orchestration: layer sequencing, training loop, evaluation and
//! persistence.
//!
//! A [`Model`] owns an ordered sequence of layers. Construction is
//! append-only via [`Model::add`]; once [`Model::compile`] has validated the
//! shape chain and bound optimizer state, the sequence is fixed and the model
//! can train, predict, and persist itself.
//!
//! The training loop is single-threaded and synchronous: one batch runs
//! Forward → Loss → Backward → Update to completion before the next begins.
//! Progress is surfaced through an injected [`Reporter`], one record per
//! epoch; the engine never logs on its own.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::layers::{softmax, Layer, Mode};
use crate::report::{EpochReport, Reporter};
use crate::shape::Shape;
use crate::utils::SimpleRng;

/// Hyperparameters accepted by [`Model::train`].
///
/// Validated at the start of every training run: epochs and batch size must
/// be positive, the validation fraction must lie in (0, 1) and select at
/// least one example from the provided dataset, the learning rate must be
/// positive and the regularization strength non-negative.
#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    /// Number of full passes over the training subset.
    pub epochs: usize,
    /// Examples per gradient update.
    pub batch_size: usize,
    /// Fraction of the provided data held out for per-epoch validation.
    pub validation_size: f32,
    /// Adam learning rate.
    pub learning_rate: f32,
    /// L2 regularization strength applied through the optimizer.
    pub regularization: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 30,
            batch_size: 15,
            validation_size: 0.1,
            learning_rate: 1e-3,
            regularization: 1e-3,
        }
    }
}

/// Per-layer slice of the persisted model document.
///
/// The tag mirrors [`Layer::kind`]. Parameterless layers persist only their
/// tag so the layer-type sequence can be validated on load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "layer_type")]
enum LayerRecord {
    #[serde(rename = "conv2d")]
    Conv2D { kernels: Vec<f32>, biases: Vec<f32> },
    #[serde(rename = "batchnorm")]
    BatchNorm {
        gamma: Vec<f32>,
        beta: Vec<f32>,
        running_mean: Vec<f32>,
        running_var: Vec<f32>,
    },
    #[serde(rename = "dense")]
    Dense { weights: Vec<f32>, biases: Vec<f32> },
    #[serde(rename = "relu")]
    Relu,
    #[serde(rename = "maxpool")]
    MaxPool,
    #[serde(rename = "flatten")]
    Flatten,
    #[serde(rename = "softmax")]
    Softmax,
    #[serde(rename = "dropout")]
    Dropout,
}

/// Top-level persisted model document.
#[derive(Debug, Serialize, Deserialize)]
struct ModelDocument {
    layers: Vec<LayerRecord>,
}

/// An ordered sequence of layers plus the orchestration to train and run
/// them.
///
/// # Example
///
/// ```
/// use grayscale_cnn::layers::{Dense, Softmax};
/// use grayscale_cnn::optimizers::Adam;
/// use grayscale_cnn::shape::Shape;
/// use grayscale_cnn::utils::SimpleRng;
/// use grayscale_cnn::Model;
///
/// let mut rng = SimpleRng::new(42);
/// let mut model = Model::new(42);
/// model.add(Dense::new(4, 3, Adam::default(), &mut rng));
/// model.add(Softmax::new());
/// model.compile(Shape::d1(4)).unwrap();
/// ```
pub struct Model {
    layers: Vec<Layer>,
    rng: SimpleRng,
    input_shape: Option<Shape>,
    compiled: bool,

    // Training-run state, reset at the start of every train call.
    accuracy_history: Vec<f32>,
    best_accuracy: f32,
}

impl Model {
    /// Create an empty model. The seed drives the validation split and the
    /// per-epoch shuffle, making training runs reproducible.
    pub fn new(seed: u64) -> Self {
        Self {
            layers: Vec::new(),
            rng: SimpleRng::new(seed),
            input_shape: None,
            compiled: false,
            accuracy_history: Vec::new(),
            best_accuracy: 0.0,
        }
    }

    /// Append a layer. Insertion order is forward-pass order.
    pub fn add(&mut self, layer: impl Into<Layer>) -> &mut Self {
        self.layers.push(layer.into());
        self.compiled = false;
        self
    }

    /// Validate the shape chain end to end and bind optimizer state.
    ///
    /// Each layer's declared input is checked against the previous layer's
    /// output; the first mismatch is reported with the offending layer's
    /// position. Must be called once after construction, before training or
    /// prediction.
    pub fn compile(&mut self, input_shape: Shape) -> Result<(), Error> {
        if self.layers.is_empty() {
            return Err(Error::Config("model has no layers".into()));
        }

        let mut shape = input_shape.clone();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            shape = layer.compile(&shape).map_err(|err| match err {
                // Layers do not know their own position; fill it in here.
                Error::ShapeMismatch {
                    kind,
                    expected,
                    found,
                    ..
                } => Error::ShapeMismatch {
                    index,
                    kind,
                    expected,
                    found,
                },
                other => other,
            })?;
        }

        self.input_shape = Some(input_shape);
        self.compiled = true;
        self.accuracy_history.clear();
        self.best_accuracy = 0.0;
        Ok(())
    }

    /// Train on `inputs` (one row of `features` values per example, matching
    /// the compiled input shape) against integer class labels.
    ///
    /// A validation subset is split off first with indices fixed for the
    /// whole run; each epoch shuffles the remaining training subset, runs
    /// Forward → Loss → Backward → Update per batch, then measures validation
    /// accuracy in inference mode and reports it. A non-finite loss aborts
    /// the run with [`Error::NonFinite`] instead of corrupting parameters.
    pub fn train(
        &mut self,
        inputs: &[f32],
        labels: &[u8],
        options: &TrainOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<(), Error> {
        let features = self.check_ready(inputs, labels)?;
        self.check_options(options)?;

        let total = labels.len();
        let val_count = (total as f32 * options.validation_size) as usize;
        if val_count == 0 {
            return Err(Error::Data(format!(
                "validation fraction {} selects no examples out of {}",
                options.validation_size, total
            )));
        }
        let train_count = total - val_count;
        if train_count == 0 {
            return Err(Error::Data(
                "no training examples left after validation split".into(),
            ));
        }
        if options.batch_size > train_count {
            return Err(Error::Data(format!(
                "batch size {} exceeds training subset size {}",
                options.batch_size, train_count
            )));
        }

        // One seeded shuffle fixes the validation indices for the run.
        let mut indices: Vec<usize> = (0..total).collect();
        self.rng.shuffle_usize(&mut indices);
        let (val_indices, train_indices) = indices.split_at(val_count);
        let val_indices = val_indices.to_vec();
        let mut train_indices = train_indices.to_vec();

        let classes = self.output_len();
        self.accuracy_history.clear();
        self.best_accuracy = 0.0;

        let mut batch_input = vec![0.0f32; options.batch_size * features];
        let mut batch_labels = vec![0u8; options.batch_size];

        for epoch in 1..=options.epochs {
            self.rng.shuffle_usize(&mut train_indices);

            let mut epoch_loss = 0.0f32;
            let mut batches = 0usize;

            for (batch, chunk) in train_indices.chunks(options.batch_size).enumerate() {
                let size = chunk.len();
                for (row, &idx) in chunk.iter().enumerate() {
                    batch_input[row * features..(row + 1) * features]
                        .copy_from_slice(&inputs[idx * features..(idx + 1) * features]);
                    batch_labels[row] = labels[idx];
                }

                let probs =
                    self.run_forward(&batch_input[..size * features], size, Mode::Train);
                let loss = softmax::cross_entropy(&probs, &batch_labels[..size], classes);
                if !loss.is_finite() {
                    return Err(Error::NonFinite { epoch, batch });
                }
                epoch_loss += loss;
                batches += 1;

                // Fused softmax + cross-entropy gradient, with the 1/batch
                // scale applied once here and nowhere else.
                let scale = 1.0 / size as f32;
                let mut delta = probs;
                for d in &mut delta {
                    *d *= scale;
                }
                for (row, &label) in batch_labels[..size].iter().enumerate() {
                    delta[row * classes + label as usize] -= scale;
                }

                self.run_backward(&delta, size);
                for layer in &mut self.layers {
                    layer.update_parameters(options.learning_rate, options.regularization);
                }
            }

            let val_acc = self.validation_accuracy(
                inputs,
                labels,
                &val_indices,
                features,
                classes,
                options.batch_size,
            );
            self.accuracy_history.push(val_acc);
            if val_acc > self.best_accuracy {
                self.best_accuracy = val_acc;
            }

            reporter.on_epoch(&EpochReport {
                epoch,
                train_loss: epoch_loss / batches as f32,
                val_acc,
                best_acc: self.best_accuracy,
            });
        }

        Ok(())
    }

    /// Run a forward pass in inference mode and return the raw output
    /// probabilities, `output_len` values per example.
    pub fn predict(&mut self, inputs: &[f32]) -> Result<Vec<f32>, Error> {
        if !self.compiled {
            return Err(Error::Config("model is not compiled".into()));
        }
        let features = self.input_len();
        if inputs.is_empty() || inputs.len() % features != 0 {
            return Err(Error::Data(format!(
                "input length {} is not a multiple of {} features",
                inputs.len(),
                features
            )));
        }
        let count = inputs.len() / features;
        Ok(self.run_forward(inputs, count, Mode::Infer))
    }

    /// Accuracy of predicted distributions against integer labels: the
    /// fraction of rows whose arg-max class equals the label. No side
    /// effects.
    pub fn evaluate(&self, probabilities: &[f32], labels: &[u8]) -> f32 {
        if labels.is_empty() {
            return 0.0;
        }
        let classes = probabilities.len() / labels.len();
        correct_count(probabilities, labels, classes) as f32 / labels.len() as f32
    }

    /// Predict then evaluate: inference-mode accuracy on a labeled set.
    pub fn test(&mut self, inputs: &[f32], labels: &[u8]) -> Result<f32, Error> {
        self.check_ready(inputs, labels)?;
        let probabilities = self.predict(inputs)?;
        Ok(self.evaluate(&probabilities, labels))
    }

    /// Persist every layer's parameters as a JSON document.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let records: Vec<LayerRecord> = self.layers.iter().map(layer_record).collect();
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), &ModelDocument { layers: records })?;
        Ok(())
    }

    /// Restore parameters from a document written by [`Model::save`].
    ///
    /// The document's layer-type sequence and every parameter shape are
    /// validated against the live architecture before anything is written:
    /// on error, no parameter is mutated.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        if !self.compiled {
            return Err(Error::Config("model is not compiled".into()));
        }

        let file = File::open(path)?;
        let document: ModelDocument = serde_json::from_reader(BufReader::new(file))?;

        if document.layers.len() != self.layers.len() {
            return Err(Error::ArchitectureMismatch(format!(
                "document has {} layers, model has {}",
                document.layers.len(),
                self.layers.len()
            )));
        }
        for (index, (layer, record)) in
            self.layers.iter().zip(&document.layers).enumerate()
        {
            check_record(layer, record, index)?;
        }

        // Everything validated; now mutate.
        for (layer, record) in self.layers.iter_mut().zip(document.layers) {
            apply_record(layer, record);
        }
        Ok(())
    }

    /// Per-epoch validation accuracies from the latest training run.
    pub fn accuracy_history(&self) -> &[f32] {
        &self.accuracy_history
    }

    /// Best validation accuracy from the latest training run.
    pub fn best_accuracy(&self) -> f32 {
        self.best_accuracy
    }

    /// The compiled input shape, if any.
    pub fn input_shape(&self) -> Option<&Shape> {
        self.input_shape.as_ref()
    }

    /// Total number of trainable scalar parameters across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }

    /// The layer sequence, in forward-pass order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn input_len(&self) -> usize {
        match &self.input_shape {
            Some(shape) => shape.count(),
            None => 0,
        }
    }

    fn output_len(&self) -> usize {
        match self.layers.last() {
            Some(layer) => layer.output_len(),
            None => 0,
        }
    }

    /// Common dataset checks shared by `train` and `test`. Returns the
    /// per-example feature count.
    fn check_ready(&self, inputs: &[f32], labels: &[u8]) -> Result<usize, Error> {
        if !self.compiled {
            return Err(Error::Config("model is not compiled".into()));
        }
        let features = self.input_len();
        if labels.is_empty() {
            return Err(Error::Data("dataset is empty".into()));
        }
        if inputs.len() != labels.len() * features {
            return Err(Error::Data(format!(
                "expected {} examples of {} features, got {} values",
                labels.len(),
                features,
                inputs.len()
            )));
        }
        let classes = self.output_len();
        if let Some(&label) = labels.iter().find(|&&l| l as usize >= classes) {
            return Err(Error::Data(format!(
                "label {} out of range for {} classes",
                label, classes
            )));
        }
        Ok(features)
    }

    fn check_options(&self, options: &TrainOptions) -> Result<(), Error> {
        if options.epochs == 0 {
            return Err(Error::Config("epochs must be positive".into()));
        }
        if options.batch_size == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }
        if !(options.validation_size > 0.0 && options.validation_size < 1.0) {
            return Err(Error::Config(
                "validation size must be in range (0.0, 1.0)".into(),
            ));
        }
        if !(options.learning_rate > 0.0) {
            return Err(Error::Config("learning rate must be positive".into()));
        }
        if !(options.regularization >= 0.0) {
            return Err(Error::Config(
                "regularization must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Sequential forward pass over all layers.
    fn run_forward(&mut self, input: &[f32], batch_size: usize, mode: Mode) -> Vec<f32> {
        let mut current = input.to_vec();
        for layer in &mut self.layers {
            let mut next = vec![0.0f32; batch_size * layer.output_len()];
            layer.forward(&current, &mut next, batch_size, mode);
            current = next;
        }
        current
    }

    /// Reverse-order backward pass, starting from the loss gradient.
    fn run_backward(&mut self, delta: &[f32], batch_size: usize) {
        let mut current = delta.to_vec();
        for layer in self.layers.iter_mut().rev() {
            let mut next = vec![0.0f32; batch_size * layer.input_len()];
            layer.backward(&current, &mut next, batch_size);
            current = next;
        }
    }

    /// Inference-mode accuracy over the validation indices, processed in
    /// batch-sized chunks to bound memory.
    fn validation_accuracy(
        &mut self,
        inputs: &[f32],
        labels: &[u8],
        val_indices: &[usize],
        features: usize,
        classes: usize,
        batch_size: usize,
    ) -> f32 {
        let mut buffer = vec![0.0f32; batch_size * features];
        let mut chunk_labels = vec![0u8; batch_size];
        let mut correct = 0usize;

        for chunk in val_indices.chunks(batch_size) {
            let size = chunk.len();
            for (row, &idx) in chunk.iter().enumerate() {
                buffer[row * features..(row + 1) * features]
                    .copy_from_slice(&inputs[idx * features..(idx + 1) * features]);
                chunk_labels[row] = labels[idx];
            }
            let probs = self.run_forward(&buffer[..size * features], size, Mode::Infer);
            correct += correct_count(&probs, &chunk_labels[..size], classes);
        }

        correct as f32 / val_indices.len() as f32
    }
}

/// Count rows whose arg-max class equals the label.
fn correct_count(probabilities: &[f32], labels: &[u8], classes: usize) -> usize {
    let mut correct = 0usize;
    for (row, &label) in labels.iter().enumerate() {
        let base = row * classes;
        let mut best = 0usize;
        for c in 1..classes {
            if probabilities[base + c] > probabilities[base + best] {
                best = c;
            }
        }
        if best == label as usize {
            correct += 1;
        }
    }
    correct
}

fn layer_record(layer: &Layer) -> LayerRecord {
    match layer {
        Layer::Conv2D(l) => LayerRecord::Conv2D {
            kernels: l.kernels().values().to_vec(),
            biases: l.biases().values().to_vec(),
        },
        Layer::BatchNorm(l) => LayerRecord::BatchNorm {
            gamma: l.gamma().values().to_vec(),
            beta: l.beta().values().to_vec(),
            running_mean: l.running_mean().to_vec(),
            running_var: l.running_var().to_vec(),
        },
        Layer::Dense(l) => LayerRecord::Dense {
            weights: l.weights().values().to_vec(),
            biases: l.biases().values().to_vec(),
        },
        Layer::Relu(_) => LayerRecord::Relu,
        Layer::MaxPool(_) => LayerRecord::MaxPool,
        Layer::Flatten(_) => LayerRecord::Flatten,
        Layer::Softmax(_) => LayerRecord::Softmax,
        Layer::Dropout(_) => LayerRecord::Dropout,
    }
}

/// Validate one record against its live layer without mutating anything.
fn check_record(layer: &Layer, record: &LayerRecord, index: usize) -> Result<(), Error> {
    let mismatch = |detail: String| {
        Err(Error::ArchitectureMismatch(format!(
            "layer {}: {}",
            index, detail
        )))
    };

    match (layer, record) {
        (Layer::Conv2D(l), LayerRecord::Conv2D { kernels, biases }) => {
            if kernels.len() != l.kernels().len() || biases.len() != l.biases().len() {
                return mismatch(format!(
                    "conv2d expects {} kernel and {} bias values, document has {} and {}",
                    l.kernels().len(),
                    l.biases().len(),
                    kernels.len(),
                    biases.len()
                ));
            }
        }
        (
            Layer::BatchNorm(l),
            LayerRecord::BatchNorm {
                gamma,
                beta,
                running_mean,
                running_var,
            },
        ) => {
            let channels = l.channels();
            if gamma.len() != channels
                || beta.len() != channels
                || running_mean.len() != channels
                || running_var.len() != channels
            {
                return mismatch(format!(
                    "batchnorm expects {} channels, document has {}/{}/{}/{}",
                    channels,
                    gamma.len(),
                    beta.len(),
                    running_mean.len(),
                    running_var.len()
                ));
            }
        }
        (Layer::Dense(l), LayerRecord::Dense { weights, biases }) => {
            if weights.len() != l.weights().len() || biases.len() != l.biases().len() {
                return mismatch(format!(
                    "dense expects {} weight and {} bias values, document has {} and {}",
                    l.weights().len(),
                    l.biases().len(),
                    weights.len(),
                    biases.len()
                ));
            }
        }
        (Layer::Relu(_), LayerRecord::Relu)
        | (Layer::MaxPool(_), LayerRecord::MaxPool)
        | (Layer::Flatten(_), LayerRecord::Flatten)
        | (Layer::Softmax(_), LayerRecord::Softmax)
        | (Layer::Dropout(_), LayerRecord::Dropout) => {}
        _ => {
            return mismatch(format!(
                "document layer type does not match live layer {}",
                layer.kind()
            ));
        }
    }
    Ok(())
}

/// Write a pre-validated record into its layer.
fn apply_record(layer: &mut Layer, record: LayerRecord) {
    match (layer, record) {
        (Layer::Conv2D(l), LayerRecord::Conv2D { kernels, biases }) => {
            l.kernels_mut().set_values(&kernels);
            l.biases_mut().set_values(&biases);
        }
        (
            Layer::BatchNorm(l),
            LayerRecord::BatchNorm {
                gamma,
                beta,
                running_mean,
                running_var,
            },
        ) => {
            l.gamma_mut().set_values(&gamma);
            l.beta_mut().set_values(&beta);
            l.set_running_stats(&running_mean, &running_var);
        }
        (Layer::Dense(l), LayerRecord::Dense { weights, biases }) => {
            l.weights_mut().set_values(&weights);
            l.biases_mut().set_values(&biases);
        }
        _ => {}
    }
}
