// mnist_cnn.rs
// Trains a small CNN classifier on MNIST stored as CSV (label, 784 pixels
// per row). Expected files:
//   ./data/mnist_train.csv
//   ./data/mnist_test.csv
//
// Output:
//   - per-epoch progress via the log facade (set RUST_LOG=info)
//   - prints test accuracy
//   - saves the trained parameters to ./model.json

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process;

use grayscale_cnn::layers::{BatchNorm, Conv2D, Dense, Flatten, MaxPool, Relu, Softmax};
use grayscale_cnn::optimizers::Adam;
use grayscale_cnn::utils::SimpleRng;
use grayscale_cnn::{Augmenter, LogReporter, Model, Shape, TrainOptions};

// MNIST constants (images are flat 28x28 in row-major order).
const IMG_H: usize = 28;
const IMG_W: usize = 28;
const NUM_INPUTS: usize = IMG_H * IMG_W; // 784

// Training hyperparameters.
const EPOCHS: usize = 30;
const BATCH_SIZE: usize = 15;
const VALIDATION_SIZE: f32 = 0.1;
const LEARNING_RATE: f32 = 1e-3;
const REGULARIZATION: f32 = 1e-3;
const AUGMENT_RATIO: usize = 1;

const SEED: u64 = 42;
const MODEL_PATH: &str = "model.json";

/// Read a CSV of `label, p0, p1, ..., p783` rows into flat buffers.
fn read_csv(path: &str) -> Result<(Vec<f32>, Vec<u8>), String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {}", path, e))?;
    let reader = BufReader::new(file);

    let mut inputs = Vec::new();
    let mut labels = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("read error in {}: {}", path, e))?;
        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split(',');
        let label: u8 = fields
            .next()
            .and_then(|f| f.trim().parse().ok())
            .ok_or_else(|| format!("{}:{}: bad label", path, line_no + 1))?;
        labels.push(label);

        let mut pixels = 0usize;
        for field in fields {
            let value: f32 = field
                .trim()
                .parse()
                .map_err(|e| format!("{}:{}: bad pixel: {}", path, line_no + 1, e))?;
            inputs.push(value);
            pixels += 1;
        }
        if pixels != NUM_INPUTS {
            return Err(format!(
                "{}:{}: expected {} pixels, got {}",
                path,
                line_no + 1,
                NUM_INPUTS,
                pixels
            ));
        }
    }

    Ok((inputs, labels))
}

/// Standardize in place: subtract the global mean, divide by the global
/// standard deviation (plus a small epsilon).
fn normalize(inputs: &mut [f32]) {
    let n = inputs.len() as f32;
    let mean: f32 = inputs.iter().sum::<f32>() / n;
    let var: f32 = inputs.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std = var.sqrt() + 1e-5;
    for v in inputs.iter_mut() {
        *v = (*v - mean) / std;
    }
}

/// Augments a digit set by shifting each image a few pixels horizontally and
/// vertically, padding with zeros. Labels are unchanged by a shift.
struct ShiftAugmenter {
    rng: SimpleRng,
    max_shift: isize,
}

impl ShiftAugmenter {
    fn new(seed: u64, max_shift: isize) -> Self {
        Self {
            rng: SimpleRng::new(seed),
            max_shift,
        }
    }

    fn shift(&self, image: &[f32], dy: isize, dx: isize, out: &mut [f32]) {
        for y in 0..IMG_H as isize {
            for x in 0..IMG_W as isize {
                let sy = y - dy;
                let sx = x - dx;
                let value = if sy >= 0 && sy < IMG_H as isize && sx >= 0 && sx < IMG_W as isize {
                    image[(sy * IMG_W as isize + sx) as usize]
                } else {
                    0.0
                };
                out[(y * IMG_W as isize + x) as usize] = value;
            }
        }
    }
}

impl Augmenter for ShiftAugmenter {
    fn fit_transform(
        &mut self,
        inputs: &[f32],
        labels: &[u8],
        features: usize,
        ratio: usize,
    ) -> (Vec<f32>, Vec<u8>) {
        let count = labels.len();
        let mut out_inputs = Vec::with_capacity(inputs.len() * (ratio + 1));
        let mut out_labels = Vec::with_capacity(count * (ratio + 1));

        out_inputs.extend_from_slice(inputs);
        out_labels.extend_from_slice(labels);

        let span = (2 * self.max_shift + 1) as usize;
        let mut shifted = vec![0.0f32; features];
        for _ in 0..ratio {
            for i in 0..count {
                let dy = self.rng.gen_usize(span) as isize - self.max_shift;
                let dx = self.rng.gen_usize(span) as isize - self.max_shift;
                self.shift(&inputs[i * features..(i + 1) * features], dy, dx, &mut shifted);
                out_inputs.extend_from_slice(&shifted);
                out_labels.push(labels[i]);
            }
        }

        (out_inputs, out_labels)
    }
}

/// Two conv/pool stages into a three-layer dense head, softmax output.
fn build_model(rng: &mut SimpleRng) -> Model {
    let mut model = Model::new(SEED);
    model.add(Conv2D::new(1, 3, 5, 2, 1, Adam::default(), rng));
    model.add(BatchNorm::new(1e-5, 0.9));
    model.add(Relu::new());
    model.add(MaxPool::new(2));

    model.add(Conv2D::new(3, 3, 3, 1, 1, Adam::default(), rng));
    model.add(BatchNorm::new(1e-5, 0.9));
    model.add(Relu::new());
    model.add(MaxPool::new(2));

    model.add(Flatten::new());

    model.add(Dense::new(147, 128, Adam::default(), rng));
    model.add(BatchNorm::new(1e-5, 0.9));
    model.add(Relu::new());

    model.add(Dense::new(128, 128, Adam::default(), rng));
    model.add(BatchNorm::new(1e-5, 0.9));
    model.add(Relu::new());

    model.add(Dense::new(128, 10, Adam::default(), rng));
    model.add(Softmax::new());
    model
}

fn run() -> Result<(), String> {
    log::info!("loading data...");
    let (mut train_inputs, mut train_labels) = read_csv("data/mnist_train.csv")?;
    let (mut test_inputs, test_labels) = read_csv("data/mnist_test.csv")?;

    let mut augmenter = ShiftAugmenter::new(SEED, 2);
    let (augmented_inputs, augmented_labels) =
        augmenter.fit_transform(&train_inputs, &train_labels, NUM_INPUTS, AUGMENT_RATIO);
    train_inputs = augmented_inputs;
    train_labels = augmented_labels;
    log::info!(
        "{} training examples after augmentation, {} test examples",
        train_labels.len(),
        test_labels.len()
    );

    normalize(&mut train_inputs);
    normalize(&mut test_inputs);

    log::info!("building model...");
    let mut rng = SimpleRng::new(SEED);
    let mut model = build_model(&mut rng);
    model
        .compile(Shape::d3(1, IMG_H, IMG_W))
        .map_err(|e| e.to_string())?;
    log::info!("{} trainable parameters", model.parameter_count());

    log::info!("training model...");
    let options = TrainOptions {
        epochs: EPOCHS,
        batch_size: BATCH_SIZE,
        validation_size: VALIDATION_SIZE,
        learning_rate: LEARNING_RATE,
        regularization: REGULARIZATION,
    };
    model
        .train(&train_inputs, &train_labels, &options, &mut LogReporter)
        .map_err(|e| e.to_string())?;
    log::info!(
        "training complete, best validation accuracy {:.2}%",
        model.best_accuracy() * 100.0
    );

    let test_acc = model
        .test(&test_inputs, &test_labels)
        .map_err(|e| e.to_string())?;
    println!("{}", test_acc);

    model.save(MODEL_PATH).map_err(|e| e.to_string())?;
    log::info!("model saved to {}", MODEL_PATH);
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(message) = run() {
        eprintln!("error: {}", message);
        process::exit(1);
    }
}
