// End-to-end model behavior: overfitting a tiny set, persistence
// round-trips, architecture validation on load, and the augmenter contract.

use grayscale_cnn::layers::{BatchNorm, Conv2D, Dense, Dropout, Flatten, MaxPool, Relu, Softmax};
use grayscale_cnn::optimizers::Adam;
use grayscale_cnn::shape::Shape;
use grayscale_cnn::utils::SimpleRng;
use grayscale_cnn::{Augmenter, EpochReport, Error, Model, NullReporter, Reporter, TrainOptions};

struct LossRecorder(Vec<f32>);

impl Reporter for LossRecorder {
    fn on_epoch(&mut self, report: &EpochReport) {
        self.0.push(report.train_loss);
    }
}

/// Three linearly separable classes on four features.
fn tiny_dataset() -> (Vec<f32>, Vec<u8>) {
    let mut inputs = Vec::new();
    let mut labels = Vec::new();
    for i in 0..12 {
        let class = i % 3;
        let mut row = [0.1f32; 4];
        row[class] = 1.0;
        inputs.extend_from_slice(&row);
        labels.push(class as u8);
    }
    (inputs, labels)
}

#[test]
fn test_training_loss_decreases_on_tiny_set() {
    let mut rng = SimpleRng::new(5);
    let mut model = Model::new(5);
    model.add(Dense::new(4, 3, Adam::default(), &mut rng));
    model.add(Softmax::new());
    model.compile(Shape::d1(4)).unwrap();

    let (inputs, labels) = tiny_dataset();
    let mut recorder = LossRecorder(Vec::new());
    let options = TrainOptions {
        epochs: 40,
        batch_size: 11,
        validation_size: 0.1,
        learning_rate: 1e-2,
        regularization: 0.0,
    };
    model.train(&inputs, &labels, &options, &mut recorder).unwrap();

    let losses = &recorder.0;
    assert_eq!(losses.len(), 40);
    // The model overfits the trivial set: the loss trends down and ends well
    // below where it started.
    for window in losses.windows(2) {
        assert!(window[1] <= window[0] + 1e-2, "loss jumped: {:?}", window);
    }
    assert!(
        losses[39] < losses[0] * 0.5,
        "loss did not improve: {} -> {}",
        losses[0],
        losses[39]
    );
}

#[test]
fn test_trained_model_classifies_training_distribution() {
    let mut rng = SimpleRng::new(6);
    let mut model = Model::new(6);
    model.add(Dense::new(4, 3, Adam::default(), &mut rng));
    model.add(Softmax::new());
    model.compile(Shape::d1(4)).unwrap();

    let (inputs, labels) = tiny_dataset();
    let options = TrainOptions {
        epochs: 60,
        batch_size: 11,
        validation_size: 0.1,
        learning_rate: 1e-2,
        regularization: 0.0,
    };
    model
        .train(&inputs, &labels, &options, &mut NullReporter)
        .unwrap();

    let accuracy = model.test(&inputs, &labels).unwrap();
    assert!(accuracy > 0.9, "accuracy {}", accuracy);
}

#[test]
fn test_non_finite_loss_aborts_training() {
    let mut rng = SimpleRng::new(15);
    let mut model = Model::new(15);
    model.add(Dense::new(4, 3, Adam::default(), &mut rng));
    model.add(Softmax::new());
    model.compile(Shape::d1(4)).unwrap();

    // NaN pixels poison the first forward pass; the run must abort with the
    // instability surfaced instead of updating parameters from a corrupted
    // gradient.
    let inputs = vec![f32::NAN; 4 * 20];
    let labels: Vec<u8> = (0..20).map(|i| (i % 3) as u8).collect();

    let result = model.train(&inputs, &labels, &TrainOptions::default(), &mut NullReporter);
    assert!(matches!(result, Err(Error::NonFinite { epoch: 1, .. })));
}

fn conv_model(seed: u64) -> Model {
    let mut rng = SimpleRng::new(seed);
    let mut model = Model::new(seed);
    model.add(Conv2D::new(1, 2, 3, 1, 1, Adam::default(), &mut rng));
    model.add(BatchNorm::new(1e-5, 0.9));
    model.add(Relu::new());
    model.add(MaxPool::new(2));
    model.add(Flatten::new());
    model.add(Dropout::new(0.8, &mut rng));
    model.add(Dense::new(2 * 4 * 4, 3, Adam::default(), &mut rng));
    model.add(Softmax::new());
    model
}

#[test]
fn test_save_load_round_trip_preserves_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut rng = SimpleRng::new(7);
    let mut inputs = vec![0.0f32; 20 * 64];
    for v in &mut inputs {
        *v = rng.gen_range_f32(-1.0, 1.0);
    }
    let labels: Vec<u8> = (0..20).map(|i| (i % 3) as u8).collect();

    let mut original = conv_model(7);
    original.compile(Shape::d3(1, 8, 8)).unwrap();
    // Train a little so parameters and running statistics move off their
    // initial values.
    let options = TrainOptions {
        epochs: 2,
        batch_size: 5,
        validation_size: 0.1,
        learning_rate: 1e-2,
        regularization: 1e-3,
    };
    original
        .train(&inputs, &labels, &options, &mut NullReporter)
        .unwrap();
    original.save(&path).unwrap();

    let sample = &inputs[..2 * 64];
    let expected = original.predict(sample).unwrap();

    // A fresh model with a different seed has different initial weights;
    // loading must restore exact values, so predictions match bit for bit.
    let mut restored = conv_model(99);
    restored.compile(Shape::d3(1, 8, 8)).unwrap();
    assert_ne!(restored.predict(sample).unwrap(), expected);

    restored.load(&path).unwrap();
    assert_eq!(restored.predict(sample).unwrap(), expected);
}

#[test]
fn test_load_rejects_architecture_mismatch_without_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut rng = SimpleRng::new(8);
    let mut saved = Model::new(8);
    saved.add(Dense::new(4, 3, Adam::default(), &mut rng));
    saved.add(Softmax::new());
    saved.compile(Shape::d1(4)).unwrap();
    saved.save(&path).unwrap();

    // Different output width: same layer-type sequence, wrong shapes.
    let mut other = Model::new(9);
    let mut rng = SimpleRng::new(9);
    other.add(Dense::new(4, 2, Adam::default(), &mut rng));
    other.add(Softmax::new());
    other.compile(Shape::d1(4)).unwrap();

    let before = other.predict(&[0.5, -0.5, 0.25, 0.0]).unwrap();
    assert!(matches!(
        other.load(&path),
        Err(Error::ArchitectureMismatch(_))
    ));
    // Nothing was written before the mismatch was detected.
    assert_eq!(other.predict(&[0.5, -0.5, 0.25, 0.0]).unwrap(), before);
}

#[test]
fn test_load_rejects_wrong_layer_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut rng = SimpleRng::new(10);
    let mut saved = Model::new(10);
    saved.add(Dense::new(4, 3, Adam::default(), &mut rng));
    saved.add(Softmax::new());
    saved.compile(Shape::d1(4)).unwrap();
    saved.save(&path).unwrap();

    let mut other = Model::new(11);
    let mut rng = SimpleRng::new(11);
    other.add(Dense::new(4, 3, Adam::default(), &mut rng));
    other.add(Relu::new());
    other.compile(Shape::d1(4)).unwrap();

    assert!(matches!(
        other.load(&path),
        Err(Error::ArchitectureMismatch(_))
    ));
}

#[test]
fn test_load_missing_file_is_io_error() {
    let mut rng = SimpleRng::new(12);
    let mut model = Model::new(12);
    model.add(Dense::new(4, 3, Adam::default(), &mut rng));
    model.add(Softmax::new());
    model.compile(Shape::d1(4)).unwrap();

    assert!(matches!(
        model.load("no/such/model.json"),
        Err(Error::Io(_))
    ));
}

/// Duplicates every example with small additive noise.
struct NoiseAugmenter {
    rng: SimpleRng,
}

impl Augmenter for NoiseAugmenter {
    fn fit_transform(
        &mut self,
        inputs: &[f32],
        labels: &[u8],
        features: usize,
        ratio: usize,
    ) -> (Vec<f32>, Vec<u8>) {
        let mut out_inputs = inputs.to_vec();
        let mut out_labels = labels.to_vec();
        for _ in 0..ratio {
            for (i, &label) in labels.iter().enumerate() {
                for f in 0..features {
                    out_inputs.push(inputs[i * features + f] + self.rng.gen_range_f32(-0.05, 0.05));
                }
                out_labels.push(label);
            }
        }
        (out_inputs, out_labels)
    }
}

#[test]
fn test_augmenter_contract() {
    let (inputs, labels) = tiny_dataset();
    let mut augmenter = NoiseAugmenter {
        rng: SimpleRng::new(13),
    };
    let (aug_inputs, aug_labels) = augmenter.fit_transform(&inputs, &labels, 4, 1);

    // Ratio 1 doubles the set; buffers stay parallel.
    assert_eq!(aug_labels.len(), 2 * labels.len());
    assert_eq!(aug_inputs.len(), aug_labels.len() * 4);

    // Every produced label is a class present in the original set.
    for &label in &aug_labels {
        assert!(labels.contains(&label));
    }

    // The augmented set is still trainable.
    let mut rng = SimpleRng::new(14);
    let mut model = Model::new(14);
    model.add(Dense::new(4, 3, Adam::default(), &mut rng));
    model.add(Softmax::new());
    model.compile(Shape::d1(4)).unwrap();
    let options = TrainOptions {
        epochs: 5,
        batch_size: 8,
        validation_size: 0.1,
        learning_rate: 1e-2,
        regularization: 0.0,
    };
    model
        .train(&aug_inputs, &aug_labels, &options, &mut NullReporter)
        .unwrap();
}
