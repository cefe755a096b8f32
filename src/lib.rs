//! Hand-rolled convolutional network engine for fixed-size grayscale images.
//!
//! This library trains and evaluates a small convolutional classifier without
//! automatic differentiation or GPU support: every layer implements its own
//! forward and backward numeric rule over flat `f32` buffers.
//!
//! # Modules
//!
//! - `layers`: the closed set of layer variants (Conv2D, BatchNorm, ReLU,
//!   MaxPool, Flatten, Dense, Softmax, Dropout)
//! - `optimizers`: the Adam update rule and per-parameter optimizer state
//! - `model`: sequential model orchestration (train/evaluate/predict/persistence)
//! - `report`: per-epoch progress records and the reporter contract
//! - `augment`: the dataset-expansion contract honored by external augmenters
//! - `shape`: shape metadata used for construction-time validation
//! - `error`: the crate-wide error taxonomy
//! - `utils`: shared utilities (deterministic RNG)

pub mod augment;
pub mod error;
pub mod layers;
pub mod model;
pub mod optimizers;
pub mod report;
pub mod shape;
pub mod utils;

pub use augment::Augmenter;
pub use error::Error;
pub use layers::{Layer, Mode};
pub use model::{Model, TrainOptions};
pub use report::{EpochReport, LogReporter, NullReporter, Reporter};
pub use shape::Shape;
