//! Shared utilities for the network engine.
//!
//! Currently this holds the deterministic random number generator used for
//! weight initialization, batch shuffling and dropout masks.

pub mod rng;

pub use rng::SimpleRng;
