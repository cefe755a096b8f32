//! Data augmentation seam.

/// Expands a training set with synthetic variants before training begins.
///
/// Implementations receive the flat sample buffer (one row of `features`
/// values per example) together with the labels, and return the augmented
/// buffers. The returned slices must stay parallel: `ratio` controls how many
/// synthetic examples are generated per original (implementations are free to
/// interpret it, but 1 conventionally doubles the set).
///
/// The engine itself never augments; callers pass an implementation to the
/// training entry point when they want one.
pub trait Augmenter {
    fn fit_transform(
        &mut self,
        inputs: &[f32],
        labels: &[u8],
        features: usize,
        ratio: usize,
    ) -> (Vec<f32>, Vec<u8>);
}
