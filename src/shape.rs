//! Shape metadata for inter-layer validation.
//!
//! Buffers in this crate are flat `f32` slices; a `Shape` records the logical
//! per-example dimensions (channels × height × width for spatial data, a
//! single feature count after flattening). Shapes are compared when the model
//! is compiled so that a mismatch between consecutive layers is a
//! construction-time error, never a silent runtime reshape.

use std::fmt;

/// Ordered per-example dimensions of a buffer (batch dimension excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// One-dimensional shape (a feature vector).
    pub fn d1(features: usize) -> Self {
        Shape(vec![features])
    }

    /// Three-dimensional shape (channels × height × width).
    pub fn d3(channels: usize, height: usize, width: usize) -> Self {
        Shape(vec![channels, height, width])
    }

    /// The raw dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements per example.
    ///
    /// # Examples
    ///
    /// ```
    /// use grayscale_cnn::shape::Shape;
    /// assert_eq!(Shape::d3(3, 7, 7).count(), 147);
    /// assert_eq!(Shape::d1(128).count(), 128);
    /// ```
    pub fn count(&self) -> usize {
        self.0.iter().product()
    }

    /// Interpret as (channels, height, width), if three-dimensional.
    pub fn as_d3(&self) -> Option<(usize, usize, usize)> {
        match self.0.as_slice() {
            [c, h, w] => Some((*c, *h, *w)),
            _ => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.0 {
            if !first {
                write!(f, "x")?;
            }
            write!(f, "{}", d)?;
            first = false;
        }
        Ok(())
    }
}
