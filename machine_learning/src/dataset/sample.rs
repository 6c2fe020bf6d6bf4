use ndarray::{Array1, ArrayView1, s};

/// A single parsed record, `D` features followed by its label.
///
/// Samples are never mutated after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    key: u64,
    values: Array1<f64>,
}

impl Sample {
    /// Creates a new `Sample`.
    ///
    /// # Arguments
    /// * `key` - The record id this sample was parsed from.
    /// * `values` - The features followed by the label.
    ///
    /// # Panics
    /// If `values` is empty, there must be at least a label.
    pub fn new(key: u64, values: Array1<f64>) -> Self {
        assert!(!values.is_empty(), "a sample needs at least its label");
        Self { key, values }
    }

    #[inline]
    pub fn key(&self) -> u64 {
        self.key
    }

    /// The amount of features, without the label.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.values.len() - 1
    }

    #[inline]
    pub fn features(&self) -> ArrayView1<'_, f64> {
        self.values.slice(s![..-1])
    }

    #[inline]
    pub fn label(&self) -> f64 {
        self.values[self.dimensions()]
    }
}
