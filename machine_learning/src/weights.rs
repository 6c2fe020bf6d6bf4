use std::{num::NonZeroUsize, ops::Index};

use comms::WeightUpdate;
use ndarray::{Array1, ArrayView1};

use crate::{MlErr, Result};

/// This host's replica of the model's weights.
///
/// Only the host's own training loop mutates it, either by applying the gradient of
/// the indices it owns or by overwriting the rest with the owners' broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector(Array1<f64>);

impl WeightVector {
    pub fn new(weights: Vec<f64>) -> Self {
        Self(Array1::from_vec(weights))
    }

    pub fn zeros(dimensions: usize) -> Self {
        Self(Array1::zeros(dimensions))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// Applies a gradient descent step on a single index.
    ///
    /// # Returns
    /// The new value of the weight.
    pub(crate) fn step(&mut self, index: usize, grad: f64, learning_rate: f64) -> f64 {
        let weight = &mut self.0[index];
        *weight -= learning_rate * grad;
        *weight
    }

    /// Overwrites a single weight with a value computed elsewhere.
    ///
    /// # Arguments
    /// * `update` - The index and the new value.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the index is out of range.
    pub fn overwrite(&mut self, update: WeightUpdate) -> Result<()> {
        let len = self.len();
        let weight = self.0.get_mut(update.index).ok_or(MlErr::SizeMismatch {
            a: "update index",
            b: "weights",
            got: update.index,
            expected: len,
        })?;

        *weight = update.value;
        Ok(())
    }
}

impl Index<usize> for WeightVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// Decides which host reduces and updates each index of the weight vector.
///
/// Indices are dealt round robin, `owner(i) = i % hosts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    host_id: usize,
    hosts: NonZeroUsize,
}

impl Ownership {
    /// Creates a new `Ownership`.
    ///
    /// # Panics
    /// If `host_id` is not smaller than `hosts`.
    pub fn new(host_id: usize, hosts: NonZeroUsize) -> Self {
        assert!(host_id < hosts.get(), "host_id out of range");
        Self { host_id, hosts }
    }

    /// The ownership of a single host cluster, which owns every index.
    pub fn single() -> Self {
        Self::new(0, NonZeroUsize::MIN)
    }

    #[inline]
    pub fn host_id(&self) -> usize {
        self.host_id
    }

    #[inline]
    pub fn hosts(&self) -> usize {
        self.hosts.get()
    }

    #[inline]
    pub fn owner(&self, index: usize) -> usize {
        index % self.hosts.get()
    }

    #[inline]
    pub fn owns(&self, index: usize) -> bool {
        self.owner(index) == self.host_id
    }

    /// The indices this host owns in a vector of `dimensions` weights.
    pub fn owned(&self, dimensions: usize) -> impl Iterator<Item = usize> + use<> {
        (self.host_id..dimensions).step_by(self.hosts.get())
    }
}
