use std::ops::Index;

use ndarray::Array1;
use rayon::prelude::*;

use super::{GradientContribution, contributions};
use crate::{
    MlErr, Result,
    dataset::{PartitionedDataStore, Sample},
    weights::WeightVector,
};

/// The sum of every gradient contribution of one iteration, one entry per weight index.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateGradient(Array1<f64>);

impl AggregateGradient {
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

    /// Adds a single contribution into its index.
    #[inline]
    pub fn absorb(&mut self, contribution: GradientContribution) {
        self.add(contribution.index, contribution.value);
    }

    /// Adds `value` into `index`, used for partial sums computed on other hosts.
    #[inline]
    pub fn add(&mut self, index: usize, value: f64) {
        self.0[index] += value;
    }

    /// Combines two partial reductions into one.
    pub fn merge(mut self, other: Self) -> Self {
        self.0 += &other.0;
        self
    }

    /// Iterates the `(index, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.0.iter().copied().enumerate()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }
}

impl Index<usize> for AggregateGradient {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// Sums the contributions of every sample of a single partition.
pub fn reduce_partition(samples: &[Sample], weights: &WeightVector) -> AggregateGradient {
    samples
        .iter()
        .flat_map(|sample| contributions(sample, weights))
        .fold(AggregateGradient::zeros(weights.len()), |mut acc, c| {
            acc.absorb(c);
            acc
        })
}

/// Reduces every partition of `store` in parallel and merges their partial sums.
///
/// # Arguments
/// * `store` - This host's samples.
/// * `weights` - The snapshot of the weights for the current iteration.
///
/// # Returns
/// The host's gradient with exactly one entry per weight, or a `SizeMismatch` error if
/// the store and the weights disagree on the dimensionality.
pub fn reduce_store(
    store: &PartitionedDataStore,
    weights: &WeightVector,
) -> Result<AggregateGradient> {
    if store.dimensions() != weights.len() {
        return Err(MlErr::SizeMismatch {
            a: "store",
            b: "weights",
            got: store.dimensions(),
            expected: weights.len(),
        });
    }

    let dimensions = weights.len();
    let aggregate = store
        .partitions()
        .par_iter()
        .map(|partition| reduce_partition(partition, weights))
        .reduce(|| AggregateGradient::zeros(dimensions), AggregateGradient::merge);

    Ok(aggregate)
}
