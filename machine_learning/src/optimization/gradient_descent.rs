use comms::WeightUpdate;

use crate::{
    MlErr, Result,
    gradient::AggregateGradient,
    weights::{Ownership, WeightVector},
};

/// The step size of every gradient descent update.
pub const LEARNING_RATE: f64 = 1.0;

/// Applies the gradient descent step to the indices this host owns.
#[derive(Debug, Clone, Copy)]
pub struct WeightUpdater {
    ownership: Ownership,
    learning_rate: f64,
}

impl WeightUpdater {
    /// Creates a new `WeightUpdater`.
    ///
    /// # Arguments
    /// * `ownership` - Which indices of the weights this host is responsible for.
    ///
    /// # Returns
    /// A new `WeightUpdater` instance.
    pub fn new(ownership: Ownership) -> Self {
        Self {
            ownership,
            learning_rate: LEARNING_RATE,
        }
    }

    /// Updates every owned weight with the cluster-wide gradient.
    ///
    /// The local weights are written before the updates are returned, so the caller
    /// only ever broadcasts values already applied on this host.
    ///
    /// # Arguments
    /// * `weights` - This host's replica of the weights.
    /// * `aggregate` - The reduced gradient, complete at least on the owned indices.
    ///
    /// # Returns
    /// The `(index, new value)` pairs of the owned weights, or a `SizeMismatch` error.
    pub fn apply(
        &self,
        weights: &mut WeightVector,
        aggregate: &AggregateGradient,
    ) -> Result<Vec<WeightUpdate>> {
        if aggregate.len() != weights.len() {
            return Err(MlErr::SizeMismatch {
                a: "gradient",
                b: "weights",
                got: aggregate.len(),
                expected: weights.len(),
            });
        }

        let lr = self.learning_rate;
        let updates = self
            .ownership
            .owned(weights.len())
            .map(|i| WeightUpdate::new(i, weights.step(i, aggregate[i], lr)))
            .collect();

        Ok(updates)
    }
}
