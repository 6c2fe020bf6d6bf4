mod constant;
mod error;
mod param_gen;
mod random;

use rand::{SeedableRng, rngs::StdRng};

pub use constant::ConstParamGen;
pub use error::{RandErr, Result};
pub use param_gen::ParamGen;
pub use random::RandParamGen;

use crate::weights::WeightVector;

/// The seed of the initial weights when none is configured.
pub const DEFAULT_SEED: u64 = 42;

/// Drains `param_gen` into a new weight vector.
pub fn weights_from<P: ParamGen>(mut param_gen: P) -> WeightVector {
    let mut weights = Vec::new();

    while let Some(sample) = param_gen.sample(usize::MAX) {
        weights.extend(sample);
    }

    WeightVector::new(weights)
}

/// Draws `dimensions` initial weights uniformly from `[-1, 1)`.
///
/// Every host seeded with the same value starts from the exact same weights.
pub fn seeded_uniform(seed: u64, dimensions: usize) -> Result<WeightVector> {
    let rng = StdRng::seed_from_u64(seed);
    let param_gen = RandParamGen::uniform(rng, dimensions, -1., 1.)?;
    Ok(weights_from(param_gen))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_weights() {
        let a = seeded_uniform(DEFAULT_SEED, 8).unwrap();
        let b = seeded_uniform(DEFAULT_SEED, 8).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.view().iter().all(|w| (-1.0..1.0).contains(w)));
    }

    #[test]
    fn different_seeds_differ() {
        let a = seeded_uniform(1, 8).unwrap();
        let b = seeded_uniform(2, 8).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn constant_weights() {
        let weights = weights_from(ConstParamGen::new(0., 4));
        assert_eq!(weights.to_vec(), [0.; 4]);
    }
}
