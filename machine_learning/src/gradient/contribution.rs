use crate::{dataset::Sample, weights::WeightVector};

/// One term of the summed gradient, from one sample for one weight index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientContribution {
    pub index: usize,
    pub value: f64,
}

/// The scalar shared by every contribution of `sample`.
///
/// `(1 / (1 + exp(-y * (w . x))) - 1) * y`
pub fn factor(sample: &Sample, weights: &WeightVector) -> f64 {
    let y = sample.label();
    let dot = weights.view().dot(&sample.features());

    (1. / (1. + (-y * dot).exp()) - 1.) * y
}

/// Computes the gradient of the logistic log-loss of `sample` with respect to each weight.
///
/// # Arguments
/// * `sample` - The sample, must have as many features as there are weights.
/// * `weights` - The snapshot of the weights for the current iteration.
///
/// # Returns
/// An iterator with exactly one contribution per weight index, in order.
pub fn contributions<'a>(
    sample: &'a Sample,
    weights: &'a WeightVector,
) -> impl Iterator<Item = GradientContribution> + 'a {
    let factor = factor(sample, weights);

    sample
        .features()
        .into_iter()
        .enumerate()
        .map(move |(index, x)| GradientContribution {
            index,
            value: factor * x,
        })
}
