//! Per-sample logistic loss gradients and their reduction.

mod aggregate;
mod contribution;

pub use aggregate::{AggregateGradient, reduce_partition, reduce_store};
pub use contribution::{GradientContribution, contributions, factor};
