mod gradient_descent;

pub use gradient_descent::{LEARNING_RATE, WeightUpdater};
