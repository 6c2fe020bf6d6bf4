pub mod dataset;
pub mod error;
pub mod gradient;
pub mod initialization;
pub mod optimization;
pub mod weights;

pub use error::{MlErr, Result};
