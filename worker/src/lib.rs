pub mod broadcast;
pub mod config;
pub mod controller;
pub mod error;
pub mod mesh;
pub mod reduce;

#[cfg(test)]
mod test;

pub use broadcast::{WeightBroadcaster, WeightReceiver};
pub use config::JobConfig;
pub use controller::{IterationController, Reporter, Stage};
pub use error::{Result, TrainErr};
pub use mesh::Mesh;
pub use reduce::PartialExchange;
