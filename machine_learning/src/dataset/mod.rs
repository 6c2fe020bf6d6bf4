mod loader;
mod parser;
mod sample;
mod store;

pub use loader::{DataPointLoader, FileLoader, MemoryLoader, Record, Stride};
pub use parser::LineParser;
pub use sample::Sample;
pub use store::PartitionedDataStore;
