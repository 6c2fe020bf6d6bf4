use std::num::NonZeroUsize;

use log::{debug, info};

use super::{DataPointLoader, LineParser, Sample};
use crate::{MlErr, Result};

/// The in-memory, partitioned copy of this host's dataset.
///
/// It's filled once and then iterated on every training iteration, each partition
/// always yields its samples in the same order. Samples are dealt to the partitions
/// round robin in arrival order, so every partition gets a share even when the
/// host only holds a strided lane of the keys.
#[derive(Debug)]
pub struct PartitionedDataStore {
    dimensions: usize,
    partitions: Vec<Vec<Sample>>,
    next: usize,
}

impl PartitionedDataStore {
    /// Creates a new empty `PartitionedDataStore`.
    ///
    /// # Arguments
    /// * `partitions` - The amount of partitions to spread the samples over.
    /// * `dimensions` - The amount of features every sample must hold.
    ///
    /// # Returns
    /// A new `PartitionedDataStore` instance.
    pub fn new(partitions: NonZeroUsize, dimensions: usize) -> Self {
        Self {
            dimensions,
            partitions: vec![Vec::new(); partitions.get()],
            next: 0,
        }
    }

    /// Loads, parses and stores every record of `loader`.
    ///
    /// This is the single pass over the raw data of a run.
    ///
    /// # Arguments
    /// * `loader` - The source of raw records.
    /// * `parser` - The parser for each record.
    /// * `partitions` - The amount of partitions.
    ///
    /// # Returns
    /// The filled store, or the first io or parsing error found.
    pub fn build<L>(loader: &mut L, parser: &LineParser, partitions: NonZeroUsize) -> Result<Self>
    where
        L: DataPointLoader + ?Sized,
    {
        let mut store = Self::new(partitions, parser.dimensions());

        for record in loader.records() {
            let record = record?;
            let sample = parser.parse(record.key, &record.line)?;
            store.add(sample)?;
        }

        info!(
            samples = store.len(),
            partitions = partitions.get();
            "dataset stored"
        );

        for (i, partition) in store.partitions.iter().enumerate() {
            debug!(partition = i, samples = partition.len(); "partition filled");
        }

        Ok(store)
    }

    /// Adds `sample` to the next partition in turn.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the sample's dimensionality isn't the store's.
    pub fn add(&mut self, sample: Sample) -> Result<()> {
        if sample.dimensions() != self.dimensions {
            return Err(MlErr::SizeMismatch {
                a: "sample",
                b: "store",
                got: sample.dimensions(),
                expected: self.dimensions,
            });
        }

        let idx = self.next % self.partitions.len();
        self.partitions[idx].push(sample);
        self.next += 1;
        Ok(())
    }

    /// Returns the samples of the `idx`-th partition.
    ///
    /// # Panics
    /// If `idx` is out of range.
    pub fn partition(&self, idx: usize) -> &[Sample] {
        &self.partitions[idx]
    }

    pub fn partitions(&self) -> &[Vec<Sample>] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The total amount of samples across every partition.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }
}
