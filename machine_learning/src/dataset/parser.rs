use ndarray::Array1;

use super::Sample;
use crate::{MlErr, Result};

/// Turns raw delimited lines into `Sample`s of a fixed dimensionality.
#[derive(Debug, Clone, Copy)]
pub struct LineParser {
    dimensions: usize,
    delimiter: char,
}

impl LineParser {
    /// Creates a new `LineParser`.
    ///
    /// # Arguments
    /// * `dimensions` - The amount of features `D`, every line must hold `D + 1` fields.
    /// * `delimiter` - The field separator.
    ///
    /// # Returns
    /// A new `LineParser` instance.
    pub fn new(dimensions: usize, delimiter: char) -> Self {
        Self {
            dimensions,
            delimiter,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Parses a single raw record.
    ///
    /// # Arguments
    /// * `key` - The record id, kept inside the sample.
    /// * `line` - The raw line, `D` features followed by the label.
    ///
    /// # Returns
    /// The parsed sample or `MlErr::MalformedRecord` if the line doesn't hold exactly
    /// `D + 1` floating point fields.
    pub fn parse(&self, key: u64, line: &str) -> Result<Sample> {
        let expected = self.dimensions + 1;
        let tokens: Vec<_> = line.split(self.delimiter).map(str::trim).collect();

        if tokens.len() != expected {
            return Err(MlErr::MalformedRecord {
                key,
                reason: format!("expected {expected} fields, got {}", tokens.len()),
            });
        }

        let values = tokens
            .into_iter()
            .enumerate()
            .map(|(i, token)| {
                token.parse::<f64>().map_err(|e| MlErr::MalformedRecord {
                    key,
                    reason: format!("field {i} ({token:?}) is not a number: {e}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Sample::new(key, Array1::from_vec(values)))
    }
}
