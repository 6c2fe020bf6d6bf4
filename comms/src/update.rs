use std::io;

use crate::{Deserialize, Serialize};

type IndexType = u64;
type ValueType = f64;

const INDEX_SIZE: usize = size_of::<IndexType>();

/// Size in bytes of an encoded `WeightUpdate`.
pub const WEIGHT_UPDATE_SIZE: usize = INDEX_SIZE + size_of::<ValueType>();

/// A single `(index, value)` pair of the weight vector.
///
/// It's the only value that crosses a host boundary during training, both for partial
/// gradients routed to the owner of an index and for the owner's freshly updated weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightUpdate {
    pub index: usize,
    pub value: f64,
}

impl WeightUpdate {
    /// Creates a new `WeightUpdate`.
    ///
    /// # Arguments
    /// * `index` - The position inside the weight vector.
    /// * `value` - The value for that position.
    ///
    /// # Returns
    /// A new `WeightUpdate` instance.
    pub fn new(index: usize, value: f64) -> Self {
        Self { index, value }
    }

    /// Appends the big endian encoding of the index and the value into `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.index as IndexType).to_be_bytes());
        buf.extend_from_slice(&self.value.to_be_bytes());
    }

    /// Decodes a `WeightUpdate` from exactly `WEIGHT_UPDATE_SIZE` bytes.
    ///
    /// # Arguments
    /// * `buf` - The encoded pair.
    ///
    /// # Returns
    /// The decoded pair or an `InvalidData` error if `buf` has the wrong size or the
    /// index doesn't fit in this platform's `usize`.
    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        if buf.len() != WEIGHT_UPDATE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "a weight update takes {WEIGHT_UPDATE_SIZE} bytes, got {}",
                    buf.len()
                ),
            ));
        }

        let (index_buf, value_buf) = buf.split_at(INDEX_SIZE);

        // SAFETY: We checked the total length above, both halves have the expected size.
        let index = IndexType::from_be_bytes(index_buf.try_into().unwrap());
        let value = ValueType::from_be_bytes(value_buf.try_into().unwrap());

        let index = usize::try_from(index)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok(Self { index, value })
    }
}

impl<'a> Serialize<'a> for WeightUpdate {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        self.write_to(buf);
        None
    }
}

impl<'a> Deserialize<'a> for WeightUpdate {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        Self::read_from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_index_then_value_big_endian() {
        let update = WeightUpdate::new(3, -0.25);

        let mut buf = Vec::new();
        update.write_to(&mut buf);

        assert_eq!(buf.len(), WEIGHT_UPDATE_SIZE);
        assert_eq!(buf[..8], 3u64.to_be_bytes());
        assert_eq!(buf[8..], (-0.25f64).to_be_bytes());
        assert_eq!(WeightUpdate::read_from(&buf).unwrap(), update);
    }

    #[test]
    fn rejects_truncated_buffers() {
        let err = WeightUpdate::read_from(&[0; WEIGHT_UPDATE_SIZE - 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
