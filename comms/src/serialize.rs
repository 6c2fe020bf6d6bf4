/// A type that can be written into the application layer protocol.
pub trait Serialize<'a> {
    /// Writes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer where the header and any owned bytes are written.
    ///
    /// # Returns
    /// An optional borrowed tail to send right after `buf` without copying it.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
