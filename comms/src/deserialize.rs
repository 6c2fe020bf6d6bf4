use std::io;

/// A type that can be read back from the application layer protocol.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
