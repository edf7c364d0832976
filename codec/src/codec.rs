//! Core codec traits.

use crate::{Error, RangeCfg};
use bytes::{Buf, BufMut, BytesMut};

/// Trait for types that can be written (encoded) to a buffer.
pub trait Write {
    /// Encodes this value by writing to a buffer.
    ///
    /// Implementations should panic if the buffer doesn't have enough capacity.
    fn write(&self, buf: &mut impl BufMut);
}

/// Trait for types that know their exact encoded length.
pub trait EncodeSize {
    /// Returns the number of bytes [Write::write] will produce.
    fn encode_size(&self) -> usize;
}

/// Trait for types with a known, fixed encoded length.
pub trait FixedSize {
    /// The length of the encoded value.
    const SIZE: usize;
}

/// Trait for types that can be read (decoded) from a buffer.
///
/// `Cfg` bounds what a decoder is willing to allocate when reading untrusted input (for example,
/// the maximum length of a byte string). Use `()` for types that need no configuration.
pub trait Read: Sized {
    /// Configuration consulted while reading.
    type Cfg: Clone + Send + Sync + 'static;

    /// Reads a value from the buffer, consuming the necessary bytes.
    fn read_cfg(buf: &mut impl Buf, cfg: &Self::Cfg) -> Result<Self, Error>;
}

/// Trait for types that can be encoded into a fresh buffer.
pub trait Encode: Write + EncodeSize {
    /// Encodes a value to a [BytesMut].
    ///
    /// Panics if [Write::write] does not produce [EncodeSize::encode_size] bytes.
    fn encode(&self) -> BytesMut {
        let len = self.encode_size();
        let mut buffer = BytesMut::with_capacity(len);
        self.write(&mut buffer);
        assert_eq!(buffer.len(), len, "write() did not write expected bytes");
        buffer
    }
}

impl<T: Write + EncodeSize> Encode for T {}

/// Trait for types that can be decoded from a buffer that must be fully consumed.
pub trait Decode: Read {
    /// Decodes a value, failing if any bytes remain afterwards.
    fn decode_cfg(mut buf: impl Buf, cfg: &Self::Cfg) -> Result<Self, Error> {
        let result = Self::read_cfg(&mut buf, cfg)?;
        let remaining = buf.remaining();
        if remaining > 0 {
            return Err(Error::ExtraData(remaining));
        }
        Ok(result)
    }
}

impl<T: Read> Decode for T {}

/// Extension trait for reading types that require no configuration.
pub trait ReadExt: Read<Cfg = ()> {
    /// Reads a value using the default `()` config.
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        Self::read_cfg(buf, &())
    }
}

impl<T: Read<Cfg = ()>> ReadExt for T {}

/// Extension trait for decoding types that require no configuration.
pub trait DecodeExt: Decode<Cfg = ()> {
    /// Decodes a value using the default `()` config.
    fn decode(buf: impl Buf) -> Result<Self, Error> {
        Self::decode_cfg(buf, &())
    }
}

impl<T: Decode<Cfg = ()>> DecodeExt for T {}

/// Extension trait for reading length-bounded types.
pub trait ReadRangeExt: Read<Cfg = RangeCfg> {
    /// Reads a value whose length must fall within `range`.
    fn read_range(buf: &mut impl Buf, range: impl Into<RangeCfg>) -> Result<Self, Error> {
        Self::read_cfg(buf, &range.into())
    }
}

impl<T: Read<Cfg = RangeCfg>> ReadRangeExt for T {}

/// Ensures `buf` holds at least `len` more bytes.
#[inline]
pub fn at_least(buf: &impl Buf, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_insufficient_buffer() {
        let mut reader = Bytes::from_static(&[0x01, 0x02]);
        assert!(matches!(u32::read(&mut reader), Err(Error::EndOfBuffer)));
    }

    #[test]
    fn test_extra_data() {
        let encoded = Bytes::from_static(&[0x01, 0x02]);
        assert!(matches!(u8::decode(encoded), Err(Error::ExtraData(1))));
    }

    #[test]
    fn test_read_range() {
        let mut encoded = Bytes::from_static(&[3, 1, 2, 3]);
        assert!(matches!(
            Bytes::read_range(&mut encoded, ..3),
            Err(Error::InvalidLength(3))
        ));
    }
}
