//! Variable-length integer encoding (LEB128, as used by Protocol Buffers).
//!
//! Each byte carries 7 bits of the value and a continuation bit. Lengths on the wire are always
//! encoded as varints.

use crate::Error;
use bytes::{Buf, BufMut};

const DATA_BITS_PER_BYTE: u32 = 7;
const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// Maximum number of bytes a `u64` varint may occupy.
pub const MAX_U64_SIZE: usize = 10;

/// Encodes a `u64` as a varint.
pub fn write(value: u64, buf: &mut impl BufMut) {
    let mut value = value;
    while value >= CONTINUATION_BIT_MASK as u64 {
        buf.put_u8((value as u8 & DATA_BITS_MASK) | CONTINUATION_BIT_MASK);
        value >>= DATA_BITS_PER_BYTE;
    }
    buf.put_u8(value as u8);
}

/// Decodes a `u64` varint, rejecting overlong and overflowing encodings.
pub fn read(buf: &mut impl Buf) -> Result<u64, Error> {
    let mut result = 0u64;
    for index in 0..MAX_U64_SIZE {
        if !buf.has_remaining() {
            return Err(Error::EndOfBuffer);
        }
        let byte = buf.get_u8();
        let shift = index as u32 * DATA_BITS_PER_BYTE;

        // The tenth byte may only carry the single remaining bit
        if index == MAX_U64_SIZE - 1 && byte > 1 {
            return Err(Error::InvalidVarint);
        }
        result |= ((byte & DATA_BITS_MASK) as u64) << shift;
        if byte & CONTINUATION_BIT_MASK == 0 {
            // A trailing zero byte means the value was not minimally encoded
            if byte == 0 && index > 0 {
                return Err(Error::InvalidVarint);
            }
            return Ok(result);
        }
    }
    Err(Error::InvalidVarint)
}

/// Decodes a varint that must fit in a `usize` length.
pub fn read_len(buf: &mut impl Buf) -> Result<usize, Error> {
    let value = read(buf)?;
    usize::try_from(value).map_err(|_| Error::InvalidVarint)
}

/// Returns the number of bytes needed to encode `value`.
pub fn size(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(DATA_BITS_PER_BYTE as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_sizes() {
        for (value, expected) in [
            (0u64, 1usize),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (u64::MAX, 10),
        ] {
            let mut buf = BytesMut::new();
            write(value, &mut buf);
            assert_eq!(buf.len(), expected);
            assert_eq!(size(value), expected);
            assert_eq!(read(&mut buf.freeze()).unwrap(), value);
        }
    }

    #[test]
    fn test_overlong() {
        // 0 encoded in two bytes
        let mut buf = Bytes::from_static(&[0x80, 0x00]);
        assert_eq!(read(&mut buf), Err(Error::InvalidVarint));
    }

    #[test]
    fn test_overflow() {
        let mut buf =
            Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02]);
        assert_eq!(read(&mut buf), Err(Error::InvalidVarint));
    }

    #[test]
    fn test_truncated() {
        let mut buf = Bytes::from_static(&[0x80]);
        assert_eq!(read(&mut buf), Err(Error::EndOfBuffer));
    }
}
