//! Leverage common functionality across arbiter crates.

use arbiter_codec::varint;

mod bounded;
pub use bounded::BoundedSet;
mod time;
pub use time::SystemTimeExt;

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Concatenate a namespace and a message, prepended by a varint encoding of the namespace length.
///
/// This produces a unique byte sequence (i.e. no collisions) for each `(namespace, msg)` pair.
pub fn union_unique(namespace: &[u8], msg: &[u8]) -> Vec<u8> {
    let len_prefix = varint::size(namespace.len() as u64);
    let mut result = Vec::with_capacity(len_prefix + namespace.len() + msg.len());
    varint::write(namespace.len() as u64, &mut result);
    result.extend_from_slice(namespace);
    result.extend_from_slice(msg);
    result
}
