//! Serialize structured data.
//!
//! # Overview
//!
//! A binary serialization library for arbiter envelopes and wire messages, designed to:
//! - Serialize structured data into a canonical binary format (the bytes that get hashed and signed)
//! - Deserialize untrusted input, enforcing length bounds before allocating
//!
//! # Example
//!
//! ```
//! use arbiter_codec::{DecodeExt, Encode, EncodeSize, Error, Read, ReadExt, Write};
//! use bytes::{Buf, BufMut};
//!
//! #[derive(Debug, PartialEq)]
//! struct Outpoint {
//!     txid: [u8; 32],
//!     index: u16,
//! }
//!
//! impl Write for Outpoint {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.txid.write(buf);
//!         self.index.write(buf);
//!     }
//! }
//!
//! impl Read for Outpoint {
//!     type Cfg = ();
//!
//!     fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
//!         let txid = <[u8; 32]>::read(buf)?;
//!         let index = u16::read(buf)?;
//!         Ok(Self { txid, index })
//!     }
//! }
//!
//! impl EncodeSize for Outpoint {
//!     fn encode_size(&self) -> usize {
//!         self.txid.encode_size() + self.index.encode_size()
//!     }
//! }
//!
//! let outpoint = Outpoint { txid: [1; 32], index: 3 };
//! let decoded = Outpoint::decode(outpoint.encode()).unwrap();
//! assert_eq!(outpoint, decoded);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod types;
pub mod varint;

pub use codec::{
    Decode, DecodeExt, Encode, EncodeSize, FixedSize, Read, ReadExt, ReadRangeExt, Write,
};
pub use config::RangeCfg;
pub use error::Error;
