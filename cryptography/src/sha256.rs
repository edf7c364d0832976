//! SHA-256 digests.
//!
//! Distributed items are identified by the SHA-256 digest of their unsigned body.

use arbiter_codec::{Error as CodecError, EncodeSize, FixedSize, Read, ReadExt, Write};
use arbiter_utils::hex;
use bytes::{Buf, BufMut};
use sha2::{Digest as _, Sha256 as ISha256};
use std::{
    fmt::{Debug, Display},
    ops::Deref,
};

const DIGEST_LENGTH: usize = 32;

/// Hash a single message with SHA-256.
pub fn hash(message: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hasher.finalize()
}

/// Incremental SHA-256 hasher.
#[derive(Clone, Debug, Default)]
pub struct Sha256 {
    hasher: ISha256,
}

impl Sha256 {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self {
            hasher: ISha256::new(),
        }
    }

    /// Append a message to the hasher.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Consume the hasher and return the digest.
    pub fn finalize(self) -> Digest {
        let finalized = self.hasher.finalize();
        let mut array = [0u8; DIGEST_LENGTH];
        array.copy_from_slice(&finalized);
        Digest(array)
    }
}

/// Digest of a SHA-256 hashing operation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Digest(pub [u8; DIGEST_LENGTH]);

impl Write for Digest {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Digest {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let array = <[u8; DIGEST_LENGTH]>::read(buf)?;
        Ok(Self(array))
    }
}

impl FixedSize for Digest {
    const SIZE: usize = DIGEST_LENGTH;
}

impl EncodeSize for Digest {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(value: [u8; DIGEST_LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Digest {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_codec::{DecodeExt, Encode};
    use arbiter_utils::hex;

    const HELLO_DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256() {
        let digest = hash(b"hello world");
        assert_eq!(hex(&digest), HELLO_DIGEST);

        let mut hasher = Sha256::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), digest);
    }

    #[test]
    fn test_codec() {
        let digest = hash(b"hello world");
        let encoded = digest.encode();
        assert_eq!(encoded.len(), DIGEST_LENGTH);
        assert_eq!(Digest::decode(encoded).unwrap(), digest);
    }
}
