//! Program hashes and redeem scripts.

use crate::Error;
use arbiter_codec::{Error as CodecError, EncodeSize, FixedSize, Read, ReadExt, Write};
use arbiter_cryptography::{ed25519::PublicKey, sha256};
use arbiter_utils::hex;
use bytes::{Buf, BufMut};
use std::fmt::{Debug, Display};

/// Maximum number of arbitrators a committee (and so a redeem script) may hold.
pub const MAX_ARBITRATORS: usize = 36;

/// Maximum encoded length of a [RedeemScript].
pub const MAX_SCRIPT_LEN: usize = 3 + MAX_ARBITRATORS * PublicKey::SIZE;

const PROGRAM_HASH_LENGTH: usize = 21;
const STANDARD_PREFIX: u8 = 0x21;

/// A 21-byte address: a version prefix followed by the truncated SHA-256 of a key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramHash([u8; PROGRAM_HASH_LENGTH]);

impl ProgramHash {
    /// The program hash of a single signer.
    pub fn from_key(key: &PublicKey) -> Self {
        let digest = sha256::hash(key.as_ref());
        let mut raw = [0u8; PROGRAM_HASH_LENGTH];
        raw[0] = STANDARD_PREFIX;
        raw[1..].copy_from_slice(&digest[..PROGRAM_HASH_LENGTH - 1]);
        Self(raw)
    }
}

impl From<[u8; PROGRAM_HASH_LENGTH]> for ProgramHash {
    fn from(raw: [u8; PROGRAM_HASH_LENGTH]) -> Self {
        Self(raw)
    }
}

impl AsRef<[u8]> for ProgramHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Write for ProgramHash {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for ProgramHash {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(<[u8; PROGRAM_HASH_LENGTH]>::read(buf)?))
    }
}

impl FixedSize for ProgramHash {
    const SIZE: usize = PROGRAM_HASH_LENGTH;
}

impl EncodeSize for ProgramHash {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl Debug for ProgramHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Display for ProgramHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// How the signatures required by a [RedeemScript] are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScriptKind {
    /// `threshold` independent ed25519 signatures, in signer order.
    Multisig = 0,
    /// One aggregated Schnorr signature from every signer.
    Schnorr = 1,
}

impl TryFrom<u8> for ScriptKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Multisig),
            1 => Ok(Self::Schnorr),
            other => Err(CodecError::InvalidEnum(other)),
        }
    }
}

/// An M-of-N signer set derived from the committee.
///
/// The key order defines signer indices for every proposal built on this script.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RedeemScript {
    kind: ScriptKind,
    threshold: u8,
    keys: Vec<PublicKey>,
}

impl RedeemScript {
    /// Create a script, validating its shape.
    pub fn new(kind: ScriptKind, threshold: usize, keys: Vec<PublicKey>) -> Result<Self, Error> {
        if keys.is_empty() || keys.len() > MAX_ARBITRATORS {
            return Err(Error::InvalidScript("signer count out of range"));
        }
        if threshold == 0 || threshold > keys.len() {
            return Err(Error::InvalidScript("threshold out of range"));
        }
        if kind == ScriptKind::Schnorr && threshold != keys.len() {
            return Err(Error::InvalidScript("schnorr scripts require every signer"));
        }
        let mut sorted = keys.clone();
        sorted.sort();
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(Error::InvalidScript("duplicate signer"));
        }
        Ok(Self {
            kind,
            threshold: threshold as u8,
            keys,
        })
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    /// Number of signatures required.
    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Signer index of `key`.
    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Signer index of the key hashing to `program_hash`.
    pub fn index_of_program_hash(&self, program_hash: &ProgramHash) -> Option<usize> {
        self.keys
            .iter()
            .position(|k| ProgramHash::from_key(k) == *program_hash)
    }
}

impl Write for RedeemScript {
    fn write(&self, buf: &mut impl BufMut) {
        (self.kind as u8).write(buf);
        self.threshold.write(buf);
        (self.keys.len() as u8).write(buf);
        for key in &self.keys {
            key.write(buf);
        }
    }
}

impl EncodeSize for RedeemScript {
    fn encode_size(&self) -> usize {
        3 + self.keys.len() * PublicKey::SIZE
    }
}

impl Read for RedeemScript {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let kind = ScriptKind::try_from(u8::read(buf)?)?;
        let threshold = u8::read(buf)? as usize;
        let n = u8::read(buf)? as usize;
        if n > MAX_ARBITRATORS {
            return Err(CodecError::InvalidLength(n));
        }
        let mut keys = Vec::with_capacity(n);
        for _ in 0..n {
            keys.push(PublicKey::read(buf)?);
        }
        Self::new(kind, threshold, keys).map_err(|err| match err {
            Error::InvalidScript(reason) => CodecError::Invalid("RedeemScript", reason),
            _ => CodecError::Invalid("RedeemScript", "invalid"),
        })
    }
}
