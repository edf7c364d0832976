//! Ed25519 keys and signatures (ZIP-215 verification via `ed25519-consensus`).
//!
//! Committee identities are ed25519 public keys. The same keys double as the members of the
//! Schnorr aggregation group in [crate::schnorr], so [PrivateKey] also exposes its expanded
//! secret scalar to that module.

use crate::{Error, Signer, Verifier};
use arbiter_codec::{Error as CodecError, EncodeSize, FixedSize, Read, ReadExt, Write};
use arbiter_utils::{hex, union_unique};
use bytes::{Buf, BufMut};
use curve25519_dalek::scalar::Scalar;
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use sha2::{Digest as _, Sha512};
use std::{
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    ops::Deref,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

const CURVE_NAME: &str = "ed25519";
const PRIVATE_KEY_LENGTH: usize = 32;
const PUBLIC_KEY_LENGTH: usize = 32;
const SIGNATURE_LENGTH: usize = 64;

/// Ed25519 Private Key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    raw: [u8; PRIVATE_KEY_LENGTH],
    #[zeroize(skip)]
    key: ed25519_consensus::SigningKey,
}

impl PrivateKey {
    /// Create a [PrivateKey] from a seed.
    ///
    /// # Warning
    ///
    /// This function is insecure and should only be used for examples and testing.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }

    /// Create a fresh [PrivateKey] using the supplied RNG.
    pub fn from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let key = ed25519_consensus::SigningKey::new(rng);
        Self::from(key)
    }

    /// Returns the expanded secret scalar (RFC 8032 §5.1.5) whose base-point multiple is the
    /// public key.
    pub(crate) fn scalar(&self) -> Scalar {
        let expanded = Sha512::digest(self.raw);
        let mut lower = [0u8; 32];
        lower.copy_from_slice(&expanded[..32]);
        lower[0] &= 248;
        lower[31] &= 127;
        lower[31] |= 64;
        let scalar = Scalar::from_bytes_mod_order(lower);
        lower.zeroize();
        scalar
    }
}

impl Signer for PrivateKey {
    type Signature = Signature;
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        PublicKey::from(self.key.verification_key())
    }

    fn sign(&self, namespace: &[u8], msg: &[u8]) -> Signature {
        let payload = union_unique(namespace, msg);
        Signature::from(self.key.sign(&payload))
    }
}

impl From<ed25519_consensus::SigningKey> for PrivateKey {
    fn from(key: ed25519_consensus::SigningKey) -> Self {
        let raw = key.to_bytes();
        Self { raw, key }
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; PRIVATE_KEY_LENGTH] = value
            .try_into()
            .map_err(|_| Error::InvalidPrivateKeyLength)?;
        Ok(Self::from(ed25519_consensus::SigningKey::from(raw)))
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PrivateKey {}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

impl Write for PrivateKey {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for PrivateKey {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; PRIVATE_KEY_LENGTH]>::read(buf)?;
        Ok(Self::from(ed25519_consensus::SigningKey::from(raw)))
    }
}

impl FixedSize for PrivateKey {
    const SIZE: usize = PRIVATE_KEY_LENGTH;
}

impl EncodeSize for PrivateKey {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// Ed25519 Public Key.
#[derive(Clone)]
pub struct PublicKey {
    raw: [u8; PUBLIC_KEY_LENGTH],
    key: ed25519_consensus::VerificationKey,
}

impl crate::PublicKey for PublicKey {}

impl Verifier for PublicKey {
    type Signature = Signature;

    fn verify(&self, namespace: &[u8], msg: &[u8], sig: &Signature) -> bool {
        let payload = union_unique(namespace, msg);
        self.verify_raw(&payload, sig)
    }
}

impl PublicKey {
    /// Verify a signature over `msg` as-is (no namespace).
    ///
    /// Used for signatures that are checked by the main chain, which has no notion of namespaces
    /// (for example, an aggregated Schnorr signature over a transaction digest).
    pub fn verify_raw(&self, msg: &[u8], sig: &Signature) -> bool {
        self.key.verify(&sig.signature, msg).is_ok()
    }
}

impl From<ed25519_consensus::VerificationKey> for PublicKey {
    fn from(key: ed25519_consensus::VerificationKey) -> Self {
        let raw = key.to_bytes();
        Self { raw, key }
    }
}

impl TryFrom<[u8; PUBLIC_KEY_LENGTH]> for PublicKey {
    type Error = Error;

    fn try_from(raw: [u8; PUBLIC_KEY_LENGTH]) -> Result<Self, Self::Error> {
        let key =
            ed25519_consensus::VerificationKey::try_from(raw).map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self { raw, key })
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; PUBLIC_KEY_LENGTH] =
            value.try_into().map_err(|_| Error::InvalidPublicKey)?;
        Self::try_from(raw)
    }
}

impl Write for PublicKey {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for PublicKey {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; PUBLIC_KEY_LENGTH]>::read(buf)?;
        Self::try_from(raw).map_err(|_| CodecError::Invalid(CURVE_NAME, "invalid public key"))
    }
}

impl FixedSize for PublicKey {
    const SIZE: usize = PUBLIC_KEY_LENGTH;
}

impl EncodeSize for PublicKey {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl Deref for PublicKey {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.raw
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

/// Ed25519 Signature.
#[derive(Clone)]
pub struct Signature {
    raw: [u8; SIGNATURE_LENGTH],
    signature: ed25519_consensus::Signature,
}

impl crate::Signature for Signature {}

impl From<ed25519_consensus::Signature> for Signature {
    fn from(signature: ed25519_consensus::Signature) -> Self {
        let raw = signature.to_bytes();
        Self { raw, signature }
    }
}

impl From<[u8; SIGNATURE_LENGTH]> for Signature {
    fn from(raw: [u8; SIGNATURE_LENGTH]) -> Self {
        let signature = ed25519_consensus::Signature::from(raw);
        Self { raw, signature }
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; SIGNATURE_LENGTH] = value
            .try_into()
            .map_err(|_| Error::InvalidSignatureLength)?;
        Ok(Self::from(raw))
    }
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for Signature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; SIGNATURE_LENGTH]>::read(buf)?;
        Ok(Self::from(raw))
    }
}

impl FixedSize for Signature {
    const SIZE: usize = SIGNATURE_LENGTH;
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl Deref for Signature {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.raw
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::edwards::EdwardsPoint;

    #[test]
    fn test_scalar_matches_public_key() {
        for seed in 0..4 {
            let private_key = PrivateKey::from_seed(seed);
            let point = EdwardsPoint::mul_base(&private_key.scalar());
            assert_eq!(
                point.compress().to_bytes().as_slice(),
                private_key.public_key().as_ref()
            );
        }
    }

    #[test]
    fn test_private_key_roundtrip() {
        let private_key = PrivateKey::from_seed(9);
        let restored = PrivateKey::try_from(private_key.raw.as_slice()).unwrap();
        assert_eq!(private_key, restored);
        assert!(PrivateKey::try_from(&[0u8; 31][..]).is_err());
    }

    #[test]
    fn test_verify_raw_ignores_namespace() {
        let private_key = PrivateKey::from_seed(1);
        let signature = private_key.sign(b"ns", b"msg");
        let public_key = private_key.public_key();
        assert!(!public_key.verify_raw(b"msg", &signature));
        assert!(public_key.verify_raw(&union_unique(b"ns", b"msg"), &signature));
    }
}
