//! Generate keys, sign arbitrary messages, deterministically verify signatures, and aggregate
//! Schnorr signatures across a committee.

use arbiter_codec::{EncodeSize, FixedSize, Read, Write};
use std::{
    fmt::{Debug, Display},
    hash::Hash,
};
use thiserror::Error;

pub mod ed25519;
pub mod schnorr;
pub mod sha256;
pub use sha256::{hash, Digest, Sha256};

/// Errors that can occur when working with keys, signatures or Schnorr sessions.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid private key length")]
    InvalidPrivateKeyLength,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature length")]
    InvalidSignatureLength,
    #[error("invalid commitment")]
    InvalidCommitment,
    #[error("invalid share")]
    InvalidShare,
    #[error("empty signing group")]
    EmptyGroup,
    #[error("duplicate key in signing group")]
    DuplicateKey,
    #[error("signer not in group")]
    UnknownSigner,
    #[error("expected {0} commitments, got {1}")]
    CommitmentCount(usize, usize),
    #[error("no nonce for session")]
    MissingNonce,
    #[error("own commitment does not match session nonce")]
    CommitmentMismatch,
}

/// Produces [Signature]s over messages that can be verified with a corresponding [PublicKey].
pub trait Signer: Send + Sync + Clone + 'static {
    /// The type of [Signature] produced by this [Signer].
    type Signature: Signature;

    /// The corresponding [PublicKey] type.
    type PublicKey: PublicKey<Signature = Self::Signature>;

    /// Returns the [PublicKey] corresponding to this [Signer].
    fn public_key(&self) -> Self::PublicKey;

    /// Sign a message with the given namespace.
    ///
    /// The namespace is prepended to the message (see [arbiter_utils::union_unique]) so that a
    /// signature produced for one purpose (for example, a proposal) cannot be replayed as another
    /// (for example, a feedback).
    fn sign(&self, namespace: &[u8], msg: &[u8]) -> Self::Signature;
}

/// Verifies [Signature]s over messages.
pub trait Verifier {
    /// The type of [Signature] that this verifier can verify.
    type Signature: Signature;

    /// Verify that a [Signature] is valid over a given message.
    ///
    /// The namespace must match the namespace provided during signing.
    fn verify(&self, namespace: &[u8], msg: &[u8], sig: &Self::Signature) -> bool;
}

/// A [PublicKey], able to verify [Signature]s.
pub trait PublicKey:
    Verifier
    + Clone
    + Debug
    + Display
    + Eq
    + Ord
    + Hash
    + Send
    + Sync
    + AsRef<[u8]>
    + Write
    + EncodeSize
    + FixedSize
    + Read<Cfg = ()>
    + 'static
{
}

/// A [Signature] over a message.
pub trait Signature:
    Clone
    + Debug
    + Eq
    + Send
    + Sync
    + AsRef<[u8]>
    + Write
    + EncodeSize
    + FixedSize
    + Read<Cfg = ()>
    + 'static
{
}
