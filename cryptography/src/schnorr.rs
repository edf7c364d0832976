//! Two-round aggregate Schnorr signatures over edwards25519.
//!
//! Every member of a signing group holds an ed25519 key. The group's aggregate key is
//! `X = Σ a_i·X_i` where each coefficient `a_i` binds the member's key to the full key list
//! (preventing rogue-key attacks). A signature over some message is produced in two rounds:
//!
//! 1. Each member draws a fresh nonce `k_i` and publishes the [Commitment] `R_i = k_i·B`.
//! 2. Once all commitments are known, each member computes `R = Σ R_i`, the challenge
//!    `e = H(R || X || m)` and publishes the [Share] `s_i = k_i + e·a_i·x_i`.
//!
//! The aggregate `(R, Σ s_i)` is a standard ed25519 signature over `m` under `X`, so it can be
//! verified by anything that verifies ed25519 (see [crate::ed25519::PublicKey::verify_raw]).
//!
//! # Example
//!
//! ```rust
//! use arbiter_cryptography::{ed25519::PrivateKey, schnorr::{Context, Cosigner, Keystore}, Signer};
//!
//! let signers: Vec<Keystore> = (0..3).map(|i| Keystore::new(PrivateKey::from_seed(i))).collect();
//! let context = Context::new(signers.iter().map(|s| s.public_key()).collect()).unwrap();
//!
//! let session = b"session";
//! let message = b"message";
//! let commitments: Vec<_> = signers.iter().map(|s| s.commit(session)).collect();
//! let shares: Vec<_> = signers
//!     .iter()
//!     .map(|s| s.respond(session, &context, &commitments, message).unwrap())
//!     .collect();
//!
//! let challenge = context.challenge(&commitments, message).unwrap();
//! let signature = context.aggregate(&challenge, &shares).unwrap();
//! assert!(context.aggregate_key().verify_raw(message, &signature));
//! ```

use crate::{
    ed25519::{PrivateKey, PublicKey, Signature},
    Error, Signer,
};
use arbiter_codec::{Error as CodecError, EncodeSize, FixedSize, Read, ReadExt, Write};
use arbiter_utils::hex;
use bytes::{Buf, BufMut};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::Identity,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest as _, Sha512};
use std::{
    collections::{HashMap, VecDeque},
    fmt::{Debug, Display},
    sync::{Arc, Mutex},
};
use zeroize::Zeroize;

const POINT_LENGTH: usize = 32;
const SCALAR_LENGTH: usize = 32;
const COEFFICIENT_TAG: &[u8] = b"ARBITER_SCHNORR_COEFFICIENT";

/// Maximum number of outstanding nonces a [Keystore] retains.
pub const NONCE_CAPACITY: usize = 1024;

fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// A member's first-round nonce commitment (`R_i`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Commitment {
    raw: [u8; POINT_LENGTH],
    point: EdwardsPoint,
}

impl Commitment {
    fn from_point(point: EdwardsPoint) -> Self {
        Self {
            raw: point.compress().to_bytes(),
            point,
        }
    }
}

impl TryFrom<[u8; POINT_LENGTH]> for Commitment {
    type Error = Error;

    fn try_from(raw: [u8; POINT_LENGTH]) -> Result<Self, Self::Error> {
        let point = CompressedEdwardsY(raw)
            .decompress()
            .ok_or(Error::InvalidCommitment)?;
        Ok(Self { raw, point })
    }
}

impl Write for Commitment {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for Commitment {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; POINT_LENGTH]>::read(buf)?;
        Self::try_from(raw).map_err(|_| CodecError::Invalid("Commitment", "not a curve point"))
    }
}

impl FixedSize for Commitment {
    const SIZE: usize = POINT_LENGTH;
}

impl EncodeSize for Commitment {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl std::hash::Hash for Commitment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl Debug for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

/// A member's second-round response (`s_i`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Share(Scalar);

impl TryFrom<[u8; SCALAR_LENGTH]> for Share {
    type Error = Error;

    fn try_from(raw: [u8; SCALAR_LENGTH]) -> Result<Self, Self::Error> {
        let scalar: Option<Scalar> = Scalar::from_canonical_bytes(raw).into();
        scalar.map(Self).ok_or(Error::InvalidShare)
    }
}

impl Write for Share {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.to_bytes().write(buf);
    }
}

impl Read for Share {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; SCALAR_LENGTH]>::read(buf)?;
        Self::try_from(raw).map_err(|_| CodecError::Invalid("Share", "non-canonical scalar"))
    }
}

impl FixedSize for Share {
    const SIZE: usize = SCALAR_LENGTH;
}

impl EncodeSize for Share {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(self.0.as_bytes()))
    }
}

/// The aggregate nonce and challenge scalar of one signing session.
#[derive(Clone, Copy, Debug)]
pub struct Challenge {
    nonce: EdwardsPoint,
    scalar: Scalar,
}

/// A signing group: the ordered member keys, their coefficients and the aggregate key.
#[derive(Clone, Debug)]
pub struct Context {
    keys: Vec<PublicKey>,
    points: Vec<EdwardsPoint>,
    coefficients: Vec<Scalar>,
    aggregate_key: PublicKey,
}

impl Context {
    /// Create a signing group from an ordered list of member keys.
    ///
    /// The order matters: commitments and shares are matched to members by index.
    pub fn new(keys: Vec<PublicKey>) -> Result<Self, Error> {
        if keys.is_empty() {
            return Err(Error::EmptyGroup);
        }
        let mut sorted = keys.clone();
        sorted.sort();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::DuplicateKey);
        }

        let list: Vec<u8> = keys.iter().flat_map(|k| k.as_ref().to_vec()).collect();
        let mut points = Vec::with_capacity(keys.len());
        let mut coefficients = Vec::with_capacity(keys.len());
        let mut aggregate = EdwardsPoint::identity();
        for key in &keys {
            let mut raw = [0u8; POINT_LENGTH];
            raw.copy_from_slice(key.as_ref());
            let point = CompressedEdwardsY(raw)
                .decompress()
                .ok_or(Error::InvalidPublicKey)?;
            let coefficient = hash_to_scalar(&[COEFFICIENT_TAG, list.as_slice(), key.as_ref()]);
            aggregate += coefficient * point;
            points.push(point);
            coefficients.push(coefficient);
        }
        let aggregate_key = PublicKey::try_from(aggregate.compress().to_bytes())?;

        Ok(Self {
            keys,
            points,
            coefficients,
            aggregate_key,
        })
    }

    /// Ordered member keys.
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// The key under which aggregated signatures verify.
    pub fn aggregate_key(&self) -> &PublicKey {
        &self.aggregate_key
    }

    /// Position of `key` in the group, if a member.
    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always `false` (empty groups cannot be constructed).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compute the aggregate nonce and challenge from one commitment per member.
    pub fn challenge(&self, commitments: &[Commitment], message: &[u8]) -> Result<Challenge, Error> {
        if commitments.len() != self.keys.len() {
            return Err(Error::CommitmentCount(self.keys.len(), commitments.len()));
        }
        let nonce: EdwardsPoint = commitments.iter().map(|c| c.point).sum();
        let scalar = hash_to_scalar(&[
            nonce.compress().as_bytes().as_slice(),
            self.aggregate_key.as_ref(),
            message,
        ]);
        Ok(Challenge { nonce, scalar })
    }

    /// Check a single member's share against its commitment.
    pub fn verify_share(
        &self,
        challenge: &Challenge,
        index: usize,
        commitment: &Commitment,
        share: &Share,
    ) -> bool {
        let (Some(point), Some(coefficient)) = (self.points.get(index), self.coefficients.get(index))
        else {
            return false;
        };
        let expected = commitment.point + (challenge.scalar * coefficient) * point;
        EdwardsPoint::mul_base(&share.0) == expected
    }

    /// Combine one share per member into an ed25519 signature under [Self::aggregate_key].
    pub fn aggregate(&self, challenge: &Challenge, shares: &[Share]) -> Result<Signature, Error> {
        if shares.len() != self.keys.len() {
            return Err(Error::CommitmentCount(self.keys.len(), shares.len()));
        }
        let s: Scalar = shares.iter().map(|share| share.0).sum();
        let mut raw = [0u8; 64];
        raw[..32].copy_from_slice(challenge.nonce.compress().as_bytes());
        raw[32..].copy_from_slice(s.as_bytes());
        Ok(Signature::from(raw))
    }
}

/// Participates in two-round Schnorr signing sessions.
pub trait Cosigner: Clone + Send + Sync + 'static {
    /// Return this member's commitment for `session`, drawing a nonce if none is outstanding.
    fn commit(&self, session: &[u8]) -> Commitment;

    /// Produce this member's share for `session`, consuming the session's nonce.
    ///
    /// Fails if no nonce is outstanding for `session` or if the commitment listed for this member
    /// does not match it.
    fn respond(
        &self,
        session: &[u8],
        context: &Context,
        commitments: &[Commitment],
        message: &[u8],
    ) -> Result<Share, Error>;
}

#[derive(Default)]
struct Nonces {
    order: VecDeque<Vec<u8>>,
    nonces: HashMap<Vec<u8>, Scalar>,
}

impl Nonces {
    fn insert(&mut self, session: Vec<u8>, nonce: Scalar) {
        self.order.push_back(session.clone());
        self.nonces.insert(session, nonce);
        while self.order.len() > NONCE_CAPACITY {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            if let Some(mut nonce) = self.nonces.remove(&evicted) {
                nonce.zeroize();
            }
        }
    }

    fn take(&mut self, session: &[u8]) -> Option<Scalar> {
        let nonce = self.nonces.remove(session)?;
        self.order.retain(|s| s.as_slice() != session);
        Some(nonce)
    }
}

/// An ed25519 key that can also cosign Schnorr sessions.
///
/// Outstanding nonces are shared across clones.
#[derive(Clone)]
pub struct Keystore {
    key: PrivateKey,
    nonces: Arc<Mutex<Nonces>>,
}

impl Keystore {
    /// Wrap a private key.
    pub fn new(key: PrivateKey) -> Self {
        Self {
            key,
            nonces: Arc::new(Mutex::new(Nonces::default())),
        }
    }

    /// Number of sessions with an outstanding nonce.
    pub fn outstanding(&self) -> usize {
        self.nonces.lock().unwrap().nonces.len()
    }
}

impl Signer for Keystore {
    type Signature = Signature;
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    fn sign(&self, namespace: &[u8], msg: &[u8]) -> Signature {
        self.key.sign(namespace, msg)
    }
}

impl Cosigner for Keystore {
    fn commit(&self, session: &[u8]) -> Commitment {
        let mut nonces = self.nonces.lock().unwrap();
        if let Some(nonce) = nonces.nonces.get(session) {
            return Commitment::from_point(EdwardsPoint::mul_base(nonce));
        }
        let mut wide = [0u8; 64];
        OsRng.fill_bytes(&mut wide);
        let nonce = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        nonces.insert(session.to_vec(), nonce);
        Commitment::from_point(EdwardsPoint::mul_base(&nonce))
    }

    fn respond(
        &self,
        session: &[u8],
        context: &Context,
        commitments: &[Commitment],
        message: &[u8],
    ) -> Result<Share, Error> {
        let index = context
            .index_of(&self.key.public_key())
            .ok_or(Error::UnknownSigner)?;
        let challenge = context.challenge(commitments, message)?;

        let mut nonces = self.nonces.lock().unwrap();
        let nonce = nonces.nonces.get(session).ok_or(Error::MissingNonce)?;
        if EdwardsPoint::mul_base(nonce) != commitments[index].point {
            return Err(Error::CommitmentMismatch);
        }
        let Some(mut nonce) = nonces.take(session) else {
            return Err(Error::MissingNonce);
        };
        drop(nonces);

        let mut secret = self.key.scalar();
        let share = nonce + challenge.scalar * context.coefficients[index] * secret;
        nonce.zeroize();
        secret.zeroize();
        Ok(Share(share))
    }
}
