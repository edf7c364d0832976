//! Payloads the committee signs.
//!
//! Every payload implements [Distributed]: it knows its own identity, how a co-signer validates
//! it against the chains, what a co-signer contributes when answering it and how the proposer
//! finalizes it once enough contributions have been collected. [Content] dispatches over the
//! payload kinds a node handles.

use crate::{
    chain::{Record, Response, Sink, Status, Store, Validator},
    committee::{ProgramHash, RedeemScript, ScriptKind, Snapshot},
    Custody, Error,
};
use arbiter_codec::{EncodeSize, Error as CodecError, Read, ReadExt, Write};
use arbiter_cryptography::{
    ed25519::Signature,
    schnorr::{Commitment, Share},
    Digest, Sha256,
};
use bytes::{Buf, BufMut};
use std::{collections::BTreeMap, fmt::Debug, future::Future};
use tracing::debug;

mod evidence;
pub use evidence::{IllegalEvidence, SignedEvidence};
mod schnorr;
pub use schnorr::{SchnorrRequestR, SchnorrRequestS};
mod withdrawal;
pub use withdrawal::{
    Input, Outpoint, Output, SignedWithdrawal, Withdrawal, Witness, MAX_INPUTS, MAX_WITHDRAWALS,
};

/// Identifies a payload type on the wire and in digests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Withdrawal = 1,
    Evidence = 2,
    SchnorrR = 3,
    SchnorrS = 4,
}

impl Kind {
    /// The redeem script kind proposals of this kind are signed under.
    pub fn script_kind(&self) -> ScriptKind {
        match self {
            Kind::Withdrawal | Kind::Evidence => ScriptKind::Multisig,
            Kind::SchnorrR | Kind::SchnorrS => ScriptKind::Schnorr,
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Kind::Withdrawal),
            2 => Ok(Kind::Evidence),
            3 => Ok(Kind::SchnorrR),
            4 => Ok(Kind::SchnorrS),
            other => Err(CodecError::InvalidEnum(other)),
        }
    }
}

/// A co-signer's contribution to a proposal, beyond its signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    /// Plain approval.
    Ack,
    /// Nonce commitment (first Schnorr round).
    Commitment(Commitment),
    /// Signature share (second Schnorr round).
    Share(Share),
}

impl Write for Answer {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Answer::Ack => {}
            Answer::Commitment(commitment) => commitment.write(buf),
            Answer::Share(share) => share.write(buf),
        }
    }
}

impl EncodeSize for Answer {
    fn encode_size(&self) -> usize {
        match self {
            Answer::Ack => 0,
            Answer::Commitment(commitment) => commitment.encode_size(),
            Answer::Share(share) => share.encode_size(),
        }
    }
}

impl Read for Answer {
    type Cfg = Kind;

    fn read_cfg(buf: &mut impl Buf, kind: &Kind) -> Result<Self, CodecError> {
        match kind {
            Kind::Withdrawal | Kind::Evidence => Ok(Answer::Ack),
            Kind::SchnorrR => Ok(Answer::Commitment(Commitment::read(buf)?)),
            Kind::SchnorrS => Ok(Answer::Share(Share::read(buf)?)),
        }
    }
}

/// One signer's signed contribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub answer: Answer,
    pub signature: Signature,
}

/// Contributions collected by the proposer, keyed by signer index.
#[derive(Clone, Debug)]
pub struct Collection {
    threshold: usize,
    entries: BTreeMap<usize, Contribution>,
}

impl Collection {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            entries: BTreeMap::new(),
        }
    }

    /// Seed the collection with the proposer's own contribution.
    pub fn init(&mut self, index: usize, contribution: Contribution) -> Result<usize, Error> {
        if !self.entries.is_empty() {
            return Err(Error::InvalidState);
        }
        self.entries.insert(index, contribution);
        Ok(self.entries.len())
    }

    /// Add a contribution from `index`, returning the new count.
    pub fn merge(&mut self, index: usize, contribution: Contribution) -> Result<usize, Error> {
        if self.entries.contains_key(&index) {
            return Err(Error::AlreadySigned);
        }
        self.entries.insert(index, contribution);
        Ok(self.entries.len())
    }

    /// Add a contribution from the script signer hashing to `signer`.
    pub fn merge_sign(
        &mut self,
        script: &RedeemScript,
        signer: &ProgramHash,
        contribution: Contribution,
    ) -> Result<usize, Error> {
        let index = script
            .index_of_program_hash(signer)
            .ok_or(Error::InvalidSigner)?;
        self.merge(index, contribution)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_complete(&self) -> bool {
        self.entries.len() >= self.threshold
    }

    /// The first `threshold` signatures, in signer order.
    pub fn signatures(&self) -> Vec<Signature> {
        self.entries
            .values()
            .take(self.threshold)
            .map(|contribution| contribution.signature.clone())
            .collect()
    }

    /// Every answer, in signer order.
    pub fn answers(&self) -> impl Iterator<Item = (usize, &Answer)> {
        self.entries
            .iter()
            .map(|(index, contribution)| (*index, &contribution.answer))
    }
}

/// What happened when a finalized proposal was handed to the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The chain accepted the item.
    Accepted,
    /// The chain already knew the item (carrying the duplicate-class code).
    Known(i64),
    /// The chain rejected the item.
    Rejected { code: i64, reason: String },
    /// The proposal feeds a follow-up round that must be proposed next.
    NextRound(Box<Content>),
}

/// Record the chain's response in the store and classify it.
pub(crate) async fn finish<S: Store>(
    store: &S,
    digest: Digest,
    kind: Kind,
    response: Response,
) -> Submission {
    let success = response.is_success();
    let status = if success {
        Status::Succeeded
    } else {
        Status::Failed {
            code: response.code.unwrap_or_default(),
            reason: response.message.clone(),
        }
    };
    debug!(?digest, ?kind, ?status, "recording submission");
    store
        .finish(Record {
            digest,
            kind,
            status,
        })
        .await;
    match response.code {
        None => Submission::Accepted,
        Some(code) if success => Submission::Known(code),
        Some(code) => Submission::Rejected {
            code,
            reason: response.message,
        },
    }
}

/// A payload that is proposed by the on-duty arbitrator and co-signed by the committee.
pub trait Distributed: Clone + Debug + PartialEq + Send + Sync + Write + EncodeSize + 'static {
    fn kind(&self) -> Kind;

    /// Main chain height the payload was proposed at.
    fn height(&self) -> u64;

    /// Stable identity of the payload (SHA-256 over the kind and the unsigned body).
    fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(&[self.kind() as u8]);
        let mut body = Vec::with_capacity(self.encode_size());
        self.write(&mut body);
        hasher.update(&body);
        hasher.finalize()
    }

    /// Validate the payload before answering it.
    fn check<V: Validator>(
        &self,
        validator: &V,
        script: &RedeemScript,
        committee: &Snapshot,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Compute the local signer's contribution.
    fn answer<C: Custody>(&self, custody: &C, script: &RedeemScript) -> Result<Answer, Error>;

    /// Check a contribution from the signer at `index`.
    fn verify_answer(&self, script: &RedeemScript, index: usize, answer: &Answer)
        -> Result<(), Error>;

    /// Finalize a complete collection.
    fn submit<K: Sink, S: Store>(
        &self,
        script: &RedeemScript,
        collection: &Collection,
        sink: &K,
        store: &S,
    ) -> impl Future<Output = Result<Submission, Error>> + Send;
}

/// Any payload a node proposes or answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Withdrawal(Withdrawal),
    Evidence(IllegalEvidence),
    SchnorrR(SchnorrRequestR),
    SchnorrS(SchnorrRequestS),
}

impl From<Withdrawal> for Content {
    fn from(withdrawal: Withdrawal) -> Self {
        Content::Withdrawal(withdrawal)
    }
}

impl From<IllegalEvidence> for Content {
    fn from(evidence: IllegalEvidence) -> Self {
        Content::Evidence(evidence)
    }
}

impl From<SchnorrRequestR> for Content {
    fn from(request: SchnorrRequestR) -> Self {
        Content::SchnorrR(request)
    }
}

impl From<SchnorrRequestS> for Content {
    fn from(request: SchnorrRequestS) -> Self {
        Content::SchnorrS(request)
    }
}

impl Write for Content {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Content::Withdrawal(content) => content.write(buf),
            Content::Evidence(content) => content.write(buf),
            Content::SchnorrR(content) => content.write(buf),
            Content::SchnorrS(content) => content.write(buf),
        }
    }
}

impl EncodeSize for Content {
    fn encode_size(&self) -> usize {
        match self {
            Content::Withdrawal(content) => content.encode_size(),
            Content::Evidence(content) => content.encode_size(),
            Content::SchnorrR(content) => content.encode_size(),
            Content::SchnorrS(content) => content.encode_size(),
        }
    }
}

impl Read for Content {
    type Cfg = Kind;

    fn read_cfg(buf: &mut impl Buf, kind: &Kind) -> Result<Self, CodecError> {
        Ok(match kind {
            Kind::Withdrawal => Content::Withdrawal(Withdrawal::read(buf)?),
            Kind::Evidence => Content::Evidence(IllegalEvidence::read(buf)?),
            Kind::SchnorrR => Content::SchnorrR(SchnorrRequestR::read(buf)?),
            Kind::SchnorrS => Content::SchnorrS(SchnorrRequestS::read(buf)?),
        })
    }
}

impl Distributed for Content {
    fn kind(&self) -> Kind {
        match self {
            Content::Withdrawal(content) => content.kind(),
            Content::Evidence(content) => content.kind(),
            Content::SchnorrR(content) => content.kind(),
            Content::SchnorrS(content) => content.kind(),
        }
    }

    fn height(&self) -> u64 {
        match self {
            Content::Withdrawal(content) => content.height(),
            Content::Evidence(content) => content.height(),
            Content::SchnorrR(content) => content.height(),
            Content::SchnorrS(content) => content.height(),
        }
    }

    async fn check<V: Validator>(
        &self,
        validator: &V,
        script: &RedeemScript,
        committee: &Snapshot,
    ) -> Result<(), Error> {
        match self {
            Content::Withdrawal(content) => content.check(validator, script, committee).await,
            Content::Evidence(content) => content.check(validator, script, committee).await,
            Content::SchnorrR(content) => content.check(validator, script, committee).await,
            Content::SchnorrS(content) => content.check(validator, script, committee).await,
        }
    }

    fn answer<C: Custody>(&self, custody: &C, script: &RedeemScript) -> Result<Answer, Error> {
        match self {
            Content::Withdrawal(content) => content.answer(custody, script),
            Content::Evidence(content) => content.answer(custody, script),
            Content::SchnorrR(content) => content.answer(custody, script),
            Content::SchnorrS(content) => content.answer(custody, script),
        }
    }

    fn verify_answer(
        &self,
        script: &RedeemScript,
        index: usize,
        answer: &Answer,
    ) -> Result<(), Error> {
        match self {
            Content::Withdrawal(content) => content.verify_answer(script, index, answer),
            Content::Evidence(content) => content.verify_answer(script, index, answer),
            Content::SchnorrR(content) => content.verify_answer(script, index, answer),
            Content::SchnorrS(content) => content.verify_answer(script, index, answer),
        }
    }

    async fn submit<K: Sink, S: Store>(
        &self,
        script: &RedeemScript,
        collection: &Collection,
        sink: &K,
        store: &S,
    ) -> Result<Submission, Error> {
        match self {
            Content::Withdrawal(content) => content.submit(script, collection, sink, store).await,
            Content::Evidence(content) => content.submit(script, collection, sink, store).await,
            Content::SchnorrR(content) => content.submit(script, collection, sink, store).await,
            Content::SchnorrS(content) => content.submit(script, collection, sink, store).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{committee, MockValidator};
    use arbiter_codec::Encode;
    use arbiter_cryptography::{ed25519::PrivateKey, Signer};

    fn contribution(seed: u64) -> Contribution {
        Contribution {
            answer: Answer::Ack,
            signature: PrivateKey::from_seed(seed).sign(b"test", b"msg"),
        }
    }

    #[test]
    fn test_collection() {
        let (_, snapshot) = committee(4, 0);
        let script =
            RedeemScript::new(ScriptKind::Multisig, 3, snapshot.arbitrators.clone()).unwrap();
        let mut collection = Collection::new(script.threshold());
        assert_eq!(collection.init(2, contribution(2)).unwrap(), 1);
        assert!(matches!(
            collection.init(0, contribution(0)),
            Err(Error::InvalidState)
        ));

        let signer = ProgramHash::from_key(&snapshot.arbitrators[0]);
        assert_eq!(
            collection
                .merge_sign(&script, &signer, contribution(0))
                .unwrap(),
            2
        );
        assert!(matches!(
            collection.merge_sign(&script, &signer, contribution(0)),
            Err(Error::AlreadySigned)
        ));
        let outsider = ProgramHash::from_key(&PrivateKey::from_seed(99).public_key());
        assert!(matches!(
            collection.merge_sign(&script, &outsider, contribution(99)),
            Err(Error::InvalidSigner)
        ));
        assert!(!collection.is_complete());

        collection.merge(3, contribution(3)).unwrap();
        assert!(collection.is_complete());

        // Signatures come out in signer order
        let expected: Vec<_> = [0, 2, 3].into_iter().map(|i| contribution(i).signature).collect();
        assert_eq!(collection.signatures(), expected);
    }

    #[test]
    fn test_digest_depends_on_kind() {
        let validator = MockValidator::default();
        let withdrawal = validator.fund_withdrawal(1, 1, &[10]);
        let request = SchnorrRequestR {
            withdrawal: withdrawal.clone(),
        };
        assert_eq!(withdrawal.encode(), request.encode());
        assert_ne!(withdrawal.digest(), request.digest());
        assert_eq!(Content::from(withdrawal.clone()).digest(), withdrawal.digest());
    }

    #[test]
    fn test_kind_tags() {
        for kind in [Kind::Withdrawal, Kind::Evidence, Kind::SchnorrR, Kind::SchnorrS] {
            assert_eq!(Kind::try_from(kind as u8).unwrap(), kind);
        }
        assert!(matches!(Kind::try_from(0), Err(CodecError::InvalidEnum(0))));
        assert!(matches!(Kind::try_from(5), Err(CodecError::InvalidEnum(5))));
        assert_eq!(Kind::SchnorrS.script_kind(), ScriptKind::Schnorr);
        assert_eq!(Kind::Evidence.script_kind(), ScriptKind::Multisig);
    }

    #[tokio::test]
    async fn test_finish_classification() {
        let store = crate::mocks::MockStore::default();
        let digest = arbiter_cryptography::hash(b"tx");

        let outcome = finish(&store, digest, Kind::Withdrawal, Response::accepted()).await;
        assert_eq!(outcome, Submission::Accepted);
        let outcome = finish(&store, digest, Kind::Withdrawal, Response::rejected(45003, "dup")).await;
        assert_eq!(outcome, Submission::Known(45003));
        let outcome = finish(&store, digest, Kind::Withdrawal, Response::rejected(1, "bad")).await;
        assert_eq!(
            outcome,
            Submission::Rejected {
                code: 1,
                reason: "bad".into()
            }
        );

        let records = store.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, Status::Succeeded);
        assert_eq!(records[1].status, Status::Succeeded);
        assert_eq!(
            records[2].status,
            Status::Failed {
                code: 1,
                reason: "bad".into()
            }
        );
    }
}
