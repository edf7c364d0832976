//! Propose payloads to the committee and collect their signatures.
//!
//! The [Server] runs on every arbitrator but only proposes while its identity is on duty. Each
//! proposal is tracked in a pending table keyed by digest until enough feedback has been merged
//! to meet the script's threshold, at which point the entry is removed and the payload is
//! finalized (submitted to the chain or, for multi-round payloads, proposed again as the next
//! round).
//!
//! The pending table is guarded by a single mutex. Merging a contribution, checking quorum and
//! removing a complete entry happen in one critical section, so a proposal is finalized at most
//! once. The lock is never held across an `.await`.

use crate::{
    chain::{ChainQuery, Sink, Store},
    committee::{Directory, RedeemScript},
    content::{Collection, Content, Contribution, Distributed, Submission},
    item::Item,
    metrics::{self, Outcome},
    network::{Command, SignMessage},
    Custody, Error,
};
use arbiter_codec::{DecodeExt, Encode};
use arbiter_cryptography::{ed25519::PublicKey, Digest};
use arbiter_p2p::{Recipients, Sender};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, warn};

/// Configuration for the [Server].
pub struct Config<C: Custody, Q: ChainQuery, P: Sender<PublicKey = PublicKey>, K: Sink, S: Store> {
    /// Signing identity of this node.
    pub custody: C,

    /// Committee directory (shared with the client).
    pub directory: Directory<Q>,

    /// Network sender used for proposals.
    pub sender: P,

    /// Main chain submission endpoint.
    pub sink: K,

    /// Bookkeeping for finalized payloads.
    pub store: S,

    /// Namespace all signatures are bound to.
    pub namespace: Vec<u8>,
}

/// Result of feeding the server a proposal or a feedback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The proposal is still collecting signatures.
    Pending { signed: usize, threshold: usize },
    /// The signer had already contributed.
    Duplicate,
    /// The proposal reached quorum and was finalized.
    Finalized(Submission),
    /// The proposal reached quorum and its next round (with `digest`) was proposed.
    NextRound { digest: Digest, progress: Box<Progress> },
}

struct Pending {
    content: Content,
    script: RedeemScript,
    collection: Collection,
}

enum Started {
    /// Signed and already complete.
    Complete(Content, Collection),
    /// Signed and reserved, awaiting feedback.
    Pending(Item),
}

/// The proposing half of an arbitrator.
#[derive(Clone)]
pub struct Server<C: Custody, Q: ChainQuery, P: Sender<PublicKey = PublicKey>, K: Sink, S: Store> {
    custody: C,
    directory: Directory<Q>,
    sender: P,
    sink: K,
    store: S,
    namespace: Arc<[u8]>,

    pending: Arc<Mutex<HashMap<Digest, Pending>>>,

    metrics: metrics::Server,
}

impl<C: Custody, Q: ChainQuery, P: Sender<PublicKey = PublicKey>, K: Sink, S: Store>
    Server<C, Q, P, K, S>
{
    /// Create a new server, registering its metrics.
    pub fn new(cfg: Config<C, Q, P, K, S>, registry: &mut Registry) -> Self {
        Self {
            custody: cfg.custody,
            directory: cfg.directory,
            sender: cfg.sender,
            sink: cfg.sink,
            store: cfg.store,
            namespace: cfg.namespace.into(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            metrics: metrics::Server::init(registry),
        }
    }

    /// Propose `content` to the committee.
    ///
    /// Fails with [Error::NotOnDuty] unless this node is the on-duty arbitrator and with
    /// [Error::DuplicateProposal] (sending nothing) if the same content is already in flight.
    ///
    /// The script is built from the committee at the content's height, the same committee
    /// every co-signer checks the proposal against. Content above the latest synced height
    /// fails with [Error::UnknownHeight] and content from a height where this node was not on
    /// duty fails with [Error::StaleProposer].
    pub async fn broadcast_proposal(&self, content: Content) -> Result<Progress, Error> {
        let identity = self.custody.public_key();
        if !self.directory.is_currently_on_duty(&identity)? {
            return Err(Error::NotOnDuty);
        }
        let committee = self.directory.snapshot_at(content.height())?;
        if *committee.on_duty_arbitrator()? != identity {
            return Err(Error::StaleProposer);
        }
        let script = self
            .directory
            .script_for(&committee, content.kind().script_kind())?;
        self.propose(content, script).await
    }

    async fn propose(&self, content: Content, script: RedeemScript) -> Result<Progress, Error> {
        match self.start(content, &script)? {
            Started::Complete(content, collection) => {
                self.advance(content, script, collection).await
            }
            Started::Pending(item) => self.send(item).await,
        }
    }

    /// Sign `content` and reserve its digest in one critical section.
    fn start(&self, content: Content, script: &RedeemScript) -> Result<Started, Error> {
        let mut item = Item::new(content, script.clone())?;
        let digest = item.digest();

        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&digest) {
            return Err(Error::DuplicateProposal(digest));
        }
        let index = item.sign(&self.custody, &self.namespace)?;
        let answer = item.content().answer(&self.custody, script)?;
        let signature = item
            .proposer_signature()
            .cloned()
            .ok_or(Error::InvalidState)?;
        let mut collection = Collection::new(script.threshold());
        collection.init(index, Contribution { answer, signature })?;
        self.metrics.proposals.inc();

        // A single signer can finalize without asking anyone
        if collection.is_complete() {
            debug!(?digest, "proposal complete without feedback");
            return Ok(Started::Complete(item.content().clone(), collection));
        }
        pending.insert(
            digest,
            Pending {
                content: item.content().clone(),
                script: script.clone(),
                collection,
            },
        );
        self.metrics.pending.set(pending.len() as i64);
        Ok(Started::Pending(item))
    }

    /// Broadcast a signed proposal to the rest of its script's signers.
    async fn send(&self, item: Item) -> Result<Progress, Error> {
        let digest = item.digest();
        let identity = self.custody.public_key();
        let recipients: Vec<PublicKey> = item
            .script()
            .keys()
            .iter()
            .filter(|key| **key != identity)
            .cloned()
            .collect();
        let message = SignMessage::new(Command::Proposal, item.encode().freeze());
        let mut sender = self.sender.clone();
        match sender
            .send(Recipients::Some(recipients), message.encode().freeze(), true)
            .await
        {
            Ok(sent) => {
                let kind = item.content().kind();
                debug!(?digest, ?kind, sent = sent.len(), "broadcast proposal");
            }
            Err(err) => {
                self.remove(&digest);
                warn!(?digest, ?err, "failed to broadcast proposal");
                return Err(Error::SendFailed(err.to_string()));
            }
        }
        Ok(Progress::Pending {
            signed: 1,
            threshold: item.script().threshold(),
        })
    }

    /// Merge a feedback envelope received from `sender`.
    pub async fn receive_feedback(
        &self,
        sender: &PublicKey,
        message: Bytes,
    ) -> Result<Progress, Error> {
        let result = self.merge(sender, message).await;
        let outcome = match &result {
            Ok(Progress::Duplicate) => Outcome::Dropped,
            Ok(_) => Outcome::Success,
            Err(err) if err.ignorable() => Outcome::Dropped,
            Err(err) if err.transient() => Outcome::Failure,
            Err(_) => Outcome::Invalid,
        };
        metrics::inc(&self.metrics.feedback, outcome);
        result
    }

    async fn merge(&self, sender: &PublicKey, message: Bytes) -> Result<Progress, Error> {
        let item = Item::decode(message)?;
        if !item.is_feedback() {
            return Err(Error::NotFeedback);
        }
        if item.target() != Some(sender) {
            return Err(Error::PeerMismatch);
        }
        let (signer, contribution) = item.parse_feedback(&self.namespace)?;
        let digest = item.digest();

        let (content, script, collection) = {
            let mut pending = self.pending.lock().unwrap();
            let entry = pending
                .get_mut(&digest)
                .ok_or(Error::UnknownProposal(digest))?;

            // Membership is judged by the script we proposed, never by the envelope's
            let index = entry
                .script
                .index_of_program_hash(&signer)
                .ok_or(Error::InvalidSigner)?;
            if entry.script != *item.script() {
                debug!(?digest, ?sender, "feedback script mismatch");
                return Err(Error::ScriptMismatch);
            }
            entry
                .content
                .verify_answer(&entry.script, index, &contribution.answer)?;
            let signed = match entry.collection.merge_sign(&entry.script, &signer, contribution) {
                Ok(signed) => signed,
                Err(Error::AlreadySigned) => {
                    debug!(?digest, ?sender, "duplicate feedback");
                    return Ok(Progress::Duplicate);
                }
                Err(err) => return Err(err),
            };
            let threshold = entry.collection.threshold();
            debug!(?digest, signed, threshold, "merged feedback");
            if signed < threshold {
                return Ok(Progress::Pending { signed, threshold });
            }
            let Some(entry) = pending.remove(&digest) else {
                return Err(Error::InvalidState);
            };
            self.metrics.pending.set(pending.len() as i64);
            (entry.content, entry.script, entry.collection)
        };
        self.advance(content, script, collection).await
    }

    /// Finalize a complete proposal, proposing follow-up rounds until one needs feedback.
    async fn advance(
        &self,
        mut content: Content,
        script: RedeemScript,
        mut collection: Collection,
    ) -> Result<Progress, Error> {
        let mut rounds = Vec::new();
        let mut progress = loop {
            let digest = content.digest();
            let submission = content
                .submit(&script, &collection, &self.sink, &self.store)
                .await
                .inspect_err(|err| warn!(?digest, ?err, "failed to finalize proposal"))?;
            let next = match submission {
                Submission::NextRound(next) => *next,
                Submission::Rejected { code, reason } => {
                    self.metrics.rejected.inc();
                    warn!(?digest, code, %reason, "proposal rejected by chain");
                    break Progress::Finalized(Submission::Rejected { code, reason });
                }
                submission => {
                    self.metrics.finalized.inc();
                    info!(?digest, ?submission, "proposal finalized");
                    break Progress::Finalized(submission);
                }
            };

            self.metrics.finalized.inc();
            let next_digest = next.digest();
            info!(?digest, next = ?next_digest, "proposing next round");
            rounds.push(next_digest);
            match self.start(next, &script)? {
                Started::Complete(next, complete) => {
                    content = next;
                    collection = complete;
                }
                Started::Pending(item) => break self.send(item).await?,
            }
        };
        for digest in rounds.into_iter().rev() {
            progress = Progress::NextRound {
                digest,
                progress: Box::new(progress),
            };
        }
        Ok(progress)
    }

    fn remove(&self, digest: &Digest) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let removed = pending.remove(digest).is_some();
        self.metrics.pending.set(pending.len() as i64);
        removed
    }

    /// Stop collecting signatures for `digest`, returning whether it was pending.
    pub fn abandon(&self, digest: &Digest) -> bool {
        let removed = self.remove(digest);
        if removed {
            info!(?digest, "abandoned proposal");
        }
        removed
    }

    /// Digests of proposals collecting signatures.
    pub fn pending(&self) -> Vec<Digest> {
        self.pending.lock().unwrap().keys().copied().collect()
    }
}
