//! Answer proposals from the on-duty arbitrator.
//!
//! The [Client] validates every proposal it receives, signs the ones it agrees with and unicasts
//! the resulting feedback back to the proposer. Invalid proposals are dropped without a reply.
//!
//! Proposals are de-duplicated by digest: a digest is reserved before validation and released
//! again if validation, signing or sending fails, so a proposal that was rejected for a
//! transient reason (for example, a lagging committee view) is re-checked when retransmitted.

use crate::{
    chain::{ChainQuery, Validator},
    committee::Directory,
    content::Distributed,
    item::Item,
    metrics::{self, Outcome},
    network::{Command, SignMessage},
    Custody, Error,
};
use arbiter_codec::{DecodeExt, Encode};
use arbiter_cryptography::{ed25519::PublicKey, Digest};
use arbiter_p2p::{Recipients, Sender};
use arbiter_utils::BoundedSet;
use bytes::Bytes;
use prometheus_client::registry::Registry;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Configuration for the [Client].
pub struct Config<C: Custody, Q: ChainQuery, P: Sender<PublicKey = PublicKey>, V: Validator> {
    /// Signing identity of this node.
    pub custody: C,

    /// Committee directory (shared with the server).
    pub directory: Directory<Q>,

    /// Network sender used for feedback.
    pub sender: P,

    /// Chain lookups used to validate proposals.
    pub validator: V,

    /// Namespace all signatures are bound to.
    pub namespace: Vec<u8>,

    /// Number of answered digests remembered.
    pub answered_capacity: usize,
}

/// The answering half of an arbitrator.
#[derive(Clone)]
pub struct Client<C: Custody, Q: ChainQuery, P: Sender<PublicKey = PublicKey>, V: Validator> {
    custody: C,
    directory: Directory<Q>,
    sender: P,
    validator: V,
    namespace: Arc<[u8]>,

    answered: Arc<Mutex<BoundedSet<Digest>>>,

    metrics: metrics::Client,
}

impl<C: Custody, Q: ChainQuery, P: Sender<PublicKey = PublicKey>, V: Validator> Client<C, Q, P, V> {
    /// Create a new client, registering its metrics.
    pub fn new(cfg: Config<C, Q, P, V>, registry: &mut Registry) -> Self {
        Self {
            custody: cfg.custody,
            directory: cfg.directory,
            sender: cfg.sender,
            validator: cfg.validator,
            namespace: cfg.namespace.into(),
            answered: Arc::new(Mutex::new(BoundedSet::new(cfg.answered_capacity))),
            metrics: metrics::Client::init(registry),
        }
    }

    /// Handle a proposal envelope received from `sender`.
    pub async fn on_received_proposal(&self, sender: &PublicKey, message: Bytes) -> Result<(), Error> {
        let result = self.answer(sender, message).await;
        let outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(err) if err.ignorable() => Outcome::Dropped,
            Err(err) if err.transient() => Outcome::Failure,
            Err(_) => Outcome::Invalid,
        };
        metrics::inc(&self.metrics.proposals, outcome);
        result
    }

    async fn answer(&self, sender: &PublicKey, message: Bytes) -> Result<(), Error> {
        let mut item = Item::decode(message)?;
        if item.is_feedback() {
            return Err(Error::NotProposal);
        }
        if item.target() != Some(sender) {
            return Err(Error::PeerMismatch);
        }
        let digest = item.digest();
        if !self.answered.lock().unwrap().insert(digest) {
            return Err(Error::AlreadyAnswered(digest));
        }
        if let Err(err) = self.respond(sender, &mut item).await {
            self.answered.lock().unwrap().remove(&digest);
            return Err(err);
        }
        self.metrics.answered.inc();
        debug!(?digest, proposer = ?sender, "answered proposal");
        Ok(())
    }

    async fn respond(&self, proposer: &PublicKey, item: &mut Item) -> Result<(), Error> {
        // Check the proposal against the committee at its height
        let committee = self.directory.snapshot_at(item.content().height())?;
        item.verify_proposer(&committee, &self.namespace)?;
        let kind = item.content().kind();
        let expected = self.directory.script_for(&committee, kind.script_kind())?;
        if *item.script() != expected {
            return Err(Error::ScriptMismatch);
        }
        item.content()
            .check(&self.validator, item.script(), &committee)
            .await?;

        // Sign and reply to the proposer only
        item.sign_feedback(&self.custody, &committee, &self.namespace)?;
        let message = SignMessage::new(Command::Feedback, item.encode().freeze());
        let mut sender = self.sender.clone();
        sender
            .send(
                Recipients::One(proposer.clone()),
                message.encode().freeze(),
                true,
            )
            .await
            .map_err(|err| Error::SendFailed(err.to_string()))?;
        Ok(())
    }
}
