//! Implementation of a `simulated` network.

use super::{
    metrics::{self, Reason},
    Error,
};
use crate::{Message, Recipients};
use arbiter_cryptography::PublicKey;
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use prometheus_client::{
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use tokio::sync::mpsc::{self as mailbox, error::TrySendError};
use tracing::debug;

type Task<P> = (P, Recipients<P>, Bytes, oneshot::Sender<Vec<P>>);

/// Describes a connection between two peers.
///
/// Links are unidirectional (and must be set up in both directions
/// for a bidirectional connection).
#[derive(Clone, Copy, Debug)]
pub struct Link {
    /// Mean latency for the delivery of a message in milliseconds.
    pub latency_mean: f64,

    /// Standard deviation of the latency for the delivery of a message in milliseconds.
    pub latency_stddev: f64,

    /// Probability of a message being delivered successfully (in range [0,1]).
    pub success_rate: f64,
}

/// Configuration for a `simulated` network.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum size of a message that can be sent.
    pub max_size: usize,

    /// Number of messages a peer may have waiting before further deliveries are dropped
    /// (at least one).
    pub mailbox_size: usize,

    /// Seed for link failures and latency.
    pub seed: u64,
}

/// Implementation of a `simulated` network.
pub struct Network<P: PublicKey> {
    cfg: Config,
    rng: StdRng,

    high: mpsc::UnboundedSender<Task<P>>,
    low: mpsc::UnboundedSender<Task<P>>,
    high_receiver: mpsc::UnboundedReceiver<Task<P>>,
    low_receiver: mpsc::UnboundedReceiver<Task<P>>,

    links: HashMap<P, HashMap<P, Link>>,
    agents: BTreeMap<P, mailbox::Sender<Message<P>>>,

    sent_messages: Family<metrics::Message, Counter>,
    received_messages: Family<metrics::Message, Counter>,
    dropped_messages: Family<metrics::Dropped, Counter>,
}

impl<P: PublicKey> Network<P> {
    /// Create a new simulated network, registering its metrics on `registry`.
    pub fn new(cfg: Config, registry: &mut Registry) -> Self {
        let (high, high_receiver) = mpsc::unbounded();
        let (low, low_receiver) = mpsc::unbounded();
        let sent_messages = Family::<metrics::Message, Counter>::default();
        let received_messages = Family::<metrics::Message, Counter>::default();
        let dropped_messages = Family::<metrics::Dropped, Counter>::default();
        registry.register("messages_sent", "messages sent", sent_messages.clone());
        registry.register(
            "messages_received",
            "messages received",
            received_messages.clone(),
        );
        registry.register(
            "messages_dropped",
            "messages dropped before delivery",
            dropped_messages.clone(),
        );

        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            high,
            low,
            high_receiver,
            low_receiver,
            links: HashMap::new(),
            agents: BTreeMap::new(),
            sent_messages,
            received_messages,
            dropped_messages,
        }
    }

    /// Register a new peer with the network.
    ///
    /// By default, the peer will not be linked to any other peers.
    pub fn register(&mut self, public_key: P) -> Result<(Sender<P>, Receiver<P>), Error> {
        if self.agents.contains_key(&public_key) {
            return Err(Error::AlreadyRegistered);
        }
        let (sender, receiver) = mailbox::channel(self.cfg.mailbox_size.max(1));
        self.agents.insert(public_key.clone(), sender);
        Ok((
            Sender {
                me: public_key,
                max_size: self.cfg.max_size,
                high: self.high.clone(),
                low: self.low.clone(),
            },
            Receiver { receiver },
        ))
    }

    /// Create a unidirectional link between two peers.
    ///
    /// Link can be called multiple times for the same sender/receiver. The latest
    /// setting will be used.
    pub fn link(&mut self, sender: P, receiver: P, config: Link) -> Result<(), Error> {
        if sender == receiver {
            return Err(Error::LinkingSelf);
        }
        if !(0.0..=1.0).contains(&config.success_rate) {
            return Err(Error::InvalidSuccessRate(config.success_rate));
        }
        if Normal::new(config.latency_mean, config.latency_stddev).is_err() {
            return Err(Error::InvalidLatency);
        }
        self.links
            .entry(sender)
            .or_default()
            .insert(receiver, config);
        Ok(())
    }

    /// Link every registered peer to every other registered peer (in both directions).
    pub fn link_all(&mut self, config: Link) -> Result<(), Error> {
        let peers: Vec<P> = self.agents.keys().cloned().collect();
        for sender in &peers {
            for receiver in &peers {
                if sender == receiver {
                    continue;
                }
                self.link(sender.clone(), receiver.clone(), config)?;
            }
        }
        Ok(())
    }

    /// Remove a unidirectional link between two peers.
    pub fn unlink(&mut self, sender: &P, receiver: &P) {
        if let Some(links) = self.links.get_mut(sender) {
            links.remove(receiver);
        }
    }

    fn drop_message(&self, recipient: &P, reason: Reason) {
        debug!(?recipient, ?reason, "dropping message");
        self.dropped_messages
            .get_or_create(&metrics::Dropped::new(recipient, reason))
            .inc();
    }

    /// Run the simulated network.
    ///
    /// Prioritized messages are always routed before non-prioritized ones.
    pub async fn run(mut self) {
        loop {
            let task = tokio::select! {
                biased;
                task = self.high_receiver.next() => task,
                task = self.low_receiver.next() => task,
            };
            let Some((origin, recipients, message, reply)) = task else {
                break;
            };

            // Collect recipients
            let recipients = match recipients {
                Recipients::All => self.agents.keys().cloned().collect(),
                Recipients::Some(keys) => keys,
                Recipients::One(key) => vec![key],
            };

            // Send to all recipients
            let mut sent = Vec::new();
            for recipient in recipients {
                // Skip self
                if recipient == origin {
                    continue;
                }

                // Determine if recipient exists
                let Some(mailbox) = self.agents.get(&recipient) else {
                    self.drop_message(&recipient, Reason::NoAgent);
                    continue;
                };

                // Determine if there is a link between the sender and recipient
                let Some(link) = self
                    .links
                    .get(&origin)
                    .and_then(|links| links.get(&recipient))
                    .copied()
                else {
                    self.drop_message(&recipient, Reason::NoLink);
                    continue;
                };

                // Record sent message as soon as we determine there is a link with recipient
                // (approximates having an open connection)
                self.sent_messages
                    .get_or_create(&metrics::Message::new(&origin, &recipient))
                    .inc();
                sent.push(recipient.clone());

                // Apply link settings
                if !self.rng.gen_bool(link.success_rate) {
                    self.drop_message(&recipient, Reason::LinkFailure);
                    continue;
                }
                let delay = match Normal::new(link.latency_mean, link.latency_stddev) {
                    Ok(distribution) => distribution.sample(&mut self.rng).max(0.0),
                    Err(_) => link.latency_mean.max(0.0),
                };

                let mailbox = mailbox.clone();
                let received_messages = self.received_messages.clone();
                let dropped_messages = self.dropped_messages.clone();
                let origin = origin.clone();
                let message = message.clone();
                let deliver = move || {
                    let label = metrics::Message::new(&origin, &recipient);
                    match mailbox.try_send((origin, message)) {
                        Ok(()) => {
                            received_messages.get_or_create(&label).inc();
                        }
                        Err(err) => {
                            let reason = match err {
                                TrySendError::Full(_) => Reason::Full,
                                TrySendError::Closed(_) => Reason::Closed,
                            };
                            debug!(?recipient, ?reason, "dropping message");
                            dropped_messages
                                .get_or_create(&metrics::Dropped::new(&recipient, reason))
                                .inc();
                        }
                    }
                };

                // Deliver immediately when there is no latency to preserve ordering
                if delay < 1.0 {
                    deliver();
                } else {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                        deliver();
                    });
                }
            }

            // Notify sender of successful sends (it may have given up waiting)
            let _ = reply.send(sent);
        }
    }
}

/// Implementation of a [crate::Sender] for the simulated network.
#[derive(Clone, Debug)]
pub struct Sender<P: PublicKey> {
    me: P,
    max_size: usize,
    high: mpsc::UnboundedSender<Task<P>>,
    low: mpsc::UnboundedSender<Task<P>>,
}

impl<P: PublicKey> crate::Sender for Sender<P> {
    type Error = Error;
    type PublicKey = P;

    async fn send(
        &mut self,
        recipients: Recipients<P>,
        message: Bytes,
        priority: bool,
    ) -> Result<Vec<P>, Error> {
        // Check message size
        if message.len() > self.max_size {
            return Err(Error::MessageTooLarge(message.len()));
        }

        // Send message
        let (sender, receiver) = oneshot::channel();
        let channel = if priority { &self.high } else { &self.low };
        channel
            .unbounded_send((self.me.clone(), recipients, message, sender))
            .map_err(|_| Error::NetworkClosed)?;
        receiver.await.map_err(|_| Error::NetworkClosed)
    }
}

/// Implementation of a [crate::Receiver] for the simulated network.
#[derive(Debug)]
pub struct Receiver<P: PublicKey> {
    receiver: mailbox::Receiver<Message<P>>,
}

impl<P: PublicKey> crate::Receiver for Receiver<P> {
    type Error = Error;
    type PublicKey = P;

    async fn recv(&mut self) -> Result<Message<P>, Error> {
        self.receiver.recv().await.ok_or(Error::NetworkClosed)
    }
}
