//! Carry envelopes between arbitrators and route them to the server or the client.
//!
//! Every envelope travels inside a [SignMessage]: a fixed-width command naming what the
//! envelope is followed by the encoded envelope. The [Dispatcher] reads messages from the
//! network, queues them per peer (so one chatty peer cannot starve the rest) and hands them,
//! round-robin, to a [Handler]. [Router] is the handler used by a node: proposals go to the
//! [Client], feedback goes to the [Server].

use crate::{
    chain::{ChainQuery, Sink, Store, Validator},
    client::Client,
    metrics::{self, Outcome},
    server::Server,
    Custody, Error,
};
use arbiter_codec::{
    DecodeExt, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, ReadRangeExt, Write,
};
use arbiter_cryptography::ed25519::PublicKey;
use arbiter_p2p::{Receiver, Sender};
use bytes::{Buf, BufMut, Bytes};
use prometheus_client::registry::Registry;
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Width of the command field of a [SignMessage].
pub const COMMAND_LEN: usize = 12;

/// Maximum size of the envelope carried by a [SignMessage].
pub const MAX_CONTENT_LEN: usize = 1024 * 1024;

/// What a [SignMessage] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// A proposal to be answered.
    Proposal,
    /// A co-signer's answer to a proposal.
    Feedback,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Proposal => "proposal",
            Command::Feedback => "feedback",
        }
    }

    /// The command name, NUL-padded to [COMMAND_LEN].
    pub fn to_bytes(&self) -> [u8; COMMAND_LEN] {
        let mut raw = [0u8; COMMAND_LEN];
        let name = self.name().as_bytes();
        raw[..name.len()].copy_from_slice(name);
        raw
    }
}

impl TryFrom<&[u8; COMMAND_LEN]> for Command {
    type Error = Error;

    fn try_from(raw: &[u8; COMMAND_LEN]) -> Result<Self, Self::Error> {
        [Command::Proposal, Command::Feedback]
            .into_iter()
            .find(|command| command.to_bytes() == *raw)
            .ok_or(Error::UnknownCommand)
    }
}

/// Wire carrier for envelopes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignMessage {
    command: [u8; COMMAND_LEN],
    pub content: Bytes,
}

impl SignMessage {
    pub fn new(command: Command, content: Bytes) -> Self {
        Self {
            command: command.to_bytes(),
            content,
        }
    }

    /// The carried command (unknown commands are valid on the wire but cannot be routed).
    pub fn command(&self) -> Result<Command, Error> {
        Command::try_from(&self.command)
    }
}

impl Write for SignMessage {
    fn write(&self, buf: &mut impl BufMut) {
        self.command.write(buf);
        self.content.write(buf);
    }
}

impl EncodeSize for SignMessage {
    fn encode_size(&self) -> usize {
        <[u8; COMMAND_LEN]>::SIZE + self.content.encode_size()
    }
}

impl Read for SignMessage {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let command = <[u8; COMMAND_LEN]>::read(buf)?;
        let content = Bytes::read_range(buf, 1..=MAX_CONTENT_LEN)?;
        Ok(Self { command, content })
    }
}

/// Processes routed messages.
pub trait Handler: Clone + Send + Sync + 'static {
    fn handle(
        &self,
        sender: PublicKey,
        command: Command,
        content: Bytes,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Routes proposals to a [Client] and feedback to a [Server].
#[derive(Clone)]
pub struct Router<C, Q, P, K, S, V>
where
    C: Custody,
    Q: ChainQuery,
    P: Sender<PublicKey = PublicKey>,
    K: Sink,
    S: Store,
    V: Validator,
{
    pub server: Server<C, Q, P, K, S>,
    pub client: Client<C, Q, P, V>,
}

impl<C, Q, P, K, S, V> Handler for Router<C, Q, P, K, S, V>
where
    C: Custody,
    Q: ChainQuery,
    P: Sender<PublicKey = PublicKey>,
    K: Sink,
    S: Store,
    V: Validator,
{
    async fn handle(
        &self,
        sender: PublicKey,
        command: Command,
        content: Bytes,
    ) -> Result<(), Error> {
        match command {
            Command::Proposal => self.client.on_received_proposal(&sender, content).await,
            Command::Feedback => self
                .server
                .receive_feedback(&sender, content)
                .await
                .map(|_| ()),
        }
    }
}

/// Configuration for the [Dispatcher].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Messages queued per peer before new ones are dropped.
    pub mailbox_size: usize,

    /// Maximum messages handled per processing pass.
    pub batch: usize,
}

#[derive(Default)]
struct Queues {
    peers: HashMap<PublicKey, VecDeque<(Command, Bytes)>>,
    ready: VecDeque<PublicKey>,
}

impl Queues {
    /// Queue a message, returning false if the peer's queue is full.
    fn push(&mut self, peer: PublicKey, message: (Command, Bytes), limit: usize) -> bool {
        let queue = self.peers.entry(peer.clone()).or_default();
        if queue.len() >= limit {
            return false;
        }
        if queue.is_empty() {
            self.ready.push_back(peer);
        }
        queue.push_back(message);
        true
    }

    /// Take up to `max` messages, one peer at a time.
    fn take(&mut self, max: usize) -> Vec<(PublicKey, Command, Bytes)> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(peer) = self.ready.pop_front() else {
                break;
            };
            let Some(queue) = self.peers.get_mut(&peer) else {
                continue;
            };
            let Some((command, content)) = queue.pop_front() else {
                continue;
            };
            if queue.is_empty() {
                self.peers.remove(&peer);
            } else {
                self.ready.push_back(peer.clone());
            }
            batch.push((peer, command, content));
        }
        batch
    }
}

/// Reads messages from the network and feeds them to a [Handler].
pub struct Dispatcher<R: Receiver<PublicKey = PublicKey>, H: Handler> {
    receiver: R,
    handler: H,
    mailbox_size: usize,
    batch: usize,

    queues: Arc<Mutex<Queues>>,
    notify: Arc<Notify>,

    metrics: metrics::Dispatcher,
}

impl<R: Receiver<PublicKey = PublicKey>, H: Handler> Dispatcher<R, H> {
    /// Create a new dispatcher, registering its metrics.
    pub fn new(receiver: R, handler: H, cfg: Config, registry: &mut Registry) -> Self {
        Self {
            receiver,
            handler,
            mailbox_size: cfg.mailbox_size.max(1),
            batch: cfg.batch.max(1),
            queues: Arc::new(Mutex::new(Queues::default())),
            notify: Arc::new(Notify::new()),
            metrics: metrics::Dispatcher::init(registry),
        }
    }

    /// Run until the network closes.
    pub async fn run(mut self) {
        let processor = tokio::spawn(Self::process(
            self.handler.clone(),
            self.queues.clone(),
            self.notify.clone(),
            self.batch,
            self.metrics.clone(),
        ));
        loop {
            let (peer, message) = match self.receiver.recv().await {
                Ok(message) => message,
                Err(err) => {
                    debug!(?err, "receiver closed");
                    break;
                }
            };
            self.enqueue(peer, message);
        }
        processor.abort();
    }

    fn enqueue(&self, peer: PublicKey, message: Bytes) {
        let parsed = SignMessage::decode(message)
            .map_err(Error::from)
            .and_then(|message| Ok((message.command()?, message.content)));
        let (command, content) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(?peer, ?err, "invalid message");
                metrics::inc(&self.metrics.received, Outcome::Invalid);
                return;
            }
        };
        let queued = self
            .queues
            .lock()
            .unwrap()
            .push(peer.clone(), (command, content), self.mailbox_size);
        if !queued {
            debug!(?peer, ?command, "peer queue full, dropping message");
            self.metrics.dropped.inc();
            return;
        }
        self.metrics.queued.inc();
        self.notify.notify_one();
    }

    async fn process(
        handler: H,
        queues: Arc<Mutex<Queues>>,
        notify: Arc<Notify>,
        batch: usize,
        metrics: metrics::Dispatcher,
    ) {
        loop {
            let messages = queues.lock().unwrap().take(batch);
            if messages.is_empty() {
                notify.notified().await;
                continue;
            }
            for (peer, command, content) in messages {
                metrics.queued.dec();
                let outcome = match handler.handle(peer.clone(), command, content).await {
                    Ok(()) => Outcome::Success,
                    Err(err) if err.ignorable() => {
                        debug!(?peer, ?command, ?err, "dropped message");
                        Outcome::Dropped
                    }
                    Err(err) if err.transient() => {
                        warn!(?peer, ?command, ?err, "failed to handle message");
                        Outcome::Failure
                    }
                    Err(err) => {
                        warn!(?peer, ?command, ?err, "invalid message");
                        Outcome::Invalid
                    }
                };
                metrics::inc(&metrics.received, outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_codec::Encode;
    use arbiter_cryptography::{ed25519::PrivateKey, Signer};
    use arbiter_p2p::simulated::{self, Link, Network};
    use std::time::Duration;

    #[test]
    fn test_command_padding() {
        let raw = Command::Feedback.to_bytes();
        assert_eq!(&raw[..8], b"feedback");
        assert!(raw[8..].iter().all(|byte| *byte == 0));
        assert_eq!(Command::try_from(&raw).unwrap(), Command::Feedback);

        let mut unknown = [0u8; COMMAND_LEN];
        unknown[..4].copy_from_slice(b"ping");
        assert!(matches!(
            Command::try_from(&unknown),
            Err(Error::UnknownCommand)
        ));

        // Padding must be NUL
        let mut padded = Command::Proposal.to_bytes();
        padded[COMMAND_LEN - 1] = b' ';
        assert!(Command::try_from(&padded).is_err());
    }

    #[test]
    fn test_sign_message_codec() {
        let message = SignMessage::new(Command::Proposal, Bytes::from_static(b"envelope"));
        let encoded = message.encode();
        assert_eq!(encoded.len(), COMMAND_LEN + 1 + 8);
        let decoded = SignMessage::decode(encoded).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.command().unwrap(), Command::Proposal);

        // Empty content
        let empty = SignMessage::new(Command::Proposal, Bytes::new());
        assert!(SignMessage::decode(empty.encode()).is_err());
    }

    #[test]
    fn test_round_robin() {
        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let mut queues = Queues::default();
        for i in 0..3u8 {
            assert!(queues.push(a.clone(), (Command::Proposal, Bytes::from(vec![i])), 3));
        }
        assert!(!queues.push(a.clone(), (Command::Proposal, Bytes::from(vec![3])), 3));
        assert!(queues.push(b.clone(), (Command::Feedback, Bytes::from(vec![9])), 3));

        let batch = queues.take(2);
        let peers: Vec<_> = batch.iter().map(|(peer, _, _)| peer.clone()).collect();
        assert_eq!(peers, vec![a.clone(), b.clone()]);
        let rest = queues.take(10);
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|(peer, _, _)| *peer == a));
        assert!(queues.take(10).is_empty());
    }

    #[derive(Clone, Default)]
    struct Recorder {
        handled: Arc<Mutex<Vec<(PublicKey, Command, Bytes)>>>,
    }

    impl Handler for Recorder {
        async fn handle(
            &self,
            sender: PublicKey,
            command: Command,
            content: Bytes,
        ) -> Result<(), Error> {
            self.handled.lock().unwrap().push((sender, command, content));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch() {
        let mut registry = Registry::default();
        let mut network = Network::new(
            simulated::Config {
                max_size: 1024,
                mailbox_size: 16,
                seed: 0,
            },
            &mut registry,
        );
        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let (mut sender, _) = network.register(a.clone()).unwrap();
        let (_, receiver) = network.register(b.clone()).unwrap();
        network
            .link_all(Link {
                latency_mean: 0.0,
                latency_stddev: 0.0,
                success_rate: 1.0,
            })
            .unwrap();
        tokio::spawn(network.run());

        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(
            receiver,
            recorder.clone(),
            Config {
                mailbox_size: 8,
                batch: 4,
            },
            &mut registry,
        );
        tokio::spawn(dispatcher.run());

        let valid = SignMessage::new(Command::Feedback, Bytes::from_static(b"hi"));
        sender
            .send(arbiter_p2p::Recipients::One(b.clone()), valid.encode().freeze(), false)
            .await
            .unwrap();
        sender
            .send(
                arbiter_p2p::Recipients::One(b.clone()),
                Bytes::from_static(b"garbage"),
                false,
            )
            .await
            .unwrap();

        loop {
            if !recorder.handled.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let handled = recorder.handled.lock().unwrap().clone();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, a);
        assert_eq!(handled[0].1, Command::Feedback);
        assert_eq!(handled[0].2, Bytes::from_static(b"hi"));
    }
}
