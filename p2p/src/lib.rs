//! Deliver messages between committee members.
//!
//! The arbiter core never manages connections itself: it only needs to broadcast a proposal to
//! the committee, unicast a feedback to the proposer and receive whatever arrives for it. Those
//! needs are captured by the [Sender] and [Receiver] traits. [simulated] provides an in-memory
//! implementation used by tests and by the node binary.

use arbiter_cryptography::PublicKey;
use bytes::Bytes;
use std::{error::Error as StdError, fmt::Debug, future::Future};

pub mod simulated;

/// Tuple representing a message received from a given public key.
///
/// The sender identity is authenticated by the transport.
pub type Message<P> = (P, Bytes);

/// Enum indicating the set of recipients to send a message to.
#[derive(Clone, Debug)]
pub enum Recipients<P: PublicKey> {
    All,
    Some(Vec<P>),
    One(P),
}

/// Interface for sending messages to a set of recipients.
pub trait Sender: Clone + Debug + Send + Sync + 'static {
    /// Error that can occur when sending a message.
    type Error: Debug + StdError + Send + Sync;

    /// Public key type used to identify recipients.
    type PublicKey: PublicKey;

    /// Send a message to a set of recipients.
    ///
    /// Returns the recipients the message was handed to (which may be a subset of those
    /// requested if some are unknown or unreachable).
    fn send(
        &mut self,
        recipients: Recipients<Self::PublicKey>,
        message: Bytes,
        priority: bool,
    ) -> impl Future<Output = Result<Vec<Self::PublicKey>, Self::Error>> + Send;
}

/// Interface for receiving messages from arbitrary recipients.
pub trait Receiver: Debug + Send + 'static {
    /// Error that can occur when receiving a message.
    type Error: Debug + StdError + Send + Sync;

    /// Public key type used to identify recipients.
    type PublicKey: PublicKey;

    /// Receive a message from an arbitrary recipient.
    fn recv(
        &mut self,
    ) -> impl Future<Output = Result<Message<Self::PublicKey>, Self::Error>> + Send;
}
