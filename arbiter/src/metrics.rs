//! Prometheus metrics for the server, client and dispatcher.

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Outcome of handling one message.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    /// Handled and applied.
    Success,
    /// Ignored without further action (duplicates, stale or unknown proposals).
    Dropped,
    /// Rejected as malformed or unauthenticated.
    Invalid,
    /// Failed for a reason that may resolve on retry.
    Failure,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Label {
    pub outcome: Outcome,
}

/// Counter of messages by [Outcome].
pub type Status = Family<Label, Counter>;

pub(crate) fn inc(status: &Status, outcome: Outcome) {
    status.get_or_create(&Label { outcome }).inc();
}

/// Metrics for the [crate::server::Server].
#[derive(Clone, Default)]
pub struct Server {
    /// Proposals broadcast by this node.
    pub proposals: Counter,
    /// Feedback received, by outcome.
    pub feedback: Status,
    /// Proposals that reached quorum and were accepted (or advanced to the next round).
    pub finalized: Counter,
    /// Proposals that reached quorum but were rejected by the chain.
    pub rejected: Counter,
    /// Proposals collecting signatures.
    pub pending: Gauge,
}

impl Server {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "proposals",
            "Number of proposals broadcast",
            metrics.proposals.clone(),
        );
        registry.register(
            "feedback",
            "Number of feedback messages received by outcome",
            metrics.feedback.clone(),
        );
        registry.register(
            "finalized",
            "Number of proposals finalized",
            metrics.finalized.clone(),
        );
        registry.register(
            "rejected",
            "Number of finalized proposals rejected by the chain",
            metrics.rejected.clone(),
        );
        registry.register(
            "pending",
            "Number of proposals collecting signatures",
            metrics.pending.clone(),
        );
        metrics
    }
}

/// Metrics for the [crate::client::Client].
#[derive(Clone, Default)]
pub struct Client {
    /// Proposals received, by outcome.
    pub proposals: Status,
    /// Feedback sent back to proposers.
    pub answered: Counter,
}

impl Client {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "proposals",
            "Number of proposals received by outcome",
            metrics.proposals.clone(),
        );
        registry.register(
            "answered",
            "Number of proposals answered",
            metrics.answered.clone(),
        );
        metrics
    }
}

/// Metrics for the [crate::network::Dispatcher].
#[derive(Clone, Default)]
pub struct Dispatcher {
    /// Messages received from the network, by outcome.
    pub received: Status,
    /// Messages dropped because the sender's queue was full.
    pub dropped: Counter,
    /// Messages waiting to be processed.
    pub queued: Gauge,
}

impl Dispatcher {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "received",
            "Number of messages received by outcome",
            metrics.received.clone(),
        );
        registry.register(
            "dropped",
            "Number of messages dropped because a peer queue was full",
            metrics.dropped.clone(),
        );
        registry.register(
            "queued",
            "Number of messages waiting to be processed",
            metrics.queued.clone(),
        );
        metrics
    }
}
