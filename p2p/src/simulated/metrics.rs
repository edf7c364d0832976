use arbiter_cryptography::PublicKey;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Message {
    pub origin: String,
    pub recipient: String,
}

impl Message {
    pub fn new<P: PublicKey>(origin: &P, recipient: &P) -> Self {
        Self {
            origin: origin.to_string(),
            recipient: recipient.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Dropped {
    pub recipient: String,
    pub reason: Reason,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Reason {
    NoAgent,
    NoLink,
    LinkFailure,
    Full,
    Closed,
}

impl Dropped {
    pub fn new<P: PublicKey>(recipient: &P, reason: Reason) -> Self {
        Self {
            recipient: recipient.to_string(),
            reason,
        }
    }
}
